//! Administrative inspection and rebuild surface.
//!
//! Tenant scoping fails closed: a non-system context without a tenant sees
//! nothing. Every access emits a best-effort `inventory.admin` audit event.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use factory_audit::{AuditPayload, AuditSink, INVENTORY_ADMIN, SUMMARY_REBUILT, emit_best_effort};
use factory_core::{Entity, LedgerEntryId, PartId, TenantContext, TenantId};
use factory_inventory::{PartStockSummary, StockLedgerEntry};

use crate::projector::{RebuildError, StockSummaryProjector};
use crate::store::{EntryFilter, LedgerStore, RebuildCounts};

const RESOURCE_ENTRY: &str = "stock_ledger_entry";
const RESOURCE_SUMMARY: &str = "part_stock_summary";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("rebuild requires a system context")]
    SystemOnly,

    #[error(transparent)]
    Rebuild(#[from] RebuildError),
}

impl AdminError {
    pub fn reason(&self) -> &'static str {
        match self {
            AdminError::SystemOnly => "system_context_required",
            AdminError::Rebuild(e) => e.reason(),
        }
    }
}

pub struct InventoryAdmin<S, A> {
    store: Arc<S>,
    audit: A,
    projector: StockSummaryProjector,
}

impl<S, A> InventoryAdmin<S, A>
where
    S: LedgerStore,
    A: AuditSink,
{
    pub fn new(store: Arc<S>, audit: A, projector: StockSummaryProjector) -> Self {
        Self { store, audit, projector }
    }

    pub fn list_entries(&self, ctx: &TenantContext) -> Vec<StockLedgerEntry> {
        let entries = match ctx.tenant_filter() {
            Ok(tenant_id) => self.store.entries(EntryFilter { tenant_id, part_id: None }),
            Err(_) => return Vec::new(),
        };
        self.record(ctx, "list", RESOURCE_ENTRY, entries.len(), None);
        entries
    }

    pub fn get_entry(&self, ctx: &TenantContext, id: LedgerEntryId) -> Option<StockLedgerEntry> {
        if ctx.tenant_filter().is_err() {
            return None;
        }
        let entry = self.store.entry_by_id(id).filter(|e| visible(ctx, e));
        self.record(ctx, "detail", RESOURCE_ENTRY, usize::from(entry.is_some()), Some(id.to_string()));
        entry
    }

    pub fn list_summaries(&self, ctx: &TenantContext) -> Vec<PartStockSummary> {
        let summaries = match ctx.tenant_filter() {
            Ok(tenant_id) => self.store.summaries(tenant_id),
            Err(_) => return Vec::new(),
        };
        self.record(ctx, "list", RESOURCE_SUMMARY, summaries.len(), None);
        summaries
    }

    pub fn get_summary(&self, ctx: &TenantContext, part_id: PartId) -> Option<PartStockSummary> {
        let summary = match ctx.tenant_filter() {
            Ok(Some(tenant_id)) => self.store.summary(tenant_id, part_id),
            Ok(None) => self.store.summaries(None).into_iter().find(|s| s.part_id == part_id),
            Err(_) => return None,
        }
        .filter(|s| visible(ctx, s));
        self.record(ctx, "detail", RESOURCE_SUMMARY, usize::from(summary.is_some()), Some(part_id.to_string()));
        summary
    }

    /// Recompute summaries from the ledger. System contexts only.
    pub fn rebuild(&self, ctx: &TenantContext, tenant_id: Option<TenantId>) -> Result<RebuildCounts, AdminError> {
        if !ctx.is_system() {
            return Err(AdminError::SystemOnly);
        }
        let counts = self.projector.rebuild(self.store.as_ref(), tenant_id)?;

        let mut payload = AuditPayload::new();
        payload.insert("total_parts".into(), json!(counts.total_parts));
        payload.insert("updated".into(), json!(counts.updated));
        payload.insert("removed".into(), json!(counts.removed));
        payload.insert("strategy".into(), json!(self.projector.strategy()));
        payload.insert("tenant_filter".into(), json!(tenant_id));
        emit_best_effort(&self.audit, SUMMARY_REBUILT, payload, ctx);

        Ok(counts)
    }

    fn record(&self, ctx: &TenantContext, action: &str, resource: &str, count: usize, object_id: Option<String>) {
        let mut payload = AuditPayload::new();
        payload.insert("action".into(), json!(action));
        payload.insert("resource".into(), json!(resource));
        payload.insert("count".into(), json!(count));
        if let Some(id) = object_id {
            payload.insert("object_id".into(), json!(id));
        }
        emit_best_effort(&self.audit, INVENTORY_ADMIN, payload, ctx);
    }
}

/// Single-row visibility; a pinned system context stays on its tenant.
fn visible<E: Entity>(ctx: &TenantContext, row: &E) -> bool {
    match ctx.tenant_id() {
        Some(t) => t == row.tenant_id(),
        None => ctx.is_system(),
    }
}
