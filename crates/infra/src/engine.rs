//! Ledger append engine.
//!
//! Per write: validate, dedupe, lock the part, re-check under the lock, guard
//! against negative stock, insert, project into the summary, commit. Lock
//! through commit is one transaction; any failure rolls everything back. A
//! unique-index collision at insert or commit is re-resolved to the row that
//! won the race.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use factory_audit::{AuditSink, NEGATIVE_STOCK_BLOCKED, emit_best_effort};
use factory_core::{LedgerEntryId, TenantContext, TenantId};
use factory_inventory::{
    LedgerValidationError, NewLedgerEntry, ProjectionError, StockLedgerEntry, ValidatedEntry, validate_entry,
};

use crate::catalog::PartCatalog;
use crate::guard::{NegativeStockGuard, NegativeStockViolation};
use crate::idempotency::IdempotencyResolver;
use crate::sink::{LedgerSink, SinkError};
use crate::store::{LedgerStore, LedgerTransaction, StoreError, UniqueIndex};

/// Successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new row was stored and projected.
    Inserted(StockLedgerEntry),
    /// The write matched an existing row; nothing was stored or projected.
    Duplicate(StockLedgerEntry),
}

impl AppendOutcome {
    pub fn entry(&self) -> &StockLedgerEntry {
        match self {
            AppendOutcome::Inserted(e) | AppendOutcome::Duplicate(e) => e,
        }
    }

    pub fn into_entry(self) -> StockLedgerEntry {
        match self {
            AppendOutcome::Inserted(e) | AppendOutcome::Duplicate(e) => e,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Duplicate(_))
    }

    pub fn reason(&self) -> &'static str {
        match self {
            AppendOutcome::Inserted(_) => "inserted",
            AppendOutcome::Duplicate(_) => "duplicate_resolved",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AppendError {
    #[error("context is not allowed to write ledger entries for tenant {0}")]
    TenantScope(TenantId),

    #[error(transparent)]
    Validation(#[from] LedgerValidationError),

    #[error(
        "insufficient stock for part {}: available {}, delta {}",
        .0.part_id,
        .0.current_available_qty,
        .0.delta_qty
    )]
    NegativeStock(Box<NegativeStockViolation>),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppendError {
    pub fn reason(&self) -> &'static str {
        match self {
            AppendError::TenantScope(_) => "tenant_scope_violation",
            AppendError::Validation(e) => e.reason(),
            AppendError::NegativeStock(_) => "negative_stock",
            AppendError::Projection(e) => e.reason(),
            AppendError::Store(e) => e.reason(),
        }
    }

    /// True only for transient lock/commit failures. The whole append may be
    /// retried; it is idempotent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppendError::Store(e) if e.is_transient())
    }
}

impl From<SinkError> for AppendError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Projection(e) => AppendError::Projection(e),
            SinkError::Store(e) => AppendError::Store(e),
        }
    }
}

pub struct LedgerAppendEngine<S, C, A> {
    store: Arc<S>,
    catalog: C,
    audit: A,
    sink: Arc<dyn LedgerSink>,
    resolver: IdempotencyResolver,
    guard: NegativeStockGuard,
}

impl<S, C, A> LedgerAppendEngine<S, C, A>
where
    S: LedgerStore,
    C: PartCatalog,
    A: AuditSink,
{
    pub fn new(store: Arc<S>, catalog: C, audit: A, sink: Arc<dyn LedgerSink>) -> Self {
        Self {
            store,
            catalog,
            audit,
            sink,
            resolver: IdempotencyResolver::new(),
            guard: NegativeStockGuard::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Append one ledger entry.
    #[instrument(
        skip(self, ctx, candidate),
        fields(
            tenant_id = %candidate.tenant_id,
            part_id = %candidate.part_id,
            movement_type = %candidate.movement_type,
            source_type = %candidate.source_type
        ),
        err
    )]
    pub fn append(&self, ctx: &TenantContext, candidate: NewLedgerEntry) -> Result<AppendOutcome, AppendError> {
        ctx.authorize_write(candidate.tenant_id)
            .map_err(|_| AppendError::TenantScope(candidate.tenant_id))?;

        let part = self.catalog.part(candidate.part_id);
        let reverse_target = candidate.reverse_of.and_then(|id| self.store.entry_by_id(id));
        let entry = validate_entry(&candidate, part.as_ref(), reverse_target.as_ref())?;

        let mut tx = self.store.begin();
        if let Some(existing) = self.duplicate_of(&tx, &entry) {
            return Ok(AppendOutcome::Duplicate(existing));
        }

        tx.lock_part(entry.tenant_id, entry.part_id)?;

        // Another writer may have landed while we waited for the lock.
        if let Some(existing) = self.duplicate_of(&tx, &entry) {
            return Ok(AppendOutcome::Duplicate(existing));
        }
        if let Some(original) = entry.reverse_of {
            if tx.find_reverse_of(original).is_some() {
                return Err(LedgerValidationError::ReverseAlreadyExists(original).into());
            }
        }

        if let Err(violation) = self.guard.check(&tx, &entry)? {
            drop(tx);
            return Err(self.reject_negative_stock(ctx, violation));
        }

        let row = match tx.insert_entry(entry.clone()) {
            Ok(row) => row,
            Err(StoreError::UniqueViolation(index)) => {
                drop(tx);
                return self.resolve_race(&entry, index);
            }
            Err(e) => return Err(e.into()),
        };

        self.sink.on_ledger_insert(&mut tx, &row)?;

        match tx.commit() {
            Ok(_) => {}
            Err(StoreError::UniqueViolation(index)) => return self.resolve_race(&entry, index),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(entry_id = %row.id, sequence = row.sequence, qty = %row.qty, "ledger entry appended");
        Ok(AppendOutcome::Inserted(row))
    }

    fn duplicate_of<T>(&self, tx: &T, entry: &ValidatedEntry) -> Option<StockLedgerEntry>
    where
        T: LedgerTransaction + ?Sized,
    {
        let (existing, matched) = self.resolver.resolve(tx, entry)?;
        tracing::debug!(entry_id = %existing.id, matched = matched.as_str(), "duplicate write resolved");
        Some(existing)
    }

    /// A unique index rejected our row: some other writer stored the same
    /// entry first. Return theirs.
    fn resolve_race(&self, entry: &ValidatedEntry, index: UniqueIndex) -> Result<AppendOutcome, AppendError> {
        let tx = self.store.begin();
        if let Some(existing) = self.duplicate_of(&tx, entry) {
            return Ok(AppendOutcome::Duplicate(existing));
        }
        match (index, entry.reverse_of) {
            (UniqueIndex::ReverseOf, Some(original)) => Err(LedgerValidationError::ReverseAlreadyExists(original).into()),
            _ => Err(StoreError::UniqueViolation(index).into()),
        }
    }

    fn reject_negative_stock(&self, ctx: &TenantContext, violation: NegativeStockViolation) -> AppendError {
        tracing::warn!(
            current = %violation.current_available_qty,
            delta = %violation.delta_qty,
            projected = %violation.projected_available_qty,
            "negative stock write blocked"
        );
        let audit_ctx = audit_context(ctx, violation.tenant_id);
        emit_best_effort(&self.audit, NEGATIVE_STOCK_BLOCKED, violation.audit_payload(), &audit_ctx);
        AppendError::NegativeStock(Box::new(violation))
    }

    /// Entry a reversal would target, for callers building one.
    pub fn entry(&self, ctx: &TenantContext, id: LedgerEntryId) -> Option<StockLedgerEntry> {
        self.store.entry_by_id(id).filter(|e| ctx.can_access(e.tenant_id))
    }
}

/// Audit rows are attributed to the entry's tenant even for system callers.
fn audit_context(ctx: &TenantContext, tenant_id: TenantId) -> TenantContext {
    if ctx.tenant_id().is_some() {
        return *ctx;
    }
    let scoped = TenantContext::system_for(tenant_id);
    match ctx.actor_id() {
        Some(actor) => scoped.with_actor(actor),
        None => scoped,
    }
}
