//! Stock summary projector: incremental update per insert, plus full rebuild.

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use factory_core::TenantId;
use factory_inventory::{CostPolicy, ProjectionError, RebuildStrategy, StockLedgerEntry, rebuild_summaries};

use crate::config::LedgerConfig;
use crate::sink::{LedgerSink, SinkError};
use crate::store::{LedgerStore, LedgerTransaction, RebuildCounts, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RebuildError {
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RebuildError {
    pub fn reason(&self) -> &'static str {
        match self {
            RebuildError::Projection(e) => e.reason(),
            RebuildError::Store(e) => e.reason(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StockSummaryProjector {
    strategy: RebuildStrategy,
    policy: CostPolicy,
}

impl StockSummaryProjector {
    pub fn new(strategy: RebuildStrategy, policy: CostPolicy) -> Self {
        Self { strategy, policy }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.rebuild_strategy, config.cost_policy.clone())
    }

    pub fn strategy(&self) -> RebuildStrategy {
        self.strategy
    }

    pub fn with_strategy(mut self, strategy: RebuildStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Recompute every summary of `tenant_id` (`None` = all tenants) from the
    /// ledger. Idempotent; never touches ledger rows.
    #[instrument(skip(self, store), fields(strategy = %self.strategy, cost_sources = %self.policy), err)]
    pub fn rebuild<S>(&self, store: &S, tenant_id: Option<TenantId>) -> Result<RebuildCounts, RebuildError>
    where
        S: LedgerStore,
    {
        let counts = store.rebuild_summaries(tenant_id, |entries| {
            rebuild_summaries(entries, self.strategy, &self.policy, Utc::now()).map_err(RebuildError::from)
        })?;
        tracing::info!(
            total_parts = counts.total_parts,
            updated = counts.updated,
            removed = counts.removed,
            "stock summaries rebuilt"
        );
        Ok(counts)
    }
}

impl LedgerSink for StockSummaryProjector {
    fn on_ledger_insert(&self, tx: &mut dyn LedgerTransaction, entry: &StockLedgerEntry) -> Result<(), SinkError> {
        let mut summary = tx.summary_for_update(entry.tenant_id, entry.part_id)?;
        summary.apply_entry(entry)?;
        tx.save_summary(summary)?;
        Ok(())
    }
}
