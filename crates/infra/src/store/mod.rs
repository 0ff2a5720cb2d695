//! Ledger persistence.
//!
//! The store owns the storage-level unique indexes: the logical key, the
//! `(tenant, scope, key)` idempotency key and at most one reverse per
//! original. Summaries are keyed by `(tenant, part)` and versioned.
//! Application-level checks may race; these may not.

mod in_memory;

pub use in_memory::{InMemoryLedgerStore, InMemoryLedgerTx};

use core::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

use factory_core::{LedgerEntryId, PartId, TenantId};
use factory_inventory::{IdempotencyKey, LogicalKey, PartStockSummary, StockLedgerEntry, ValidatedEntry};

/// Which unique index rejected a write.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UniqueIndex {
    LogicalKey,
    IdempotencyKey,
    ReverseOf,
}

impl fmt::Display for UniqueIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UniqueIndex::LogicalKey => "uq_ledger_logical_key",
            UniqueIndex::IdempotencyKey => "uq_ledger_idempotency_key",
            UniqueIndex::ReverseOf => "uq_ledger_reverse_of",
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(UniqueIndex),

    #[error("stock ledger entry {0} is immutable (append-only)")]
    Immutable(LedgerEntryId),

    #[error("timed out after {waited_ms}ms waiting for lock on part {part_id}")]
    LockTimeout {
        tenant_id: TenantId,
        part_id: PartId,
        waited_ms: u64,
    },

    #[error("write to part {part_id} requires holding its lock")]
    LockNotHeld { tenant_id: TenantId, part_id: PartId },

    #[error("commit conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::UniqueViolation(_) => "unique_violation",
            StoreError::Immutable(_) => "ledger_immutable",
            StoreError::LockTimeout { .. } => "lock_timeout",
            StoreError::LockNotHeld { .. } => "lock_not_held",
            StoreError::Conflict(_) => "commit_conflict",
        }
    }

    /// Whether retrying the whole operation from scratch may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. } | StoreError::Conflict(_))
    }
}

/// Filter for ledger listings.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    /// `None` = every tenant.
    pub tenant_id: Option<TenantId>,
    pub part_id: Option<PartId>,
}

impl EntryFilter {
    pub fn tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            part_id: None,
        }
    }

    pub fn part(tenant_id: TenantId, part_id: PartId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            part_id: Some(part_id),
        }
    }

    pub fn matches(&self, entry: &StockLedgerEntry) -> bool {
        self.tenant_id.is_none_or(|t| t == entry.tenant_id) && self.part_id.is_none_or(|p| p == entry.part_id)
    }
}

/// Outcome counters of a summary rebuild.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RebuildCounts {
    /// Distinct `(tenant, part)` pairs found in the ledger.
    pub total_parts: usize,
    /// Summaries created or changed.
    pub updated: usize,
    /// Summaries dropped because no ledger rows back them.
    pub removed: usize,
}

/// Ledger storage.
pub trait LedgerStore: Send + Sync {
    type Tx<'a>: LedgerTransaction
    where
        Self: 'a;

    /// Open a unit of work. Dropping it without `commit` rolls back.
    fn begin(&self) -> Self::Tx<'_>;

    fn entry_by_id(&self, id: LedgerEntryId) -> Option<StockLedgerEntry>;

    /// Matching entries in `(created_at, sequence)` order.
    fn entries(&self, filter: EntryFilter) -> Vec<StockLedgerEntry>;

    fn summary(&self, tenant_id: TenantId, part_id: PartId) -> Option<PartStockSummary>;

    /// Summaries for `tenant_id` (`None` = every tenant), sorted by `(tenant, part)`.
    fn summaries(&self, tenant_id: Option<TenantId>) -> Vec<PartStockSummary>;

    /// Replace the summaries of `tenant_id` (`None` = every tenant) with the
    /// output of `compute`, run over the matching ledger rows.
    ///
    /// Runs atomically with respect to appends: no commit interleaves between
    /// reading the ledger and writing the summaries.
    fn rebuild_summaries<F, E>(&self, tenant_id: Option<TenantId>, compute: F) -> Result<RebuildCounts, E>
    where
        F: FnOnce(&[StockLedgerEntry]) -> Result<Vec<PartStockSummary>, E>;

    /// Ledger rows are immutable; this always fails.
    fn update_entry(&self, entry: &StockLedgerEntry) -> Result<(), StoreError> {
        Err(StoreError::Immutable(entry.id))
    }

    /// Ledger rows are never removed; this always fails.
    fn delete_entry(&self, id: LedgerEntryId) -> Result<(), StoreError> {
        Err(StoreError::Immutable(id))
    }
}

/// One atomic unit of ledger work.
///
/// Reads observe committed rows plus this transaction's own staged writes.
pub trait LedgerTransaction {
    /// Take the exclusive `(tenant, part)` lock for the rest of the transaction.
    fn lock_part(&mut self, tenant_id: TenantId, part_id: PartId) -> Result<(), StoreError>;

    fn holds_lock(&self, tenant_id: TenantId, part_id: PartId) -> bool;

    fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Option<StockLedgerEntry>;

    fn find_by_logical_key(&self, key: &LogicalKey) -> Option<StockLedgerEntry>;

    /// The reverse entry pointing at `original`, if any.
    fn find_reverse_of(&self, original: LedgerEntryId) -> Option<StockLedgerEntry>;

    /// Signed sum of every ledger row for `(tenant, part)`.
    fn available_qty(&self, tenant_id: TenantId, part_id: PartId) -> Decimal;

    /// Stage a new row. Assigns id, sequence and `created_at`. Requires the
    /// part lock.
    fn insert_entry(&mut self, entry: ValidatedEntry) -> Result<StockLedgerEntry, StoreError>;

    /// Current summary row (or a zero row) for update. Requires the part lock.
    fn summary_for_update(&mut self, tenant_id: TenantId, part_id: PartId) -> Result<PartStockSummary, StoreError>;

    /// Stage a summary row previously read with `summary_for_update`.
    fn save_summary(&mut self, summary: PartStockSummary) -> Result<(), StoreError>;

    /// Publish staged writes atomically; unique indexes and summary versions
    /// are re-checked against everything committed meanwhile.
    fn commit(self) -> Result<Vec<StockLedgerEntry>, StoreError>
    where
        Self: Sized;
}
