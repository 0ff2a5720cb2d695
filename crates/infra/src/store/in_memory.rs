use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;

use factory_core::{ExpectedVersion, LedgerEntryId, PartId, TenantId};
use factory_inventory::{IdempotencyKey, LogicalKey, PartStockSummary, StockLedgerEntry, ValidatedEntry};

use super::{EntryFilter, LedgerStore, LedgerTransaction, RebuildCounts, StoreError, UniqueIndex};
use crate::config::LedgerConfig;
use crate::lock::{PartLockGuard, PartLockTable};

type PartKey = (TenantId, PartId);

/// Committed rows and their indexes.
#[derive(Debug, Clone, Default)]
struct LedgerState {
    rows: Vec<StockLedgerEntry>,
    by_id: HashMap<LedgerEntryId, usize>,
    by_logical: HashMap<LogicalKey, LedgerEntryId>,
    by_idempotency: HashMap<IdempotencyKey, LedgerEntryId>,
    by_reverse_of: HashMap<LedgerEntryId, LedgerEntryId>,
    by_part: HashMap<PartKey, Vec<usize>>,
    summaries: BTreeMap<PartKey, PartStockSummary>,
}

impl LedgerState {
    fn get(&self, id: LedgerEntryId) -> Option<&StockLedgerEntry> {
        self.by_id.get(&id).map(|&idx| &self.rows[idx])
    }

    fn check_unique(&self, entry: &StockLedgerEntry) -> Result<(), StoreError> {
        if self.by_id.contains_key(&entry.id) {
            return Err(StoreError::Immutable(entry.id));
        }
        if self.by_logical.contains_key(&entry.logical_key()) {
            return Err(StoreError::UniqueViolation(UniqueIndex::LogicalKey));
        }
        if let Some(key) = entry.idempotency() {
            if self.by_idempotency.contains_key(&key) {
                return Err(StoreError::UniqueViolation(UniqueIndex::IdempotencyKey));
            }
        }
        if let Some(original) = entry.reverse_of {
            if self.by_reverse_of.contains_key(&original) {
                return Err(StoreError::UniqueViolation(UniqueIndex::ReverseOf));
            }
        }
        Ok(())
    }

    /// Caller must have run `check_unique`.
    fn push(&mut self, entry: StockLedgerEntry) {
        let idx = self.rows.len();
        self.by_id.insert(entry.id, idx);
        self.by_logical.insert(entry.logical_key(), entry.id);
        if let Some(key) = entry.idempotency() {
            self.by_idempotency.insert(key, entry.id);
        }
        if let Some(original) = entry.reverse_of {
            self.by_reverse_of.insert(original, entry.id);
        }
        self.by_part.entry((entry.tenant_id, entry.part_id)).or_default().push(idx);
        self.rows.push(entry);
    }

    fn available_qty(&self, key: PartKey) -> Decimal {
        self.by_part
            .get(&key)
            .map(|idxs| idxs.iter().map(|&i| self.rows[i].signed_delta()).sum())
            .unwrap_or(Decimal::ZERO)
    }
}

/// Allocates `(sequence, created_at)` pairs that sort in allocation order.
#[derive(Debug)]
struct Clock {
    sequence: u64,
    last: DateTime<Utc>,
}

impl Clock {
    fn next(&mut self) -> (u64, DateTime<Utc>) {
        self.sequence += 1;
        self.last = self.last.max(Utc::now());
        (self.sequence, self.last)
    }

    fn advance_past(&mut self, entry: &StockLedgerEntry) {
        self.sequence = self.sequence.max(entry.sequence);
        self.last = self.last.max(entry.created_at);
    }
}

/// In-memory ledger store.
///
/// Unique indexes are real hash indexes checked both when a row is staged and
/// again under the write lock at commit. Per-part locks come from a sharded
/// [`PartLockTable`].
#[derive(Debug)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
    pub(crate) locks: PartLockTable,
    clock: Mutex<Clock>,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new(&LedgerConfig::default())
    }
}

impl InMemoryLedgerStore {
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            locks: PartLockTable::new(config.lock_shards, config.lock_timeout()),
            clock: Mutex::new(Clock {
                sequence: 0,
                last: DateTime::<Utc>::MIN_UTC,
            }),
        }
    }

    /// Load already-persisted rows (e.g. from an export) without re-appending.
    ///
    /// Rows keep their ids, sequences and timestamps; every unique index is
    /// enforced. All-or-nothing. Summaries are not touched.
    pub fn restore(&self, entries: impl IntoIterator<Item = StockLedgerEntry>) -> Result<usize, StoreError> {
        let mut state = self.state.write();
        let mut next = state.clone();
        let mut clock = self.clock.lock();
        let mut restored = 0;

        for entry in entries {
            next.check_unique(&entry)?;
            clock.advance_past(&entry);
            next.push(entry);
            restored += 1;
        }

        *state = next;
        Ok(restored)
    }

    pub fn entry_count(&self) -> usize {
        self.state.read().rows.len()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    type Tx<'a> = InMemoryLedgerTx<'a>;

    fn begin(&self) -> Self::Tx<'_> {
        InMemoryLedgerTx {
            store: self,
            locked: Vec::new(),
            guards: Vec::new(),
            staged: Vec::new(),
            summaries: BTreeMap::new(),
            read_versions: HashMap::new(),
        }
    }

    fn entry_by_id(&self, id: LedgerEntryId) -> Option<StockLedgerEntry> {
        self.state.read().get(id).cloned()
    }

    fn entries(&self, filter: EntryFilter) -> Vec<StockLedgerEntry> {
        let state = self.state.read();
        let mut out: Vec<_> = state.rows.iter().filter(|e| filter.matches(e)).cloned().collect();
        out.sort_by_key(|e| e.replay_order());
        out
    }

    fn summary(&self, tenant_id: TenantId, part_id: PartId) -> Option<PartStockSummary> {
        self.state.read().summaries.get(&(tenant_id, part_id)).cloned()
    }

    fn summaries(&self, tenant_id: Option<TenantId>) -> Vec<PartStockSummary> {
        self.state
            .read()
            .summaries
            .values()
            .filter(|s| tenant_id.is_none_or(|t| t == s.tenant_id))
            .cloned()
            .collect()
    }

    fn rebuild_summaries<F, E>(&self, tenant_id: Option<TenantId>, compute: F) -> Result<RebuildCounts, E>
    where
        F: FnOnce(&[StockLedgerEntry]) -> Result<Vec<PartStockSummary>, E>,
    {
        let mut state = self.state.write();
        let filter = EntryFilter { tenant_id, part_id: None };
        let rows: Vec<_> = state.rows.iter().filter(|e| filter.matches(e)).cloned().collect();
        let rebuilt = compute(&rows)?;

        let mut counts = RebuildCounts {
            total_parts: rebuilt.len(),
            ..RebuildCounts::default()
        };
        let mut seen = Vec::with_capacity(rebuilt.len());

        for mut summary in rebuilt {
            let key = (summary.tenant_id, summary.part_id);
            seen.push(key);
            match state.summaries.get(&key) {
                Some(current) if current.same_values(&summary) => continue,
                Some(current) => summary.version = current.version + 1,
                None => summary.version = 1,
            }
            counts.updated += 1;
            state.summaries.insert(key, summary);
        }

        let orphans: Vec<PartKey> = state
            .summaries
            .keys()
            .filter(|(t, _)| tenant_id.is_none_or(|f| f == *t))
            .filter(|k| !seen.contains(k))
            .copied()
            .collect();
        for key in orphans {
            state.summaries.remove(&key);
            counts.removed += 1;
        }

        Ok(counts)
    }
}

/// Unit of work over [`InMemoryLedgerStore`].
///
/// Holds its part locks until commit or drop.
#[derive(Debug)]
pub struct InMemoryLedgerTx<'a> {
    store: &'a InMemoryLedgerStore,
    locked: Vec<PartKey>,
    guards: Vec<PartLockGuard<'a>>,
    staged: Vec<StockLedgerEntry>,
    summaries: BTreeMap<PartKey, PartStockSummary>,
    read_versions: HashMap<PartKey, u64>,
}

impl InMemoryLedgerTx<'_> {
    fn require_lock(&self, tenant_id: TenantId, part_id: PartId) -> Result<(), StoreError> {
        if self.holds_lock(tenant_id, part_id) {
            Ok(())
        } else {
            Err(StoreError::LockNotHeld { tenant_id, part_id })
        }
    }

    fn staged_conflict(&self, entry: &StockLedgerEntry) -> Option<UniqueIndex> {
        let logical = entry.logical_key();
        let idempotency = entry.idempotency();
        self.staged.iter().find_map(|s| {
            if s.logical_key() == logical {
                Some(UniqueIndex::LogicalKey)
            } else if idempotency.is_some() && s.idempotency() == idempotency {
                Some(UniqueIndex::IdempotencyKey)
            } else if entry.reverse_of.is_some() && s.reverse_of == entry.reverse_of {
                Some(UniqueIndex::ReverseOf)
            } else {
                None
            }
        })
    }
}

impl LedgerTransaction for InMemoryLedgerTx<'_> {
    fn lock_part(&mut self, tenant_id: TenantId, part_id: PartId) -> Result<(), StoreError> {
        if self.holds_lock(tenant_id, part_id) {
            return Ok(());
        }
        // Shard mutexes are not re-entrant.
        let shard = self.store.locks.shard_for(tenant_id, part_id);
        if !self.guards.iter().any(|g| g.shard() == shard) {
            self.guards.push(self.store.locks.lock(tenant_id, part_id)?);
        }
        self.locked.push((tenant_id, part_id));
        Ok(())
    }

    fn holds_lock(&self, tenant_id: TenantId, part_id: PartId) -> bool {
        self.locked.contains(&(tenant_id, part_id))
    }

    fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Option<StockLedgerEntry> {
        if let Some(e) = self.staged.iter().find(|e| e.idempotency().as_ref() == Some(key)) {
            return Some(e.clone());
        }
        let state = self.store.state.read();
        state.by_idempotency.get(key).and_then(|&id| state.get(id)).cloned()
    }

    fn find_by_logical_key(&self, key: &LogicalKey) -> Option<StockLedgerEntry> {
        if let Some(e) = self.staged.iter().find(|e| &e.logical_key() == key) {
            return Some(e.clone());
        }
        let state = self.store.state.read();
        state.by_logical.get(key).and_then(|&id| state.get(id)).cloned()
    }

    fn find_reverse_of(&self, original: LedgerEntryId) -> Option<StockLedgerEntry> {
        if let Some(e) = self.staged.iter().find(|e| e.reverse_of == Some(original)) {
            return Some(e.clone());
        }
        let state = self.store.state.read();
        state.by_reverse_of.get(&original).and_then(|&id| state.get(id)).cloned()
    }

    fn available_qty(&self, tenant_id: TenantId, part_id: PartId) -> Decimal {
        let committed = self.store.state.read().available_qty((tenant_id, part_id));
        let staged: Decimal = self
            .staged
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.part_id == part_id)
            .map(StockLedgerEntry::signed_delta)
            .sum();
        committed + staged
    }

    fn insert_entry(&mut self, entry: ValidatedEntry) -> Result<StockLedgerEntry, StoreError> {
        self.require_lock(entry.tenant_id, entry.part_id)?;

        let (sequence, created_at) = self.store.clock.lock().next();
        let row = entry.into_entry(LedgerEntryId::new(), sequence, created_at);

        if let Some(index) = self.staged_conflict(&row) {
            return Err(StoreError::UniqueViolation(index));
        }
        self.store.state.read().check_unique(&row)?;

        self.staged.push(row.clone());
        Ok(row)
    }

    fn summary_for_update(&mut self, tenant_id: TenantId, part_id: PartId) -> Result<PartStockSummary, StoreError> {
        self.require_lock(tenant_id, part_id)?;
        let key = (tenant_id, part_id);

        if let Some(staged) = self.summaries.get(&key) {
            return Ok(staged.clone());
        }
        let current = self
            .store
            .state
            .read()
            .summaries
            .get(&key)
            .cloned()
            .unwrap_or_else(|| PartStockSummary::empty(tenant_id, part_id, Utc::now()));
        self.read_versions.insert(key, current.version);
        Ok(current)
    }

    fn save_summary(&mut self, summary: PartStockSummary) -> Result<(), StoreError> {
        self.require_lock(summary.tenant_id, summary.part_id)?;
        let key = (summary.tenant_id, summary.part_id);
        if !self.read_versions.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "summary for part {} saved without being read for update",
                summary.part_id
            )));
        }
        self.summaries.insert(key, summary);
        Ok(())
    }

    fn commit(self) -> Result<Vec<StockLedgerEntry>, StoreError> {
        let mut state = self.store.state.write();

        for row in &self.staged {
            state.check_unique(row)?;
        }
        for (key, summary) in &self.summaries {
            let read = self.read_versions.get(key).copied().unwrap_or(0);
            let current = state.summaries.get(key).map(|s| s.version).unwrap_or(0);
            ExpectedVersion::Exact(read)
                .check(current)
                .map_err(|e| StoreError::Conflict(format!("part {}: {e}", summary.part_id)))?;
        }

        for row in &self.staged {
            state.push(row.clone());
        }
        for (key, mut summary) in self.summaries.into_iter() {
            summary.version = self.read_versions.get(&key).copied().unwrap_or(0) + 1;
            state.summaries.insert(key, summary);
        }

        Ok(self.staged)
    }
}
