//! Integration tests for the full append pipeline.
//!
//! Tests: NewLedgerEntry → validate → dedupe → lock → guard → insert → projector → commit
//!
//! Verifies:
//! - Duplicate writes collapse to one row, including under concurrent retries
//! - Stock never goes negative and blocked writes are audited
//! - Reversals are exact, at most one per original, and cost-neutral
//! - Rebuild reproduces the incrementally projected summaries
//! - Tenant isolation is enforced on writes and administrative reads

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use factory_audit::{
        AuditEmitter, AuditError, AuditPayload, AuditRecord, AuditSink, AuditStore, InMemoryAuditStore,
        NEGATIVE_STOCK_BLOCKED, SUMMARY_REBUILT,
    };
    use factory_core::{LedgerEntryId, PartId, TenantContext, TenantId};
    use factory_inventory::{
        IdempotencyKey, IdempotencyScope, LogicalKey, MovementType, NewLedgerEntry, Part, PartStockSummary, PartType,
        ProcurementStrategy, RebuildStrategy, SourceType, StockLedgerEntry, ValidatedEntry,
    };

    use crate::admin::InventoryAdmin;
    use crate::catalog::InMemoryCatalog;
    use crate::engine::{AppendError, AppendOutcome, LedgerAppendEngine};
    use crate::projector::StockSummaryProjector;
    use crate::sink::{LedgerSink, SinkError};
    use crate::store::{
        EntryFilter, InMemoryLedgerStore, InMemoryLedgerTx, LedgerStore, LedgerTransaction, RebuildCounts, StoreError,
    };

    type Audit = Arc<AuditEmitter<Arc<InMemoryAuditStore>>>;
    type Engine = LedgerAppendEngine<InMemoryLedgerStore, Arc<InMemoryCatalog>, Audit>;

    struct Harness {
        catalog: Arc<InMemoryCatalog>,
        store: Arc<InMemoryLedgerStore>,
        audit_store: Arc<InMemoryAuditStore>,
        engine: Arc<Engine>,
        admin: InventoryAdmin<InMemoryLedgerStore, Audit>,
    }

    fn setup() -> Harness {
        let catalog = Arc::new(InMemoryCatalog::new());
        let store = Arc::new(InMemoryLedgerStore::default());
        let audit_store = Arc::new(InMemoryAuditStore::new());
        let audit: Audit = Arc::new(AuditEmitter::new(audit_store.clone()));
        let sink: Arc<dyn LedgerSink> = Arc::new(StockSummaryProjector::default());
        let engine = Arc::new(LedgerAppendEngine::new(store.clone(), catalog.clone(), audit.clone(), sink));
        let admin = InventoryAdmin::new(store.clone(), audit, StockSummaryProjector::default());
        Harness {
            catalog,
            store,
            audit_store,
            engine,
            admin,
        }
    }

    impl Harness {
        fn part(&self, tenant_id: TenantId, part_no: &str) -> Part {
            let part = Part::new(tenant_id, part_no, "Raw Material", PartType::RawMaterial, ProcurementStrategy::Buy)
                .unwrap();
            self.catalog.add_part(part).unwrap()
        }

        fn append(&self, entry: NewLedgerEntry) -> Result<AppendOutcome, AppendError> {
            self.engine.append(&TenantContext::tenant(entry.tenant_id), entry)
        }

        fn available(&self, part: &Part) -> Decimal {
            self.store
                .summary(part.tenant_id, part.id)
                .map(|s| s.available_qty)
                .unwrap_or_default()
        }

        fn rows(&self, part: &Part) -> usize {
            self.store.entries(EntryFilter::part(part.tenant_id, part.id)).len()
        }
    }

    fn entry(part: &Part, mt: MovementType, st: SourceType, qty: Decimal, cost: Decimal) -> NewLedgerEntry {
        NewLedgerEntry::new(part.tenant_id, part.id, mt, st, qty, cost)
    }

    fn purchase(part: &Part, qty: Decimal, cost: Decimal) -> NewLedgerEntry {
        entry(part, MovementType::In, SourceType::Purchase, qty, cost)
    }

    fn issue(part: &Part, qty: Decimal, doc: &str) -> NewLedgerEntry {
        entry(part, MovementType::Out, SourceType::Sales, qty, dec!(1)).with_source_ref(json!({ "doc": doc }))
    }

    fn reverse(part: &Part, mt: MovementType, qty: Decimal, original: &AppendOutcome, reason: &str) -> NewLedgerEntry {
        entry(part, mt, SourceType::Adjustment, qty, dec!(1))
            .with_source_ref(json!({ "reason": reason }))
            .reversing(original.entry().id)
    }

    #[test]
    fn same_logical_entry_is_stored_once() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        let gr = purchase(&p, dec!(10), dec!(5)).with_source_ref(json!({"doc": "GR-1"}));

        let first = h.append(gr.clone()).unwrap();
        let second = h.append(gr).unwrap();

        assert_eq!(first.reason(), "inserted");
        assert_eq!(second.reason(), "duplicate_resolved");
        assert_eq!(first.entry().id, second.entry().id);
        assert_eq!(first.entry().created_at, second.entry().created_at);
        assert_eq!(h.rows(&p), 1);
        assert_eq!(h.available(&p), dec!(10));
    }

    #[test]
    fn idempotency_key_collapses_retries_with_drifting_fields() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        let first = h
            .append(purchase(&p, dec!(10), dec!(5)).with_idempotency(IdempotencyScope::Company, "evt-1"))
            .unwrap();
        let retry = h
            .append(purchase(&p, dec!(11), dec!(5)).with_idempotency(IdempotencyScope::Company, "evt-1"))
            .unwrap();

        assert!(retry.is_duplicate());
        assert_eq!(retry.entry().id, first.entry().id);
        assert_eq!(h.available(&p), dec!(10));
    }

    #[test]
    fn overdraw_is_rejected_and_audited() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        h.append(purchase(&p, dec!(5), dec!(2))).unwrap();

        let err = h.append(issue(&p, dec!(6), "SO-1")).unwrap_err();
        assert_eq!(err.reason(), "negative_stock");
        assert!(!err.is_retryable());
        assert_eq!(h.rows(&p), 1);
        assert_eq!(h.available(&p), dec!(5));

        let records = h.audit_store.list(Some(p.tenant_id));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_name, NEGATIVE_STOCK_BLOCKED);
        let projected: Decimal = serde_json::from_value(records[0].payload["projected_available_qty"].clone()).unwrap();
        assert_eq!(projected, dec!(-1));
        assert_eq!(records[0].payload["source_ref"], json!({"doc": "SO-1"}));
    }

    #[test]
    fn negative_adjustment_is_guarded_too() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        h.append(purchase(&p, dec!(1), dec!(2))).unwrap();
        let shrink = entry(&p, MovementType::Adjustment, SourceType::Adjustment, dec!(-2), dec!(0));
        assert_eq!(h.append(shrink).unwrap_err().reason(), "negative_stock");
    }

    struct DownAudit;

    impl AuditSink for DownAudit {
        fn emit(&self, _: &str, _: AuditPayload, _: &TenantContext) -> Result<AuditRecord, AuditError> {
            Err(AuditError::Store("audit backend unavailable".to_string()))
        }
    }

    #[test]
    fn audit_failure_never_masks_the_rejection() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let store = Arc::new(InMemoryLedgerStore::default());
        let engine = LedgerAppendEngine::new(
            store.clone(),
            catalog.clone(),
            DownAudit,
            Arc::new(StockSummaryProjector::default()),
        );
        let p = catalog
            .add_part(Part::new(TenantId::new(), "RM-9", "Wire", PartType::RawMaterial, ProcurementStrategy::Buy).unwrap())
            .unwrap();

        let err = engine
            .append(&TenantContext::tenant(p.tenant_id), issue(&p, dec!(1), "SO-9"))
            .unwrap_err();
        assert!(matches!(err, AppendError::NegativeStock(_)));
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn reversal_must_exactly_invert_the_original() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        let original = h.append(purchase(&p, dec!(5), dec!(1))).unwrap();

        let short = h.append(reverse(&p, MovementType::Out, dec!(4), &original, "short")).unwrap_err();
        assert_eq!(short.reason(), "reverse_mismatch");
        let same_way = h.append(reverse(&p, MovementType::In, dec!(5), &original, "wrong")).unwrap_err();
        assert_eq!(same_way.reason(), "reverse_mismatch");

        let sales = entry(&p, MovementType::Out, SourceType::Sales, dec!(5), dec!(1)).reversing(original.entry().id);
        let err = h.append(sales).unwrap_err();
        assert!(err.to_string().contains("reverse entries must use source_type=adjustment"));

        let ok = h.append(reverse(&p, MovementType::Out, dec!(5), &original, "correction")).unwrap();
        assert_eq!(ok.reason(), "inserted");
        assert_eq!(h.available(&p), dec!(0));
    }

    #[test]
    fn an_original_has_at_most_one_reverse() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        h.append(purchase(&p, dec!(10), dec!(1))).unwrap();
        let original = h
            .append(purchase(&p, dec!(5), dec!(1)).with_source_ref(json!({"doc": "GR-2"})))
            .unwrap();

        let r1 = h.append(reverse(&p, MovementType::Out, dec!(5), &original, "correction")).unwrap();

        let r2 = h.append(reverse(&p, MovementType::Out, dec!(5), &original, "correction-2")).unwrap_err();
        assert_eq!(r2.reason(), "reverse_already_exists");
        assert!(r2.to_string().contains("reverse_of already has a reverse entry"));

        // Retrying the first reversal verbatim is a duplicate, not a second reverse.
        let retry = h.append(reverse(&p, MovementType::Out, dec!(5), &original, "correction")).unwrap();
        assert!(retry.is_duplicate());
        assert_eq!(retry.entry().id, r1.entry().id);
        assert_eq!(h.available(&p), dec!(10));
    }

    #[test]
    fn reverse_of_reverse_is_rejected() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        let original = h.append(purchase(&p, dec!(5), dec!(1))).unwrap();
        let rev = h.append(reverse(&p, MovementType::Out, dec!(5), &original, "fix")).unwrap();
        let err = h.append(reverse(&p, MovementType::In, dec!(5), &rev, "undo")).unwrap_err();
        assert_eq!(err.reason(), "reverse_of_reverse");
    }

    #[test]
    fn reverse_of_is_part_of_the_logical_key() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        h.append(purchase(&p, dec!(10), dec!(1))).unwrap();
        let original = h.append(purchase(&p, dec!(5), dec!(1)).with_source_ref(json!({"doc": "GR-2"}))).unwrap();

        let adj = entry(&p, MovementType::Out, SourceType::Adjustment, dec!(5), dec!(1))
            .with_source_ref(json!({"reason": "manual-adjust"}));
        let adj = h.append(adj).unwrap();
        let rev = h.append(reverse(&p, MovementType::Out, dec!(5), &original, "manual-adjust")).unwrap();

        assert_ne!(adj.entry().id, rev.entry().id);
        assert_eq!(rev.reason(), "inserted");
        assert_eq!(h.rows(&p), 4);
    }

    #[test]
    fn weighted_average_follows_inbound_cost_and_ignores_outbound() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        h.append(purchase(&p, dec!(10), dec!(5))).unwrap();
        let s = h.store.summary(p.tenant_id, p.id).unwrap();
        assert_eq!(s.weighted_avg_cost.to_string(), "5.0000");

        h.append(purchase(&p, dec!(5), dec!(8))).unwrap();
        let s = h.store.summary(p.tenant_id, p.id).unwrap();
        assert_eq!(s.weighted_avg_cost.to_string(), "6.0000");

        h.append(issue(&p, dec!(3), "SO-1")).unwrap();
        let s = h.store.summary(p.tenant_id, p.id).unwrap();
        assert_eq!(s.weighted_avg_cost.to_string(), "6.0000");
        assert_eq!(s.available_qty, dec!(12));
    }

    #[test]
    fn reversing_an_inbound_leaves_costing_untouched() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        h.append(purchase(&p, dec!(10), dec!(5))).unwrap();
        let production = h
            .append(entry(&p, MovementType::In, SourceType::Production, dec!(2), dec!(3)))
            .unwrap();
        let late = h.append(purchase(&p, dec!(5), dec!(8))).unwrap();
        let before = h.store.summary(p.tenant_id, p.id).unwrap();

        h.append(reverse(&p, MovementType::Out, dec!(5), &late, "wrong price")).unwrap();
        let after = h.store.summary(p.tenant_id, p.id).unwrap();

        assert_eq!(after.available_qty, before.available_qty - dec!(5));
        assert_eq!(after.weighted_avg_cost, before.weighted_avg_cost);
        assert_eq!(after.last_purchase_cost, Some(dec!(8)));
        assert_eq!(after.last_production_cost, Some(production.entry().unit_cost));
    }

    #[test]
    fn reversal_is_exempt_from_the_guard_but_not_from_the_summary_check() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        let original = h.append(purchase(&p, dec!(5), dec!(1))).unwrap();
        h.append(issue(&p, dec!(5), "SO-1")).unwrap();

        let err = h.append(reverse(&p, MovementType::Out, dec!(5), &original, "late")).unwrap_err();
        assert_eq!(err.reason(), "summary_negative");
        assert_eq!(h.rows(&p), 2);
        assert!(h.audit_store.list(None).is_empty());
    }

    #[test]
    fn rebuild_reproduces_incremental_summaries() {
        let h = setup();
        let t = TenantId::new();
        let a = h.part(t, "RM-A");
        let b = h.part(t, "RM-B");
        h.append(purchase(&a, dec!(10), dec!(5))).unwrap();
        h.append(purchase(&b, dec!(3), dec!(1.25))).unwrap();
        h.append(issue(&a, dec!(10), "SO-1")).unwrap();
        h.append(purchase(&a, dec!(4), dec!(9))).unwrap();
        let gr = h.append(purchase(&b, dec!(7), dec!(2.5))).unwrap();
        h.append(reverse(&b, MovementType::Out, dec!(7), &gr, "returned")).unwrap();
        h.append(entry(&b, MovementType::Adjustment, SourceType::Adjustment, dec!(-1), dec!(0))).unwrap();

        let before = h.store.summaries(Some(t));
        let system = TenantContext::system();
        let counts = h.admin.rebuild(&system, Some(t)).unwrap();
        assert_eq!(counts.total_parts, 2);
        assert_eq!(counts.updated, 0);

        let after = h.store.summaries(Some(t));
        assert_eq!(before.len(), after.len());
        for (x, y) in before.iter().zip(&after) {
            assert!(x.same_values(y), "{x:?} != {y:?}");
        }

        // Idempotent.
        assert_eq!(h.admin.rebuild(&system, Some(t)).unwrap().updated, 0);
    }

    #[test]
    fn aggregate_rebuild_agrees_on_inbound_only_history() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        h.append(purchase(&p, dec!(10), dec!(5))).unwrap();
        h.append(purchase(&p, dec!(5), dec!(8))).unwrap();
        let incremental = h.store.summary(p.tenant_id, p.id).unwrap();

        let audit = Arc::new(AuditEmitter::new(h.audit_store.clone()));
        let projector = StockSummaryProjector::default().with_strategy(RebuildStrategy::Aggregate);
        let admin = InventoryAdmin::new(h.store.clone(), audit, projector);
        let counts = admin.rebuild(&TenantContext::system(), None).unwrap();
        assert_eq!(counts.updated, 0);
        assert!(h.store.summary(p.tenant_id, p.id).unwrap().same_values(&incremental));
    }

    #[test]
    fn rebuild_requires_system_context_and_is_audited() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        h.append(purchase(&p, dec!(1), dec!(1))).unwrap();

        let err = h.admin.rebuild(&TenantContext::tenant(p.tenant_id), None).unwrap_err();
        assert_eq!(err.reason(), "system_context_required");

        h.admin.rebuild(&TenantContext::system(), None).unwrap();
        let rebuilt: Vec<_> = h
            .audit_store
            .list(None)
            .into_iter()
            .filter(|r| r.event_name == SUMMARY_REBUILT)
            .collect();
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt[0].payload["strategy"], json!("replay"));
        assert_eq!(rebuilt[0].payload["total_parts"], json!(1));
    }

    #[test]
    fn concurrent_overdraw_lets_exactly_one_writer_through() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        h.append(purchase(&p, dec!(5), dec!(1))).unwrap();

        let writers = 8;
        let barrier = Arc::new(Barrier::new(writers));
        let handles: Vec<_> = (0..writers)
            .map(|i| {
                let engine = h.engine.clone();
                let barrier = barrier.clone();
                let candidate = issue(&p, dec!(5), &format!("SO-{i}"));
                thread::spawn(move || {
                    barrier.wait();
                    engine.append(&TenantContext::tenant(candidate.tenant_id), candidate)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let inserted = results.iter().filter(|r| matches!(r, Ok(AppendOutcome::Inserted(_)))).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.reason() == "negative_stock"))
            .count();

        assert_eq!(inserted, 1);
        assert_eq!(rejected, writers - 1);
        assert_eq!(h.rows(&p), 2);
        assert_eq!(h.available(&p), dec!(0));
    }

    #[test]
    fn concurrent_identical_writes_resolve_to_one_row() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");

        let writers = 8;
        let barrier = Arc::new(Barrier::new(writers));
        let handles: Vec<_> = (0..writers)
            .map(|_| {
                let engine = h.engine.clone();
                let barrier = barrier.clone();
                let candidate = purchase(&p, dec!(2), dec!(3)).with_idempotency(IdempotencyScope::Workstation, "scan-77");
                thread::spawn(move || {
                    barrier.wait();
                    engine.append(&TenantContext::tenant(candidate.tenant_id), candidate)
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| !o.is_duplicate()).count(), 1);
        let id = outcomes[0].entry().id;
        assert!(outcomes.iter().all(|o| o.entry().id == id));
        assert_eq!(h.rows(&p), 1);
        assert_eq!(h.available(&p), dec!(2));
    }

    /// Holds every writer between insert and commit until all have staged.
    struct HoldBeforeCommit {
        projector: StockSummaryProjector,
        barrier: Barrier,
    }

    impl LedgerSink for HoldBeforeCommit {
        fn on_ledger_insert(&self, tx: &mut dyn LedgerTransaction, entry: &StockLedgerEntry) -> Result<(), SinkError> {
            self.projector.on_ledger_insert(tx, entry)?;
            self.barrier.wait();
            Ok(())
        }
    }

    /// Parts of one tenant whose locks sit on distinct shards.
    fn parts_on_distinct_shards(h: &Harness, n: usize) -> Vec<Part> {
        let tenant_id = TenantId::new();
        let mut shards = HashSet::new();
        let mut parts = Vec::new();
        let mut i = 0;
        while parts.len() < n {
            i += 1;
            let candidate = Part::new(
                tenant_id,
                format!("RM-{i:03}"),
                "Raw Material",
                PartType::RawMaterial,
                ProcurementStrategy::Buy,
            )
            .unwrap();
            if shards.insert(h.store.locks.shard_for(tenant_id, candidate.id)) {
                parts.push(h.catalog.add_part(candidate).unwrap());
            }
        }
        parts
    }

    #[test]
    fn idempotency_key_shared_across_parts_resolves_at_commit() {
        let h = setup();
        let writers = 4;
        let parts = parts_on_distinct_shards(&h, writers);
        let tenant_id = parts[0].tenant_id;
        let sink = Arc::new(HoldBeforeCommit {
            projector: StockSummaryProjector::default(),
            barrier: Barrier::new(writers),
        });
        let engine = Arc::new(LedgerAppendEngine::new(
            h.store.clone(),
            h.catalog.clone(),
            AuditEmitter::new(h.audit_store.clone()),
            sink,
        ));

        // Every writer stages its row before any commits, so all but one
        // collide on the idempotency index inside `commit`.
        let handles: Vec<_> = parts
            .iter()
            .map(|p| {
                let engine = engine.clone();
                let candidate = purchase(p, dec!(2), dec!(3)).with_idempotency(IdempotencyScope::Company, "gr-77");
                thread::spawn(move || engine.append(&TenantContext::tenant(tenant_id), candidate))
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
        let winners: Vec<_> = outcomes.iter().filter(|o| !o.is_duplicate()).collect();
        assert_eq!(winners.len(), 1);
        let winner = winners[0].entry().clone();
        assert!(outcomes.iter().all(|o| o.entry().id == winner.id));

        assert_eq!(h.store.entries(EntryFilter::tenant(tenant_id)).len(), 1);
        let summaries = h.store.summaries(Some(tenant_id));
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].part_id, winner.part_id);
        assert_eq!(summaries[0].available_qty, dec!(2));
    }

    /// Ledger store whose next `blind` transactions see no committed rows
    /// through the dedupe lookups, as if another writer committed between our
    /// dedupe check and our insert.
    struct LateCommitStore {
        inner: InMemoryLedgerStore,
        blind: AtomicUsize,
    }

    struct LateCommitTx<'a> {
        inner: InMemoryLedgerTx<'a>,
        blind: bool,
    }

    impl LedgerStore for LateCommitStore {
        type Tx<'a> = LateCommitTx<'a>;

        fn begin(&self) -> Self::Tx<'_> {
            let blind = self
                .blind
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            LateCommitTx {
                inner: self.inner.begin(),
                blind,
            }
        }

        fn entry_by_id(&self, id: LedgerEntryId) -> Option<StockLedgerEntry> {
            self.inner.entry_by_id(id)
        }

        fn entries(&self, filter: EntryFilter) -> Vec<StockLedgerEntry> {
            self.inner.entries(filter)
        }

        fn summary(&self, tenant_id: TenantId, part_id: PartId) -> Option<PartStockSummary> {
            self.inner.summary(tenant_id, part_id)
        }

        fn summaries(&self, tenant_id: Option<TenantId>) -> Vec<PartStockSummary> {
            self.inner.summaries(tenant_id)
        }

        fn rebuild_summaries<F, E>(&self, tenant_id: Option<TenantId>, compute: F) -> Result<RebuildCounts, E>
        where
            F: FnOnce(&[StockLedgerEntry]) -> Result<Vec<PartStockSummary>, E>,
        {
            self.inner.rebuild_summaries(tenant_id, compute)
        }
    }

    impl LedgerTransaction for LateCommitTx<'_> {
        fn lock_part(&mut self, tenant_id: TenantId, part_id: PartId) -> Result<(), StoreError> {
            self.inner.lock_part(tenant_id, part_id)
        }

        fn holds_lock(&self, tenant_id: TenantId, part_id: PartId) -> bool {
            self.inner.holds_lock(tenant_id, part_id)
        }

        fn find_by_idempotency_key(&self, key: &IdempotencyKey) -> Option<StockLedgerEntry> {
            if self.blind { None } else { self.inner.find_by_idempotency_key(key) }
        }

        fn find_by_logical_key(&self, key: &LogicalKey) -> Option<StockLedgerEntry> {
            if self.blind { None } else { self.inner.find_by_logical_key(key) }
        }

        fn find_reverse_of(&self, original: LedgerEntryId) -> Option<StockLedgerEntry> {
            if self.blind { None } else { self.inner.find_reverse_of(original) }
        }

        fn available_qty(&self, tenant_id: TenantId, part_id: PartId) -> Decimal {
            self.inner.available_qty(tenant_id, part_id)
        }

        fn insert_entry(&mut self, entry: ValidatedEntry) -> Result<StockLedgerEntry, StoreError> {
            self.inner.insert_entry(entry)
        }

        fn summary_for_update(&mut self, tenant_id: TenantId, part_id: PartId) -> Result<PartStockSummary, StoreError> {
            self.inner.summary_for_update(tenant_id, part_id)
        }

        fn save_summary(&mut self, summary: PartStockSummary) -> Result<(), StoreError> {
            self.inner.save_summary(summary)
        }

        fn commit(self) -> Result<Vec<StockLedgerEntry>, StoreError> {
            self.inner.commit()
        }
    }

    type LateEngine = LedgerAppendEngine<LateCommitStore, Arc<InMemoryCatalog>, AuditEmitter<InMemoryAuditStore>>;

    fn late_commit_setup() -> (Arc<LateCommitStore>, LateEngine, Part) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let store = Arc::new(LateCommitStore {
            inner: InMemoryLedgerStore::default(),
            blind: AtomicUsize::new(0),
        });
        let engine = LedgerAppendEngine::new(
            store.clone(),
            catalog.clone(),
            AuditEmitter::new(InMemoryAuditStore::new()),
            Arc::new(StockSummaryProjector::default()),
        );
        let part = catalog
            .add_part(Part::new(TenantId::new(), "RM-1", "Coil", PartType::RawMaterial, ProcurementStrategy::Buy).unwrap())
            .unwrap();
        (store, engine, part)
    }

    #[test]
    fn unique_violation_at_insert_returns_the_stored_row() {
        let (store, engine, p) = late_commit_setup();
        let ctx = TenantContext::tenant(p.tenant_id);
        let gr = purchase(&p, dec!(3), dec!(4)).with_idempotency(IdempotencyScope::Company, "gr-9");

        let first = engine.append(&ctx, gr.clone()).unwrap();
        store.blind.store(1, Ordering::SeqCst);
        let second = engine.append(&ctx, gr).unwrap();

        assert_eq!(store.blind.load(Ordering::SeqCst), 0);
        assert!(second.is_duplicate());
        assert_eq!(second.entry().id, first.entry().id);
        assert_eq!(store.entries(EntryFilter::part(p.tenant_id, p.id)).len(), 1);
        assert_eq!(store.summary(p.tenant_id, p.id).unwrap().available_qty, dec!(3));
    }

    #[test]
    fn reverse_index_violation_at_insert_is_a_second_reverse() {
        let (store, engine, p) = late_commit_setup();
        let ctx = TenantContext::tenant(p.tenant_id);
        engine.append(&ctx, purchase(&p, dec!(10), dec!(1))).unwrap();
        let original = engine
            .append(&ctx, purchase(&p, dec!(5), dec!(1)).with_source_ref(json!({"doc": "GR-2"})))
            .unwrap();
        engine
            .append(&ctx, reverse(&p, MovementType::Out, dec!(5), &original, "correction"))
            .unwrap();

        store.blind.store(1, Ordering::SeqCst);
        let err = engine
            .append(&ctx, reverse(&p, MovementType::Out, dec!(5), &original, "correction-2"))
            .unwrap_err();

        assert_eq!(err.reason(), "reverse_already_exists");
        assert_eq!(store.entries(EntryFilter::part(p.tenant_id, p.id)).len(), 3);
        assert_eq!(store.summary(p.tenant_id, p.id).unwrap().available_qty, dec!(10));
    }

    #[test]
    fn writes_are_confined_to_the_callers_tenant() {
        let h = setup();
        let a = h.part(TenantId::new(), "A-001");
        let b = h.part(TenantId::new(), "B-001");

        let err = h
            .engine
            .append(&TenantContext::tenant(a.tenant_id), purchase(&b, dec!(1), dec!(1)))
            .unwrap_err();
        assert_eq!(err.reason(), "tenant_scope_violation");

        let err = h
            .engine
            .append(&TenantContext::unscoped(), purchase(&a, dec!(1), dec!(1)))
            .unwrap_err();
        assert_eq!(err.reason(), "tenant_scope_violation");

        // Entry claims tenant A but points at B's part.
        let mut crossed = purchase(&b, dec!(1), dec!(1));
        crossed.tenant_id = a.tenant_id;
        assert_eq!(h.append(crossed).unwrap_err().reason(), "tenant_mismatch");

        // A system caller may write for any tenant; the audit trail keeps the tenant.
        h.engine
            .append(&TenantContext::system(), issue(&b, dec!(1), "SO-1"))
            .unwrap_err();
        assert_eq!(h.audit_store.list(Some(b.tenant_id)).len(), 1);
    }

    #[test]
    fn admin_reads_fail_closed() {
        let h = setup();
        let a = h.part(TenantId::new(), "A-001");
        let b = h.part(TenantId::new(), "B-001");
        let ea = h.append(purchase(&a, dec!(10), dec!(5)).with_source_ref(json!({"doc": "GR-1"}))).unwrap();
        h.append(purchase(&b, dec!(7), dec!(3)).with_source_ref(json!({"doc": "GR-2"}))).unwrap();

        let system = TenantContext::system();
        assert_eq!(h.admin.list_entries(&system).len(), 2);
        assert_eq!(h.admin.list_summaries(&system).len(), 2);

        let ctx_a = TenantContext::tenant(a.tenant_id);
        let mine = h.admin.list_entries(&ctx_a);
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].tenant_id, a.tenant_id);
        assert_eq!(h.admin.list_summaries(&ctx_a).len(), 1);
        assert!(h.admin.get_summary(&ctx_a, b.id).is_none());
        assert!(h.admin.get_entry(&TenantContext::tenant(b.tenant_id), ea.entry().id).is_none());
        assert_eq!(h.admin.get_entry(&system, ea.entry().id).map(|e| e.id), Some(ea.entry().id));

        let nobody = TenantContext::unscoped();
        assert!(h.admin.list_entries(&nobody).is_empty());
        assert!(h.admin.list_summaries(&nobody).is_empty());
        assert!(h.admin.get_entry(&nobody, ea.entry().id).is_none());

        let admin_events = h
            .audit_store
            .list(Some(a.tenant_id))
            .into_iter()
            .filter(|r| r.payload["action"] == json!("list"))
            .count();
        assert_eq!(admin_events, 2);
    }

    #[test]
    fn ledger_rows_cannot_be_changed_or_removed() {
        let h = setup();
        let p = h.part(TenantId::new(), "RM-001");
        let mut row = h.append(purchase(&p, dec!(1), dec!(1))).unwrap().into_entry();

        row.qty = dec!(100);
        assert_eq!(h.store.update_entry(&row).unwrap_err().reason(), "ledger_immutable");
        assert_eq!(h.store.delete_entry(row.id).unwrap_err().reason(), "ledger_immutable");
        assert_eq!(h.rows(&p), 1);
        assert_eq!(h.available(&p), dec!(1));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Receive(u32),
        Issue(u32),
        Adjust(i32),
    }

    fn ops() -> impl Strategy<Value = Vec<Op>> {
        prop::collection::vec(
            prop_oneof![
                (1u32..50).prop_map(Op::Receive),
                (1u32..50).prop_map(Op::Issue),
                (-30i32..30).prop_filter("non-zero", |q| *q != 0).prop_map(Op::Adjust),
            ],
            1..40,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Whatever sequence of non-reversal writes arrives, the projected
        /// balance never goes negative and equals the ledger sum.
        #[test]
        fn stock_never_goes_negative(ops in ops()) {
            let h = setup();
            let p = h.part(TenantId::new(), "RM-P");

            for (n, op) in ops.into_iter().enumerate() {
                let doc = json!({ "n": n });
                let candidate = match op {
                    Op::Receive(q) => purchase(&p, Decimal::from(q), dec!(2)).with_source_ref(doc),
                    Op::Issue(q) => issue(&p, Decimal::from(q), "x").with_source_ref(doc),
                    Op::Adjust(q) => entry(&p, MovementType::Adjustment, SourceType::Adjustment, Decimal::from(q), dec!(0))
                        .with_source_ref(doc),
                };
                let rows_before = h.rows(&p);
                match h.append(candidate) {
                    Ok(outcome) => prop_assert_eq!(outcome.reason(), "inserted"),
                    Err(e) => {
                        prop_assert_eq!(e.reason(), "negative_stock");
                        prop_assert_eq!(h.rows(&p), rows_before);
                    }
                }

                let ledger_sum: Decimal = h
                    .store
                    .entries(EntryFilter::part(p.tenant_id, p.id))
                    .iter()
                    .map(|e| e.signed_delta())
                    .sum();
                prop_assert!(h.available(&p) >= Decimal::ZERO);
                prop_assert_eq!(h.available(&p), ledger_sum);
            }
        }
    }
}
