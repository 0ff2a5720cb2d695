//! Duplicate-write detection.
//!
//! Two keying schemes, tried in order: the explicit `(tenant, scope, key)`
//! idempotency key, then the logical key derived from the entry's business
//! fields (including `reverse_of`).

use factory_inventory::{StockLedgerEntry, ValidatedEntry};

use crate::store::LedgerTransaction;

/// Which key matched an existing row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DuplicateMatch {
    IdempotencyKey,
    LogicalKey,
}

impl DuplicateMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateMatch::IdempotencyKey => "idempotency_key",
            DuplicateMatch::LogicalKey => "logical_key",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdempotencyResolver;

impl IdempotencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// The existing row `entry` duplicates, if any.
    pub fn resolve<T>(&self, tx: &T, entry: &ValidatedEntry) -> Option<(StockLedgerEntry, DuplicateMatch)>
    where
        T: LedgerTransaction + ?Sized,
    {
        if let Some(key) = entry.idempotency() {
            if let Some(existing) = tx.find_by_idempotency_key(&key) {
                return Some((existing, DuplicateMatch::IdempotencyKey));
            }
        }
        tx.find_by_logical_key(&entry.logical_key())
            .map(|existing| (existing, DuplicateMatch::LogicalKey))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryLedgerStore, LedgerStore};
    use factory_core::TenantId;
    use factory_inventory::{
        IdempotencyScope, MovementType, NewLedgerEntry, Part, PartType, ProcurementStrategy, SourceType,
        validate_entry,
    };
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn seeded() -> (InMemoryLedgerStore, Part, StockLedgerEntry) {
        let store = InMemoryLedgerStore::default();
        let part = Part::new(TenantId::new(), "RM-1", "Copper", PartType::RawMaterial, ProcurementStrategy::Buy).unwrap();
        let c = NewLedgerEntry::new(part.tenant_id, part.id, MovementType::In, SourceType::Purchase, dec!(3), dec!(2))
            .with_source_ref(json!({"grn": "GRN-1", "line": 1}))
            .with_idempotency(IdempotencyScope::Facility, "grn-1/1");
        let mut tx = store.begin();
        tx.lock_part(part.tenant_id, part.id).unwrap();
        let row = tx.insert_entry(validate_entry(&c, Some(&part), None).unwrap()).unwrap();
        tx.commit().unwrap();
        (store, part, row)
    }

    #[test]
    fn explicit_key_wins_even_if_fields_differ() {
        let (store, part, row) = seeded();
        let retry = NewLedgerEntry::new(part.tenant_id, part.id, MovementType::In, SourceType::Purchase, dec!(4), dec!(2))
            .with_idempotency(IdempotencyScope::Facility, "grn-1/1");
        let v = validate_entry(&retry, Some(&part), None).unwrap();

        let (found, matched) = IdempotencyResolver::new().resolve(&store.begin(), &v).unwrap();
        assert_eq!(found.id, row.id);
        assert_eq!(matched, DuplicateMatch::IdempotencyKey);
    }

    #[test]
    fn logical_key_ignores_source_ref_key_order_and_scale() {
        let (store, part, row) = seeded();
        let retry = NewLedgerEntry::new(part.tenant_id, part.id, MovementType::In, SourceType::Purchase, dec!(3.000), dec!(2.0))
            .with_source_ref(json!({"line": 1, "grn": "GRN-1"}));
        let v = validate_entry(&retry, Some(&part), None).unwrap();

        let (found, matched) = IdempotencyResolver::new().resolve(&store.begin(), &v).unwrap();
        assert_eq!(found.id, row.id);
        assert_eq!(matched, DuplicateMatch::LogicalKey);
    }

    #[test]
    fn different_scope_is_a_different_key() {
        let (store, part, _) = seeded();
        let other = NewLedgerEntry::new(part.tenant_id, part.id, MovementType::In, SourceType::Purchase, dec!(9), dec!(2))
            .with_idempotency(IdempotencyScope::Section, "grn-1/1");
        let v = validate_entry(&other, Some(&part), None).unwrap();
        assert!(IdempotencyResolver::new().resolve(&store.begin(), &v).is_none());
    }
}
