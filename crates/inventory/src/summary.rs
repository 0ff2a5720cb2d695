//! Per-(tenant, part) stock summary read model.
//!
//! Disposable: derived entirely from the ledger and rebuildable at any time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use factory_core::decimal::{self, PrecisionError};
use factory_core::{Entity, PartId, TenantId};

use crate::ledger::{MovementType, SourceType, StockLedgerEntry};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("entry tenant does not match summary tenant")]
    TenantMismatch,

    #[error("entry part does not match summary part")]
    PartMismatch,

    #[error("stock summary for part {part_id} cannot go negative (current={current}, delta={delta})")]
    NegativeBalance {
        part_id: PartId,
        current: Decimal,
        delta: Decimal,
    },

    #[error("summary arithmetic: {0}")]
    Precision(#[from] PrecisionError),
}

impl ProjectionError {
    pub fn reason(&self) -> &'static str {
        match self {
            ProjectionError::TenantMismatch => "summary_tenant_mismatch",
            ProjectionError::PartMismatch => "summary_part_mismatch",
            ProjectionError::NegativeBalance { .. } => "summary_negative",
            ProjectionError::Precision(_) => "summary_precision",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartStockSummary {
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub available_qty: Decimal,
    pub weighted_avg_cost: Decimal,
    pub last_purchase_cost: Option<Decimal>,
    pub last_production_cost: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
    /// Row version, bumped by the store on every save.
    #[serde(default)]
    pub version: u64,
}

impl PartStockSummary {
    /// Zero row for a part that has no projected movements yet.
    pub fn empty(tenant_id: TenantId, part_id: PartId, at: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            part_id,
            available_qty: decimal::round_qty(Decimal::ZERO),
            weighted_avg_cost: decimal::round_cost(Decimal::ZERO),
            last_purchase_cost: None,
            last_production_cost: None,
            updated_at: at,
            version: 0,
        }
    }

    /// Fold one newly-appended ledger entry into the summary.
    ///
    /// Reversal entries only move quantity. Otherwise costing changes on
    /// positive inbound movements only. On error the summary is unchanged.
    pub fn apply_entry(&mut self, entry: &StockLedgerEntry) -> Result<(), ProjectionError> {
        if entry.tenant_id != self.tenant_id {
            return Err(ProjectionError::TenantMismatch);
        }
        if entry.part_id != self.part_id {
            return Err(ProjectionError::PartMismatch);
        }

        let old_qty = self.available_qty;
        let delta = entry.signed_delta();
        let new_qty = old_qty.checked_add(delta).ok_or(PrecisionError::Overflow)?;
        if new_qty < Decimal::ZERO {
            return Err(ProjectionError::NegativeBalance {
                part_id: self.part_id,
                current: old_qty,
                delta,
            });
        }
        let new_qty = decimal::fit_qty(decimal::round_qty(new_qty))?;

        let mut next = self.clone();
        next.available_qty = new_qty;
        next.updated_at = entry.created_at;

        if !entry.is_reversal() && entry.movement_type == MovementType::In && entry.qty > Decimal::ZERO {
            next.weighted_avg_cost =
                decimal::weighted_average(old_qty, self.weighted_avg_cost, entry.qty, entry.unit_cost, new_qty)?;
            match entry.source_type {
                SourceType::Purchase => next.last_purchase_cost = Some(entry.unit_cost),
                SourceType::Production => next.last_production_cost = Some(entry.unit_cost),
                _ => {}
            }
        }

        *self = next;
        Ok(())
    }

    /// Whether the projected values (ignoring bookkeeping fields) match.
    pub fn same_values(&self, other: &PartStockSummary) -> bool {
        self.tenant_id == other.tenant_id
            && self.part_id == other.part_id
            && self.available_qty == other.available_qty
            && self.weighted_avg_cost == other.weighted_avg_cost
            && self.last_purchase_cost == other.last_purchase_cost
            && self.last_production_cost == other.last_production_cost
    }
}

/// One row per `(tenant, part)`, so the part id identifies it within a tenant.
impl Entity for PartStockSummary {
    type Id = PartId;

    fn id(&self) -> &Self::Id {
        &self.part_id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NewLedgerEntry;
    use crate::part::{Part, PartType, ProcurementStrategy};
    use crate::validation::validate_entry;
    use factory_core::LedgerEntryId;
    use rust_decimal_macros::dec;

    struct Fixture {
        part: Part,
        seq: u64,
    }

    impl Fixture {
        fn new() -> Self {
            let part = Part::new(TenantId::new(), "RM-1", "Steel", PartType::RawMaterial, ProcurementStrategy::Buy)
                .unwrap();
            Self { part, seq: 0 }
        }

        fn entry(&mut self, mt: MovementType, st: SourceType, qty: Decimal, cost: Decimal) -> StockLedgerEntry {
            self.store(NewLedgerEntry::new(self.part.tenant_id, self.part.id, mt, st, qty, cost), None)
        }

        fn store(&mut self, c: NewLedgerEntry, original: Option<&StockLedgerEntry>) -> StockLedgerEntry {
            self.seq += 1;
            validate_entry(&c, Some(&self.part), original)
                .unwrap()
                .into_entry(LedgerEntryId::new(), self.seq, Utc::now())
        }

        fn summary(&self) -> PartStockSummary {
            PartStockSummary::empty(self.part.tenant_id, self.part.id, Utc::now())
        }
    }

    #[test]
    fn weighted_average_across_inbounds() {
        let mut f = Fixture::new();
        let mut s = f.summary();

        s.apply_entry(&f.entry(MovementType::In, SourceType::Purchase, dec!(10), dec!(5))).unwrap();
        assert_eq!(s.weighted_avg_cost, dec!(5.0000));

        s.apply_entry(&f.entry(MovementType::In, SourceType::Purchase, dec!(5), dec!(8))).unwrap();
        assert_eq!(s.available_qty, dec!(15));
        assert_eq!(s.weighted_avg_cost.to_string(), "6.0000");
        assert_eq!(s.last_purchase_cost, Some(dec!(8)));

        s.apply_entry(&f.entry(MovementType::Out, SourceType::Sales, dec!(7), dec!(99))).unwrap();
        assert_eq!(s.available_qty, dec!(8));
        assert_eq!(s.weighted_avg_cost, dec!(6));
    }

    #[test]
    fn adjustments_never_touch_costing() {
        let mut f = Fixture::new();
        let mut s = f.summary();
        s.apply_entry(&f.entry(MovementType::In, SourceType::Production, dec!(4), dec!(2.5))).unwrap();
        s.apply_entry(&f.entry(MovementType::Adjustment, SourceType::Adjustment, dec!(6), dec!(100))).unwrap();
        s.apply_entry(&f.entry(MovementType::Adjustment, SourceType::Adjustment, dec!(-1), dec!(100))).unwrap();
        assert_eq!(s.available_qty, dec!(9));
        assert_eq!(s.weighted_avg_cost, dec!(2.5));
        assert_eq!(s.last_production_cost, Some(dec!(2.5)));
        assert_eq!(s.last_purchase_cost, None);
    }

    #[test]
    fn reversal_moves_quantity_only() {
        let mut f = Fixture::new();
        let mut s = f.summary();
        let first = f.entry(MovementType::In, SourceType::Purchase, dec!(10), dec!(5));
        s.apply_entry(&first).unwrap();
        let second = f.entry(MovementType::In, SourceType::Purchase, dec!(5), dec!(8));
        s.apply_entry(&second).unwrap();

        let rev = NewLedgerEntry::new(f.part.tenant_id, f.part.id, MovementType::Out, SourceType::Adjustment, dec!(5), dec!(8))
            .reversing(second.id);
        let rev = f.store(rev, Some(&second));
        s.apply_entry(&rev).unwrap();

        assert_eq!(s.available_qty, dec!(10));
        assert_eq!(s.weighted_avg_cost, dec!(6));
        assert_eq!(s.last_purchase_cost, Some(dec!(8)));
    }

    #[test]
    fn negative_balance_is_rejected_without_mutation() {
        let mut f = Fixture::new();
        let mut s = f.summary();
        s.apply_entry(&f.entry(MovementType::In, SourceType::Purchase, dec!(1), dec!(1))).unwrap();
        let before = s.clone();

        let err = s.apply_entry(&f.entry(MovementType::Out, SourceType::Sales, dec!(2), dec!(1))).unwrap_err();
        assert_eq!(err.reason(), "summary_negative");
        assert_eq!(s, before);
    }

    #[test]
    fn draining_to_zero_then_restocking_resets_average() {
        let mut f = Fixture::new();
        let mut s = f.summary();
        s.apply_entry(&f.entry(MovementType::In, SourceType::Purchase, dec!(2), dec!(10))).unwrap();
        s.apply_entry(&f.entry(MovementType::Out, SourceType::Sales, dec!(2), dec!(10))).unwrap();
        s.apply_entry(&f.entry(MovementType::In, SourceType::Purchase, dec!(3), dec!(4))).unwrap();
        assert_eq!(s.weighted_avg_cost, dec!(4));
    }

    #[test]
    fn foreign_entries_are_rejected() {
        let mut f = Fixture::new();
        let e = f.entry(MovementType::In, SourceType::Purchase, dec!(1), dec!(1));
        let mut other = PartStockSummary::empty(TenantId::new(), f.part.id, Utc::now());
        assert_eq!(other.apply_entry(&e), Err(ProjectionError::TenantMismatch));

        let mut other = PartStockSummary::empty(f.part.tenant_id, PartId::new(), Utc::now());
        assert_eq!(other.apply_entry(&e), Err(ProjectionError::PartMismatch));
    }
}
