//! Ledger-time negative-stock guard.

use rust_decimal::Decimal;
use serde_json::{Value as JsonValue, json};

use factory_audit::AuditPayload;
use factory_core::{LedgerEntryId, PartId, TenantId};
use factory_inventory::{IdempotencyScope, MovementType, SourceType, ValidatedEntry};

use crate::store::{LedgerTransaction, StoreError};

/// A write that would have driven available stock below zero.
#[derive(Debug, Clone, PartialEq)]
pub struct NegativeStockViolation {
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub movement_type: MovementType,
    pub source_type: SourceType,
    pub qty: Decimal,
    pub delta_qty: Decimal,
    pub current_available_qty: Decimal,
    pub projected_available_qty: Decimal,
    pub unit_cost: Decimal,
    pub reference_price: Option<Decimal>,
    pub source_ref: JsonValue,
    pub reverse_of: Option<LedgerEntryId>,
    pub idempotency_key: Option<String>,
    pub idempotency_scope: Option<IdempotencyScope>,
}

impl NegativeStockViolation {
    /// Payload for the `inventory.negative_stock.blocked` audit event.
    pub fn audit_payload(&self) -> AuditPayload {
        let value = json!({
            "part_id": self.part_id,
            "movement_type": self.movement_type,
            "source_type": self.source_type,
            "qty": self.qty,
            "delta_qty": self.delta_qty,
            "current_available_qty": self.current_available_qty,
            "projected_available_qty": self.projected_available_qty,
            "unit_cost": self.unit_cost,
            "reference_price": self.reference_price,
            "source_ref": self.source_ref,
            "reverse_of": self.reverse_of,
            "idempotency_key": self.idempotency_key,
            "idempotency_scope": self.idempotency_scope,
        });
        match value {
            JsonValue::Object(map) => map,
            _ => AuditPayload::new(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NegativeStockGuard;

impl NegativeStockGuard {
    pub fn new() -> Self {
        Self
    }

    /// Negative deltas are checked; reversals are exempt.
    pub fn applies_to(&self, entry: &ValidatedEntry) -> bool {
        !entry.is_reversal() && entry.signed_delta() < Decimal::ZERO
    }

    /// Check `entry` against the current balance. The part lock must be held
    /// so the balance cannot move between this read and the insert.
    pub fn check<T>(&self, tx: &T, entry: &ValidatedEntry) -> Result<Result<(), NegativeStockViolation>, StoreError>
    where
        T: LedgerTransaction + ?Sized,
    {
        if !self.applies_to(entry) {
            return Ok(Ok(()));
        }
        if !tx.holds_lock(entry.tenant_id, entry.part_id) {
            return Err(StoreError::LockNotHeld {
                tenant_id: entry.tenant_id,
                part_id: entry.part_id,
            });
        }

        let current = tx.available_qty(entry.tenant_id, entry.part_id);
        let delta = entry.signed_delta();
        let projected = current + delta;
        if projected >= Decimal::ZERO {
            return Ok(Ok(()));
        }

        Ok(Err(NegativeStockViolation {
            tenant_id: entry.tenant_id,
            part_id: entry.part_id,
            movement_type: entry.movement_type,
            source_type: entry.source_type,
            qty: entry.qty,
            delta_qty: delta,
            current_available_qty: current,
            projected_available_qty: projected,
            unit_cost: entry.unit_cost,
            reference_price: entry.reference_price,
            source_ref: entry.source_ref.clone(),
            reverse_of: entry.reverse_of,
            idempotency_key: entry.idempotency_key.clone(),
            idempotency_scope: entry.idempotency_scope,
        }))
    }
}
