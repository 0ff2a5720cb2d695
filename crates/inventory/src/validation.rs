//! Ledger entry validator.
//!
//! Structural and business-rule checks on a single candidate entry, run before
//! any persistence attempt. The output is a [`ValidatedEntry`] carrying
//! canonical decimals and the derived transaction value.

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;

use factory_core::decimal::{self, PrecisionError};
use factory_core::{LedgerEntryId, PartId, TenantId};

use crate::ledger::{
    IDEMPOTENCY_KEY_MAX_LEN, IdempotencyKey, IdempotencyScope, LogicalKey, MovementType, NewLedgerEntry,
    SourceType, StockLedgerEntry, idempotency_key, logical_key, signed_delta,
};
use crate::part::Part;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerValidationError {
    #[error("part is required")]
    PartNotFound(PartId),

    #[error("tenant mismatch between stock ledger entry and part")]
    TenantMismatch,

    #[error("qty is required")]
    QtyRequired,

    #[error("unit_cost is required")]
    UnitCostRequired,

    #[error("qty: {0}")]
    QtyPrecision(PrecisionError),

    #[error("unit_cost: {0}")]
    UnitCostPrecision(PrecisionError),

    #[error("reference_price: {0}")]
    ReferencePricePrecision(PrecisionError),

    #[error("transaction_value: {0}")]
    TransactionValue(PrecisionError),

    #[error("unit_cost cannot be negative")]
    NegativeUnitCost,

    #[error("reference_price cannot be negative")]
    NegativeReferencePrice,

    #[error("qty must be > 0 for movement_type={0}")]
    NonPositiveQty(MovementType),

    #[error("qty must be non-zero for adjustment")]
    ZeroAdjustment,

    #[error("idempotency_scope is required when idempotency_key is provided")]
    IdempotencyScopeRequired,

    #[error("idempotency_key longer than {IDEMPOTENCY_KEY_MAX_LEN} characters")]
    IdempotencyKeyTooLong,

    #[error("reverse_of target {0} does not exist")]
    ReverseTargetNotFound(LedgerEntryId),

    #[error("tenant mismatch between reverse entry and reverse_of target")]
    ReverseTenantMismatch,

    #[error("reverse entry must target the same part as the original")]
    ReversePartMismatch,

    #[error("reverse-of-reverse is forbidden")]
    ReverseOfReverse,

    #[error("reverse entries must use source_type=adjustment")]
    ReverseSourceType,

    #[error("reverse entry must be movement_type={expected_movement} qty={expected_qty}")]
    ReverseMismatch {
        expected_movement: MovementType,
        expected_qty: Decimal,
    },

    #[error("reverse_of already has a reverse entry")]
    ReverseAlreadyExists(LedgerEntryId),
}

impl LedgerValidationError {
    /// Stable machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            LedgerValidationError::PartNotFound(_) => "part_not_found",
            LedgerValidationError::TenantMismatch => "tenant_mismatch",
            LedgerValidationError::QtyRequired => "qty_required",
            LedgerValidationError::UnitCostRequired => "unit_cost_required",
            LedgerValidationError::QtyPrecision(_) => "qty_precision_exceeded",
            LedgerValidationError::UnitCostPrecision(_) => "unit_cost_precision_exceeded",
            LedgerValidationError::ReferencePricePrecision(_) => "reference_price_precision_exceeded",
            LedgerValidationError::TransactionValue(_) => "transaction_value_overflow",
            LedgerValidationError::NegativeUnitCost => "negative_unit_cost",
            LedgerValidationError::NegativeReferencePrice => "negative_reference_price",
            LedgerValidationError::NonPositiveQty(_) => "qty_must_be_positive",
            LedgerValidationError::ZeroAdjustment => "adjustment_qty_zero",
            LedgerValidationError::IdempotencyScopeRequired => "idempotency_scope_required",
            LedgerValidationError::IdempotencyKeyTooLong => "idempotency_key_too_long",
            LedgerValidationError::ReverseTargetNotFound(_) => "reverse_target_not_found",
            LedgerValidationError::ReverseTenantMismatch => "reverse_tenant_mismatch",
            LedgerValidationError::ReversePartMismatch => "reverse_part_mismatch",
            LedgerValidationError::ReverseOfReverse => "reverse_of_reverse",
            LedgerValidationError::ReverseSourceType => "reverse_source_type",
            LedgerValidationError::ReverseMismatch { .. } => "reverse_mismatch",
            LedgerValidationError::ReverseAlreadyExists(_) => "reverse_already_exists",
        }
    }
}

/// A candidate that passed [`validate_entry`]; ready for dedupe and insert.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEntry {
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub movement_type: MovementType,
    pub source_type: SourceType,
    pub qty: Decimal,
    pub unit_cost: Decimal,
    pub transaction_value: Decimal,
    pub reference_price: Option<Decimal>,
    pub source_ref: JsonValue,
    pub reverse_of: Option<LedgerEntryId>,
    pub idempotency_key: Option<String>,
    pub idempotency_scope: Option<IdempotencyScope>,
}

impl ValidatedEntry {
    pub fn signed_delta(&self) -> Decimal {
        signed_delta(self.movement_type, self.qty)
    }

    pub fn is_reversal(&self) -> bool {
        self.reverse_of.is_some()
    }

    pub fn logical_key(&self) -> LogicalKey {
        logical_key(
            self.tenant_id,
            self.part_id,
            self.movement_type,
            self.source_type,
            self.qty,
            self.unit_cost,
            self.reference_price,
            &self.source_ref,
            self.reverse_of,
        )
    }

    pub fn idempotency(&self) -> Option<IdempotencyKey> {
        idempotency_key(self.tenant_id, self.idempotency_scope, self.idempotency_key.as_deref())
    }

    /// Materialize the row the store will persist.
    pub fn into_entry(
        self,
        id: LedgerEntryId,
        sequence: u64,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> StockLedgerEntry {
        StockLedgerEntry {
            id,
            tenant_id: self.tenant_id,
            part_id: self.part_id,
            movement_type: self.movement_type,
            source_type: self.source_type,
            qty: self.qty,
            unit_cost: self.unit_cost,
            transaction_value: self.transaction_value,
            reference_price: self.reference_price,
            source_ref: self.source_ref,
            reverse_of: self.reverse_of,
            idempotency_key: self.idempotency_key,
            idempotency_scope: self.idempotency_scope,
            sequence,
            created_at,
        }
    }
}

/// Validate a candidate entry.
///
/// `part` is the catalog lookup for `candidate.part_id` (any tenant; tenant
/// equality is checked here). `reverse_target` is the lookup for
/// `candidate.reverse_of` and is ignored when that is unset.
///
/// The at-most-one-reverse rule is *not* checked here: it needs the per-part
/// lock and runs inside the append transaction.
pub fn validate_entry(
    candidate: &NewLedgerEntry,
    part: Option<&Part>,
    reverse_target: Option<&StockLedgerEntry>,
) -> Result<ValidatedEntry, LedgerValidationError> {
    let part = part.ok_or(LedgerValidationError::PartNotFound(candidate.part_id))?;
    if part.tenant_id != candidate.tenant_id || part.id != candidate.part_id {
        return Err(LedgerValidationError::TenantMismatch);
    }

    let qty = candidate.qty.ok_or(LedgerValidationError::QtyRequired)?;
    let unit_cost = candidate.unit_cost.ok_or(LedgerValidationError::UnitCostRequired)?;

    let qty = decimal::fit_qty(qty).map_err(LedgerValidationError::QtyPrecision)?;
    let unit_cost = decimal::fit_cost(unit_cost).map_err(LedgerValidationError::UnitCostPrecision)?;
    if unit_cost < Decimal::ZERO {
        return Err(LedgerValidationError::NegativeUnitCost);
    }

    let reference_price = match candidate.reference_price {
        Some(price) => {
            let price = decimal::fit_cost(price).map_err(LedgerValidationError::ReferencePricePrecision)?;
            if price < Decimal::ZERO {
                return Err(LedgerValidationError::NegativeReferencePrice);
            }
            Some(price)
        }
        None => None,
    };

    match candidate.movement_type {
        MovementType::In | MovementType::Out if qty <= Decimal::ZERO => {
            return Err(LedgerValidationError::NonPositiveQty(candidate.movement_type));
        }
        MovementType::Adjustment if qty.is_zero() => return Err(LedgerValidationError::ZeroAdjustment),
        _ => {}
    }

    let key = candidate.effective_idempotency_key();
    if let Some(key) = key {
        if candidate.idempotency_scope.is_none() {
            return Err(LedgerValidationError::IdempotencyScopeRequired);
        }
        if key.chars().count() > IDEMPOTENCY_KEY_MAX_LEN {
            return Err(LedgerValidationError::IdempotencyKeyTooLong);
        }
    }

    if let Some(original_id) = candidate.reverse_of {
        let original = reverse_target
            .filter(|o| o.id == original_id)
            .ok_or(LedgerValidationError::ReverseTargetNotFound(original_id))?;
        check_reversal(candidate.tenant_id, candidate, qty, original)?;
    }

    let transaction_value =
        decimal::transaction_value(qty, unit_cost).map_err(LedgerValidationError::TransactionValue)?;

    Ok(ValidatedEntry {
        tenant_id: candidate.tenant_id,
        part_id: candidate.part_id,
        movement_type: candidate.movement_type,
        source_type: candidate.source_type,
        qty,
        unit_cost,
        transaction_value,
        reference_price,
        source_ref: candidate.source_ref.clone(),
        reverse_of: candidate.reverse_of,
        idempotency_key: key.map(str::to_string),
        idempotency_scope: key.and(candidate.idempotency_scope),
    })
}

fn check_reversal(
    tenant_id: TenantId,
    candidate: &NewLedgerEntry,
    qty: Decimal,
    original: &StockLedgerEntry,
) -> Result<(), LedgerValidationError> {
    if original.tenant_id != tenant_id {
        return Err(LedgerValidationError::ReverseTenantMismatch);
    }
    if original.is_reversal() {
        return Err(LedgerValidationError::ReverseOfReverse);
    }
    if candidate.source_type != SourceType::Adjustment {
        return Err(LedgerValidationError::ReverseSourceType);
    }
    if original.part_id != candidate.part_id {
        return Err(LedgerValidationError::ReversePartMismatch);
    }

    let (expected_movement, expected_qty) = match original.movement_type {
        MovementType::In => (MovementType::Out, original.qty),
        MovementType::Out => (MovementType::In, original.qty),
        MovementType::Adjustment => (MovementType::Adjustment, -original.qty),
    };
    if candidate.movement_type != expected_movement || qty != expected_qty {
        return Err(LedgerValidationError::ReverseMismatch {
            expected_movement,
            expected_qty,
        });
    }
    Ok(())
}
