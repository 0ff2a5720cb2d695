//! Stock ledger entry types.
//!
//! The ledger is append-only: a [`StockLedgerEntry`] is created once and never
//! mutated or removed. Corrections are new rows linked through `reverse_of`.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use factory_core::{DomainError, Entity, LedgerEntryId, PartId, TenantId};

/// Stored in place of a NULL reference price inside the logical key.
///
/// Prices are never negative, so the sentinel cannot collide with real data.
pub const NULL_REFERENCE_PRICE: Decimal = Decimal::from_parts(10000, 0, 0, true, 4);

pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 128;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Adjustment => "adjustment",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Purchase,
    Production,
    Sales,
    Adjustment,
    SubcontractingSend,
    SubcontractingReceive,
}

impl SourceType {
    pub const ALL: [SourceType; 6] = [
        SourceType::Purchase,
        SourceType::Production,
        SourceType::Sales,
        SourceType::Adjustment,
        SourceType::SubcontractingSend,
        SourceType::SubcontractingReceive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Purchase => "purchase",
            SourceType::Production => "production",
            SourceType::Sales => "sales",
            SourceType::Adjustment => "adjustment",
            SourceType::SubcontractingSend => "subcontracting_send",
            SourceType::SubcontractingReceive => "subcontracting_receive",
        }
    }
}

impl FromStr for SourceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| DomainError::validation(format!("unknown source_type '{s}'")))
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level of the organisational scope an idempotency key was minted in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyScope {
    System,
    Company,
    Facility,
    Section,
    Workstation,
}

impl IdempotencyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyScope::System => "SYSTEM",
            IdempotencyScope::Company => "COMPANY",
            IdempotencyScope::Facility => "FACILITY",
            IdempotencyScope::Section => "SECTION",
            IdempotencyScope::Workstation => "WORKSTATION",
        }
    }
}

/// Explicit idempotency identity: (tenant, scope, key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub tenant_id: TenantId,
    pub scope: IdempotencyScope,
    pub key: String,
}

/// Fallback idempotency identity derived from the business fields of an entry.
///
/// Decimals are held at their canonical column scale and `source_ref` in
/// canonical (sorted-key) JSON text, so equal entries produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalKey {
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub movement_type: MovementType,
    pub source_type: SourceType,
    pub qty: Decimal,
    pub unit_cost: Decimal,
    pub reference_price: Decimal,
    pub source_ref: String,
    pub reverse_of: Option<LedgerEntryId>,
}

/// Candidate ledger write as received from a caller.
///
/// Nothing here has been checked yet; see [`crate::validate_entry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub movement_type: MovementType,
    pub source_type: SourceType,
    pub qty: Option<Decimal>,
    pub unit_cost: Option<Decimal>,
    #[serde(default)]
    pub reference_price: Option<Decimal>,
    #[serde(default = "empty_source_ref")]
    pub source_ref: JsonValue,
    #[serde(default)]
    pub reverse_of: Option<LedgerEntryId>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub idempotency_scope: Option<IdempotencyScope>,
}

fn empty_source_ref() -> JsonValue {
    JsonValue::Object(Default::default())
}

impl NewLedgerEntry {
    pub fn new(
        tenant_id: TenantId,
        part_id: PartId,
        movement_type: MovementType,
        source_type: SourceType,
        qty: Decimal,
        unit_cost: Decimal,
    ) -> Self {
        Self {
            tenant_id,
            part_id,
            movement_type,
            source_type,
            qty: Some(qty),
            unit_cost: Some(unit_cost),
            reference_price: None,
            source_ref: empty_source_ref(),
            reverse_of: None,
            idempotency_key: None,
            idempotency_scope: None,
        }
    }

    pub fn with_source_ref(mut self, source_ref: JsonValue) -> Self {
        self.source_ref = source_ref;
        self
    }

    pub fn with_reference_price(mut self, price: Decimal) -> Self {
        self.reference_price = Some(price);
        self
    }

    pub fn reversing(mut self, original: LedgerEntryId) -> Self {
        self.reverse_of = Some(original);
        self
    }

    pub fn with_idempotency(mut self, scope: IdempotencyScope, key: impl Into<String>) -> Self {
        self.idempotency_scope = Some(scope);
        self.idempotency_key = Some(key.into());
        self
    }

    /// Idempotency key if one was supplied (empty keys count as absent).
    pub fn effective_idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Persisted ledger row. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLedgerEntry {
    pub id: LedgerEntryId,
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
    /// Store-assigned, strictly increasing insertion position.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl StockLedgerEntry {
    /// Effect of this entry on available quantity.
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

    /// Timestamp order used for replay.
    pub fn replay_order(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.sequence)
    }
}

impl Entity for StockLedgerEntry {
    type Id = LedgerEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

pub fn signed_delta(movement_type: MovementType, qty: Decimal) -> Decimal {
    match movement_type {
        MovementType::In => qty,
        MovementType::Out => -qty,
        MovementType::Adjustment => qty,
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn logical_key(
    tenant_id: TenantId,
    part_id: PartId,
    movement_type: MovementType,
    source_type: SourceType,
    qty: Decimal,
    unit_cost: Decimal,
    reference_price: Option<Decimal>,
    source_ref: &JsonValue,
    reverse_of: Option<LedgerEntryId>,
) -> LogicalKey {
    LogicalKey {
        tenant_id,
        part_id,
        movement_type,
        source_type,
        qty: canonical(qty, factory_core::decimal::QTY_SCALE),
        unit_cost: canonical(unit_cost, factory_core::decimal::COST_SCALE),
        reference_price: canonical(
            reference_price.unwrap_or(NULL_REFERENCE_PRICE),
            factory_core::decimal::COST_SCALE,
        ),
        source_ref: source_ref.to_string(),
        reverse_of,
    }
}

pub(crate) fn idempotency_key(
    tenant_id: TenantId,
    scope: Option<IdempotencyScope>,
    key: Option<&str>,
) -> Option<IdempotencyKey> {
    match (scope, key) {
        (Some(scope), Some(key)) if !key.is_empty() => Some(IdempotencyKey {
            tenant_id,
            scope,
            key: key.to_string(),
        }),
        _ => None,
    }
}

fn canonical(mut value: Decimal, scale: u32) -> Decimal {
    value.rescale(scale);
    value
}
