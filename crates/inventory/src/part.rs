use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use factory_core::decimal::fit_cost;
use factory_core::{DomainError, DomainResult, Entity, PartId, TenantId};

pub const PART_NO_MAX_LEN: usize = 64;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartType {
    FinishedGood,
    SemiFinished,
    RawMaterial,
    Consumable,
    FixedAsset,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcurementStrategy {
    Make,
    Buy,
}

/// Catalog part (tenant-scoped, unique part number per tenant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,
    pub tenant_id: TenantId,
    pub part_no: String,
    pub name: String,
    pub part_type: PartType,
    pub procurement_strategy: ProcurementStrategy,
    pub is_saleable: bool,
    pub standard_cost: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl Part {
    pub fn new(
        tenant_id: TenantId,
        part_no: impl Into<String>,
        name: impl Into<String>,
        part_type: PartType,
        procurement_strategy: ProcurementStrategy,
    ) -> DomainResult<Self> {
        let part_no = part_no.into().trim().to_string();
        let name = name.into();

        if part_no.is_empty() {
            return Err(DomainError::validation("part_no cannot be empty"));
        }
        if part_no.chars().count() > PART_NO_MAX_LEN {
            return Err(DomainError::validation(format!(
                "part_no longer than {PART_NO_MAX_LEN} characters"
            )));
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        check_strategy(part_type, procurement_strategy)?;

        Ok(Self {
            id: PartId::new(),
            tenant_id,
            part_no,
            name,
            part_type,
            procurement_strategy,
            is_saleable: false,
            standard_cost: None,
            created_at: Utc::now(),
        })
    }

    pub fn saleable(mut self) -> Self {
        self.is_saleable = true;
        self
    }

    pub fn with_standard_cost(mut self, cost: Decimal) -> DomainResult<Self> {
        let cost = fit_cost(cost).map_err(|e| DomainError::validation(format!("standard_cost: {e}")))?;
        if cost.is_sign_negative() {
            return Err(DomainError::validation("standard_cost cannot be negative"));
        }
        self.standard_cost = Some(cost);
        Ok(self)
    }
}

fn check_strategy(part_type: PartType, strategy: ProcurementStrategy) -> DomainResult<()> {
    match (part_type, strategy) {
        (PartType::FinishedGood, ProcurementStrategy::Make) => Ok(()),
        (PartType::FinishedGood, _) => Err(DomainError::invariant("finished_good must be make")),
        (PartType::RawMaterial | PartType::Consumable | PartType::FixedAsset, ProcurementStrategy::Buy) => Ok(()),
        (PartType::RawMaterial | PartType::Consumable | PartType::FixedAsset, _) => Err(
            DomainError::invariant("raw_material/consumable/fixed_asset must be buy"),
        ),
        (PartType::SemiFinished, _) => Ok(()),
    }
}

impl Entity for Part {
    type Id = PartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
