//! Bill of materials: revisioned headers and parent → component edges.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use factory_core::decimal::fit_qty;
use factory_core::{BomId, BomItemId, Entity, PartId, TenantId};

use crate::part::{Part, PartType};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BomError {
    #[error("BOM parent must be finished_good or semi_finished")]
    InvalidParentType,

    #[error("BOM component cannot be finished_good or fixed_asset")]
    InvalidComponentType,

    #[error("indirect consumables must not be BOM components")]
    IndirectConsumable,

    #[error("tenant mismatch: {0}")]
    TenantMismatch(&'static str),

    #[error("qty_per must be positive with at most 6 decimal places")]
    InvalidQtyPer,

    #[error("part not found: {0}")]
    PartNotFound(PartId),

    #[error("BOM not found: {0}")]
    BomNotFound(BomId),

    #[error("revision {revision_index} already exists for parent {parent_part_id}")]
    DuplicateRevision { parent_part_id: PartId, revision_index: u32 },

    #[error("component {0} already present in BOM")]
    DuplicateComponent(PartId),

    #[error("circular BOM detected at part {0}")]
    CycleDetected(PartId),

    #[error("BOM max depth exceeded (>{max_depth}, found {depth})")]
    MaxDepthExceeded { max_depth: usize, depth: usize },
}

impl BomError {
    pub fn reason(&self) -> &'static str {
        match self {
            BomError::InvalidParentType => "bom_parent_type",
            BomError::InvalidComponentType => "bom_component_type",
            BomError::IndirectConsumable => "bom_indirect_consumable",
            BomError::TenantMismatch(_) => "bom_tenant_mismatch",
            BomError::InvalidQtyPer => "bom_qty_per",
            BomError::PartNotFound(_) => "part_not_found",
            BomError::BomNotFound(_) => "bom_not_found",
            BomError::DuplicateRevision { .. } => "bom_revision_taken",
            BomError::DuplicateComponent(_) => "bom_component_taken",
            BomError::CycleDetected(_) => "bom_cycle_detected",
            BomError::MaxDepthExceeded { .. } => "bom_max_depth_exceeded",
        }
    }
}

/// BOM header: one structure per (tenant, parent part, revision).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bom {
    pub id: BomId,
    pub tenant_id: TenantId,
    pub parent_part_id: PartId,
    pub revision_index: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Bom {
    pub fn new(tenant_id: TenantId, parent: &Part, revision_index: u32) -> Result<Self, BomError> {
        if !matches!(parent.part_type, PartType::FinishedGood | PartType::SemiFinished) {
            return Err(BomError::InvalidParentType);
        }
        if parent.tenant_id != tenant_id {
            return Err(BomError::TenantMismatch("BOM and parent part"));
        }
        Ok(Self {
            id: BomId::new(),
            tenant_id,
            parent_part_id: parent.id,
            revision_index,
            is_active: true,
            created_at: Utc::now(),
        })
    }
}

/// One parent → component edge of a BOM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BomItem {
    pub id: BomItemId,
    pub tenant_id: TenantId,
    pub bom_id: BomId,
    pub component_part_id: PartId,
    pub qty_per: Decimal,
    pub is_direct: bool,
    pub created_at: DateTime<Utc>,
}

impl BomItem {
    pub fn new(bom: &Bom, component: &Part, qty_per: Decimal, is_direct: bool) -> Result<Self, BomError> {
        match component.part_type {
            PartType::FinishedGood | PartType::FixedAsset => return Err(BomError::InvalidComponentType),
            PartType::Consumable if !is_direct => return Err(BomError::IndirectConsumable),
            _ => {}
        }
        if component.tenant_id != bom.tenant_id {
            return Err(BomError::TenantMismatch("BOM item and component part"));
        }
        let qty_per = fit_qty(qty_per).map_err(|_| BomError::InvalidQtyPer)?;
        if qty_per <= Decimal::ZERO {
            return Err(BomError::InvalidQtyPer);
        }

        Ok(Self {
            id: BomItemId::new(),
            tenant_id: bom.tenant_id,
            bom_id: bom.id,
            component_part_id: component.id,
            qty_per,
            is_direct,
            created_at: Utc::now(),
        })
    }
}

impl Entity for Bom {
    type Id = BomId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
