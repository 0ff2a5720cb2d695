//! Inventory domain: parts, bills of materials, and the stock ledger.
//!
//! Pure, deterministic business rules (no IO, no locking, no storage). The
//! infra crate supplies persistence and orchestration around these types.

pub mod bom;
pub mod bom_graph;
pub mod ledger;
pub mod part;
pub mod rebuild;
pub mod summary;
pub mod validation;

pub use bom::{Bom, BomError, BomItem};
pub use bom_graph::{BomEdge, BomGraph, MAX_BOM_DEPTH};
pub use ledger::{
    IdempotencyKey, IdempotencyScope, LogicalKey, MovementType, NULL_REFERENCE_PRICE, NewLedgerEntry, SourceType,
    StockLedgerEntry,
};
pub use part::{Part, PartType, ProcurementStrategy};
pub use rebuild::{CostPolicy, RebuildStrategy, rebuild_summaries};
pub use summary::{PartStockSummary, ProjectionError};
pub use validation::{LedgerValidationError, ValidatedEntry, validate_entry};
