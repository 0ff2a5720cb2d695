//! `factory-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! typed identifiers, the domain error model, tenant context, optimistic
//! version checks and fixed-point decimal rules shared by every other crate.

pub mod context;
pub mod decimal;
pub mod entity;
pub mod error;
pub mod id;
pub mod version;

pub use context::TenantContext;
pub use decimal::PrecisionError;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AuditEventId, BomId, BomItemId, LedgerEntryId, PartId, TenantId, UserId};
pub use version::ExpectedVersion;
