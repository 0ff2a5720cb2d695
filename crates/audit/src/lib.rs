//! Audit trail collaborator.
//!
//! Business code only ever sees [`AuditSink::emit`]. Everything behind it
//! (registry lookup, guard chain, append-only storage) is owned by this crate,
//! and the store can only be written with an [`AuditWriteCapability`] that the
//! emitter alone holds.

pub mod emitter;
pub mod error;
pub mod guards;
pub mod record;
pub mod registry;
pub mod store;

pub use emitter::{AuditEmitter, AuditSink, emit_best_effort};
pub use error::AuditError;
pub use record::{AuditPayload, AuditRecord};
pub use registry::{AuditEventSpec, INVENTORY_ADMIN, MAX_PAYLOAD_BYTES, NEGATIVE_STOCK_BLOCKED, SUMMARY_REBUILT};
pub use store::{AuditStore, AuditWriteCapability, InMemoryAuditStore};
