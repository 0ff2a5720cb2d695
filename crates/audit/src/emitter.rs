use chrono::Utc;

use factory_core::{AuditEventId, TenantContext};

use crate::error::AuditError;
use crate::guards::run_guards;
use crate::record::{AuditPayload, AuditRecord};
use crate::store::{AuditStore, AuditWriteCapability};

/// The audit collaborator as seen by business code.
pub trait AuditSink: Send + Sync {
    fn emit(
        &self,
        event_name: &str,
        payload: AuditPayload,
        context: &TenantContext,
    ) -> Result<AuditRecord, AuditError>;
}

impl<A> AuditSink for std::sync::Arc<A>
where
    A: AuditSink + ?Sized,
{
    fn emit(
        &self,
        event_name: &str,
        payload: AuditPayload,
        context: &TenantContext,
    ) -> Result<AuditRecord, AuditError> {
        (**self).emit(event_name, payload, context)
    }
}

/// Guarded audit writer; sole holder of the store's write capability.
#[derive(Debug)]
pub struct AuditEmitter<S> {
    store: S,
    capability: AuditWriteCapability,
}

impl<S: AuditStore> AuditEmitter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            capability: AuditWriteCapability::issue(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: AuditStore> AuditSink for AuditEmitter<S> {
    fn emit(
        &self,
        event_name: &str,
        payload: AuditPayload,
        context: &TenantContext,
    ) -> Result<AuditRecord, AuditError> {
        let spec = run_guards(event_name, &payload, context)?;

        let record = AuditRecord {
            id: AuditEventId::new(),
            event_name: spec.name.to_string(),
            tenant_id: context.tenant_id(),
            actor_id: context.actor_id(),
            payload,
            created_at: Utc::now(),
        };
        self.store.append(&self.capability, record.clone())?;
        Ok(record)
    }
}

/// Emit an audit event without letting a failure escape.
///
/// Used on paths where the caller's own result (usually an error) must reach
/// the client unchanged.
pub fn emit_best_effort<A>(
    sink: &A,
    event_name: &str,
    payload: AuditPayload,
    context: &TenantContext,
) -> Option<AuditRecord>
where
    A: AuditSink + ?Sized,
{
    match sink.emit(event_name, payload, context) {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::warn!(event_name, reason = err.reason(), error = %err, "audit emission failed");
            None
        }
    }
}
