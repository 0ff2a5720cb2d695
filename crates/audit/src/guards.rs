//! Audit guard chain.
//!
//! Order is fixed: registry, system-only, tenant scope, payload.

use factory_core::TenantContext;

use crate::error::AuditError;
use crate::record::AuditPayload;
use crate::registry::{AuditEventSpec, get_event_spec};

pub fn guard_event_registry(event_name: &str) -> Result<&'static AuditEventSpec, AuditError> {
    get_event_spec(event_name).ok_or_else(|| AuditError::UnknownEvent(event_name.to_string()))
}

pub fn guard_system_only(spec: &AuditEventSpec, context: &TenantContext) -> Result<(), AuditError> {
    if spec.system_only && !context.is_system() {
        return Err(AuditError::SystemOnly(spec.name.to_string()));
    }
    Ok(())
}

/// Non-system audit events must carry a tenant.
pub fn guard_tenant_scope(context: &TenantContext) -> Result<(), AuditError> {
    if !context.is_system() && context.tenant_id().is_none() {
        return Err(AuditError::MissingTenant);
    }
    Ok(())
}

pub fn guard_payload(spec: &AuditEventSpec, payload: &AuditPayload) -> Result<(), AuditError> {
    let size = serde_json::to_vec(payload)
        .map_err(|e| AuditError::Store(format!("payload serialization failed: {e}")))?
        .len();
    let limit = spec.payload_limit();
    if size > limit {
        return Err(AuditError::PayloadTooLarge { size, limit });
    }

    let missing: Vec<String> = spec
        .required_keys
        .iter()
        .filter(|k| !payload.contains_key(**k))
        .map(|k| (*k).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AuditError::MissingKeys(missing));
    }
    Ok(())
}

pub fn run_guards(
    event_name: &str,
    payload: &AuditPayload,
    context: &TenantContext,
) -> Result<&'static AuditEventSpec, AuditError> {
    let spec = guard_event_registry(event_name)?;
    guard_system_only(spec, context)?;
    guard_tenant_scope(context)?;
    guard_payload(spec, payload)?;
    Ok(spec)
}
