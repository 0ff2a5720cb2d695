use thiserror::Error;

/// Audit emission failure.
///
/// Callers on business paths must treat these as best-effort failures: they are
/// logged, never propagated over the caller's own result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("unknown audit event '{0}'")]
    UnknownEvent(String),

    #[error("audit event '{0}' is system-only")]
    SystemOnly(String),

    #[error("audit context missing tenant scope")]
    MissingTenant,

    #[error("audit payload too large ({size} bytes, limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("audit payload missing keys: {0:?}")]
    MissingKeys(Vec<String>),

    #[error("audit record is immutable (append-only)")]
    Immutable,

    #[error("audit store unavailable: {0}")]
    Store(String),
}

impl AuditError {
    pub fn reason(&self) -> &'static str {
        match self {
            AuditError::UnknownEvent(_) => "audit_unknown_event",
            AuditError::SystemOnly(_) => "audit_system_only",
            AuditError::MissingTenant => "audit_missing_tenant",
            AuditError::PayloadTooLarge { .. } => "audit_payload_too_large",
            AuditError::MissingKeys(_) => "audit_payload_missing_keys",
            AuditError::Immutable => "audit_immutable",
            AuditError::Store(_) => "audit_store_unavailable",
        }
    }
}
