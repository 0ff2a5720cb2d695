use std::sync::Arc;

use parking_lot::RwLock;

use factory_core::TenantId;

use crate::error::AuditError;
use crate::record::AuditRecord;

/// Write capability for audit storage.
///
/// Cannot be constructed outside this crate; the only instance lives inside an
/// [`AuditEmitter`](crate::AuditEmitter), so every stored row has passed the
/// guard chain.
#[derive(Debug)]
pub struct AuditWriteCapability {
    _sealed: (),
}

impl AuditWriteCapability {
    pub(crate) fn issue() -> Self {
        Self { _sealed: () }
    }
}

/// Append-only audit storage.
pub trait AuditStore: Send + Sync {
    fn append(&self, capability: &AuditWriteCapability, record: AuditRecord) -> Result<(), AuditError>;

    /// Records visible for `tenant_id` (`None` = all tenants), oldest first.
    fn list(&self, tenant_id: Option<TenantId>) -> Vec<AuditRecord>;
}

impl<S> AuditStore for Arc<S>
where
    S: AuditStore + ?Sized,
{
    fn append(&self, capability: &AuditWriteCapability, record: AuditRecord) -> Result<(), AuditError> {
        (**self).append(capability, record)
    }

    fn list(&self, tenant_id: Option<TenantId>) -> Vec<AuditRecord> {
        (**self).list(tenant_id)
    }
}

/// In-memory audit store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditStore for InMemoryAuditStore {
    fn append(&self, _capability: &AuditWriteCapability, record: AuditRecord) -> Result<(), AuditError> {
        let mut records = self.records.write();
        if records.iter().any(|r| r.id == record.id) {
            return Err(AuditError::Immutable);
        }
        records.push(record);
        Ok(())
    }

    fn list(&self, tenant_id: Option<TenantId>) -> Vec<AuditRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| tenant_id.is_none() || r.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}
