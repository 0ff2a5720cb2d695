//! Tenant context for a unit of work.
//!
//! Tenancy and RBAC resolution live outside this workspace; callers hand us the
//! resolved "current tenant" and "is system" flags and every data-access path
//! checks them. Missing scope fails closed.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{TenantId, UserId};

/// Resolved tenant scope for a request, job or administrative command.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    tenant_id: Option<TenantId>,
    is_system: bool,
    actor_id: Option<UserId>,
}

impl TenantContext {
    /// Context bound to one tenant.
    pub fn tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            is_system: false,
            actor_id: None,
        }
    }

    /// System context (cross-tenant administrative access).
    pub fn system() -> Self {
        Self {
            tenant_id: None,
            is_system: true,
            actor_id: None,
        }
    }

    /// System context acting on behalf of a single tenant.
    pub fn system_for(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            is_system: true,
            actor_id: None,
        }
    }

    /// Non-system context whose tenant scope could not be resolved.
    pub fn unscoped() -> Self {
        Self {
            tenant_id: None,
            is_system: false,
            actor_id: None,
        }
    }

    pub fn with_actor(mut self, actor_id: UserId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_system(&self) -> bool {
        self.is_system
    }

    pub fn actor_id(&self) -> Option<UserId> {
        self.actor_id
    }

    /// Whether data owned by `tenant_id` is visible in this context.
    pub fn can_access(&self, tenant_id: TenantId) -> bool {
        self.is_system || self.tenant_id == Some(tenant_id)
    }

    /// Tenant filter for list queries.
    ///
    /// `Ok(None)` means "all tenants" (system without a pinned tenant);
    /// unscoped non-system contexts get `Err(Unauthorized)`.
    pub fn tenant_filter(&self) -> DomainResult<Option<TenantId>> {
        match (self.is_system, self.tenant_id) {
            (_, Some(t)) => Ok(Some(t)),
            (true, None) => Ok(None),
            (false, None) => Err(DomainError::Unauthorized),
        }
    }

    /// Authorize a write against `tenant_id`.
    pub fn authorize_write(&self, tenant_id: TenantId) -> DomainResult<()> {
        if self.can_access(tenant_id) {
            Ok(())
        } else {
            Err(DomainError::Unauthorized)
        }
    }
}
