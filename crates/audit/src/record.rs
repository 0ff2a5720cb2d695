use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use factory_core::{AuditEventId, TenantId, UserId};

/// Structured audit payload (always a JSON object).
pub type AuditPayload = Map<String, JsonValue>;

/// Immutable audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditEventId,
    pub event_name: String,
    pub tenant_id: Option<TenantId>,
    pub actor_id: Option<UserId>,
    pub payload: AuditPayload,
    pub created_at: DateTime<Utc>,
}
