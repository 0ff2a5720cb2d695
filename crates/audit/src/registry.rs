//! Central registry of audit event names.
//!
//! All event names must be registered here; unknown names fail closed.

/// Emitted when the ledger refuses a write that would drive stock negative.
pub const NEGATIVE_STOCK_BLOCKED: &str = "inventory.negative_stock.blocked";

/// Administrative inspection of ledger or summary data.
pub const INVENTORY_ADMIN: &str = "inventory.admin";

/// Stock summaries rebuilt from the ledger.
pub const SUMMARY_REBUILT: &str = "inventory.summary.rebuilt";

/// Default serialized payload limit.
pub const MAX_PAYLOAD_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEventSpec {
    pub name: &'static str,
    pub max_payload_bytes_override: Option<usize>,
    /// Only system contexts may emit this event.
    pub system_only: bool,
    pub required_keys: &'static [&'static str],
    pub notes: &'static str,
}

impl AuditEventSpec {
    pub fn payload_limit(&self) -> usize {
        self.max_payload_bytes_override.unwrap_or(MAX_PAYLOAD_BYTES)
    }
}

static EVENTS: &[AuditEventSpec] = &[
    AuditEventSpec {
        name: NEGATIVE_STOCK_BLOCKED,
        max_payload_bytes_override: None,
        system_only: false,
        required_keys: &[
            "part_id",
            "movement_type",
            "source_type",
            "qty",
            "delta_qty",
            "current_available_qty",
            "projected_available_qty",
            "unit_cost",
            "source_ref",
        ],
        notes: "Ledger-time negative stock guard rejected a write.",
    },
    AuditEventSpec {
        name: INVENTORY_ADMIN,
        max_payload_bytes_override: None,
        system_only: false,
        required_keys: &["action", "resource"],
        notes: "Admin surface access (list/detail), tenant-safe.",
    },
    AuditEventSpec {
        name: SUMMARY_REBUILT,
        max_payload_bytes_override: None,
        system_only: true,
        required_keys: &["total_parts", "updated", "strategy"],
        notes: "Part stock summaries recomputed from the ledger.",
    },
];

pub fn get_event_spec(event_name: &str) -> Option<&'static AuditEventSpec> {
    EVENTS.iter().find(|spec| spec.name == event_name)
}

pub fn is_event_registered(event_name: &str) -> bool {
    get_event_spec(event_name).is_some()
}
