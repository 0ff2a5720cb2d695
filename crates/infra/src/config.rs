//! Ledger runtime configuration.
//!
//! Values come from `FACTORY_LEDGER_*` environment variables. Parsing goes
//! through a lookup function so callers (and tests) can supply any source.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use factory_inventory::{CostPolicy, RebuildStrategy};

pub const ENV_LOCK_TIMEOUT_MS: &str = "FACTORY_LEDGER_LOCK_TIMEOUT_MS";
pub const ENV_LOCK_SHARDS: &str = "FACTORY_LEDGER_LOCK_SHARDS";
pub const ENV_COST_SOURCES: &str = "FACTORY_LEDGER_COST_SOURCES";
pub const ENV_REBUILD_STRATEGY: &str = "FACTORY_LEDGER_REBUILD_STRATEGY";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn reason(&self) -> &'static str {
        match self {
            ConfigError::Invalid { .. } => "config_invalid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Max wait on a per-part lock before the append fails as transient.
    pub lock_timeout_ms: u64,
    /// Number of mutex shards in the per-part lock table.
    pub lock_shards: usize,
    /// Cost-contributing source types for aggregate rebuilds.
    pub cost_policy: CostPolicy,
    pub rebuild_strategy: RebuildStrategy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            lock_shards: 64,
            cost_policy: CostPolicy::default(),
            rebuild_strategy: RebuildStrategy::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from `lookup`, falling back to defaults for unset or
    /// blank keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get(ENV_LOCK_TIMEOUT_MS) {
            cfg.lock_timeout_ms = v.parse().map_err(|e: std::num::ParseIntError| invalid(ENV_LOCK_TIMEOUT_MS, &v, e))?;
        }
        if let Some(v) = get(ENV_LOCK_SHARDS) {
            let shards: usize = v.parse().map_err(|e: std::num::ParseIntError| invalid(ENV_LOCK_SHARDS, &v, e))?;
            if shards == 0 {
                return Err(invalid(ENV_LOCK_SHARDS, &v, "must be at least 1"));
            }
            cfg.lock_shards = shards;
        }
        if let Some(v) = get(ENV_COST_SOURCES) {
            cfg.cost_policy = v.parse().map_err(|e| invalid(ENV_COST_SOURCES, &v, e))?;
        }
        if let Some(v) = get(ENV_REBUILD_STRATEGY) {
            cfg.rebuild_strategy = v.parse().map_err(|e| invalid(ENV_REBUILD_STRATEGY, &v, e))?;
        }

        Ok(cfg)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
