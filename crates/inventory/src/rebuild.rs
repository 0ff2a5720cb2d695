//! Full recomputation of stock summaries from the ledger.

use core::fmt;
use core::str::FromStr;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use factory_core::decimal::{self, PrecisionError};
use factory_core::{DomainError, PartId, TenantId};

use crate::ledger::{MovementType, SourceType, StockLedgerEntry};
use crate::summary::{PartStockSummary, ProjectionError};

/// How a rebuild derives summary values.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildStrategy {
    /// Fold every entry of a part through [`PartStockSummary::apply_entry`] in
    /// `(created_at, sequence)` order. Identical to incremental projection.
    #[default]
    Replay,
    /// Sum-based recomputation: `Σ in value / Σ in qty` over the
    /// cost-contributing source types of a [`CostPolicy`].
    Aggregate,
}

impl RebuildStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebuildStrategy::Replay => "replay",
            RebuildStrategy::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for RebuildStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RebuildStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "replay" => Ok(RebuildStrategy::Replay),
            "aggregate" => Ok(RebuildStrategy::Aggregate),
            other => Err(DomainError::validation(format!("unknown rebuild strategy '{other}'"))),
        }
    }
}

/// Source types whose inbound movements contribute to the aggregate WAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostPolicy(BTreeSet<SourceType>);

impl CostPolicy {
    pub fn new(sources: impl IntoIterator<Item = SourceType>) -> Self {
        Self(sources.into_iter().collect())
    }

    pub fn contributes(&self, source_type: SourceType) -> bool {
        self.0.contains(&source_type)
    }

    pub fn sources(&self) -> impl Iterator<Item = SourceType> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for CostPolicy {
    /// Comma-separated, the form [`FromStr`] accepts.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, source) in self.sources().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(source.as_str())?;
        }
        Ok(())
    }
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self::new([
            SourceType::Purchase,
            SourceType::Production,
            SourceType::SubcontractingReceive,
        ])
    }
}

impl FromStr for CostPolicy {
    type Err = DomainError;

    /// Comma-separated source types, e.g. `purchase,production`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sources = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(SourceType::from_str)
            .collect::<Result<BTreeSet<_>, _>>()?;
        if sources.is_empty() {
            return Err(DomainError::validation("cost policy needs at least one source_type"));
        }
        Ok(Self(sources))
    }
}

/// Recompute one summary per `(tenant, part)` present in `entries`.
///
/// Input order does not matter. Output is sorted by `(tenant, part)`, with
/// `updated_at = at` and `version = 0` (the store owns versioning).
pub fn rebuild_summaries<'a>(
    entries: impl IntoIterator<Item = &'a StockLedgerEntry>,
    strategy: RebuildStrategy,
    policy: &CostPolicy,
    at: DateTime<Utc>,
) -> Result<Vec<PartStockSummary>, ProjectionError> {
    let mut by_part: BTreeMap<(TenantId, PartId), Vec<&StockLedgerEntry>> = BTreeMap::new();
    for entry in entries {
        by_part.entry((entry.tenant_id, entry.part_id)).or_default().push(entry);
    }

    by_part
        .into_iter()
        .map(|((tenant_id, part_id), mut part_entries)| {
            part_entries.sort_by_key(|e| e.replay_order());
            let mut summary = match strategy {
                RebuildStrategy::Replay => replay(tenant_id, part_id, &part_entries, at)?,
                RebuildStrategy::Aggregate => aggregate(tenant_id, part_id, &part_entries, policy, at)?,
            };
            summary.updated_at = at;
            summary.version = 0;
            Ok(summary)
        })
        .collect()
}

fn replay(
    tenant_id: TenantId,
    part_id: PartId,
    entries: &[&StockLedgerEntry],
    at: DateTime<Utc>,
) -> Result<PartStockSummary, ProjectionError> {
    let mut summary = PartStockSummary::empty(tenant_id, part_id, at);
    for entry in entries {
        summary.apply_entry(entry)?;
    }
    Ok(summary)
}

/// `entries` must already be in replay order.
fn aggregate(
    tenant_id: TenantId,
    part_id: PartId,
    entries: &[&StockLedgerEntry],
    policy: &CostPolicy,
    at: DateTime<Utc>,
) -> Result<PartStockSummary, ProjectionError> {
    let mut available = Decimal::ZERO;
    let mut in_qty = Decimal::ZERO;
    let mut in_value = Decimal::ZERO;
    let mut last_purchase = None;
    let mut last_production = None;

    for entry in entries {
        let delta = entry.signed_delta();
        let next = available.checked_add(delta).ok_or(PrecisionError::Overflow)?;
        if next < Decimal::ZERO {
            return Err(ProjectionError::NegativeBalance {
                part_id,
                current: available,
                delta,
            });
        }
        available = next;

        if entry.movement_type != MovementType::In || entry.is_reversal() {
            continue;
        }
        if policy.contributes(entry.source_type) {
            in_qty = in_qty.checked_add(entry.qty).ok_or(PrecisionError::Overflow)?;
            in_value = in_value
                .checked_add(entry.transaction_value)
                .ok_or(PrecisionError::Overflow)?;
        }
        match entry.source_type {
            SourceType::Purchase => last_purchase = Some(entry.unit_cost),
            SourceType::Production => last_production = Some(entry.unit_cost),
            _ => {}
        }
    }

    let weighted_avg_cost = if in_qty.is_zero() {
        decimal::round_cost(Decimal::ZERO)
    } else {
        let avg = in_value.checked_div(in_qty).ok_or(PrecisionError::Overflow)?;
        decimal::fit_cost(decimal::round_cost(avg))?
    };

    Ok(PartStockSummary {
        tenant_id,
        part_id,
        available_qty: decimal::fit_qty(decimal::round_qty(available))?,
        weighted_avg_cost,
        last_purchase_cost: last_purchase,
        last_production_cost: last_production,
        updated_at: at,
        version: 0,
    })
}
