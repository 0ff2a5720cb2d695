//! Administrative commands over an exported stock ledger.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use factory_audit::{AuditEmitter, InMemoryAuditStore};
use factory_core::{TenantContext, TenantId};
use factory_infra::{InMemoryLedgerStore, InventoryAdmin, LedgerConfig, LedgerStore, RebuildCounts, StockSummaryProjector};
use factory_inventory::{PartStockSummary, RebuildStrategy, StockLedgerEntry};

#[derive(Parser)]
#[command(name = "factory-admin")]
#[command(version, about = "Stock ledger administration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute part stock summaries from a ledger export and print them as JSON
    RebuildStockSummary(RebuildArgs),
}

#[derive(clap::Args, Debug)]
struct RebuildArgs {
    /// JSON array of ledger rows
    #[arg(long)]
    ledger: PathBuf,

    /// Only rebuild this tenant's parts
    #[arg(long)]
    tenant_id: Option<TenantId>,

    /// Overrides FACTORY_LEDGER_REBUILD_STRATEGY
    #[arg(long)]
    strategy: Option<RebuildStrategy>,
}

fn main() -> Result<()> {
    factory_observability::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::RebuildStockSummary(args) => rebuild_stock_summary(args),
    }
}

fn rebuild_stock_summary(args: RebuildArgs) -> Result<()> {
    let config = LedgerConfig::from_env()?;
    let rows = read_ledger(&args.ledger)?;
    let strategy = args.strategy.unwrap_or(config.rebuild_strategy);

    let (counts, summaries) = rebuild(&config, rows, args.tenant_id, strategy)?;

    println!("{}", serde_json::to_string_pretty(&summaries)?);
    eprintln!(
        "total_parts={} updated={} removed={}",
        counts.total_parts, counts.updated, counts.removed
    );
    Ok(())
}

fn read_ledger(path: &Path) -> Result<Vec<StockLedgerEntry>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_ledger(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn parse_ledger(raw: &str) -> Result<Vec<StockLedgerEntry>> {
    Ok(serde_json::from_str(raw)?)
}

/// Restore `rows` into a fresh store and rebuild summaries from them.
fn rebuild(
    config: &LedgerConfig,
    rows: Vec<StockLedgerEntry>,
    tenant_id: Option<TenantId>,
    strategy: RebuildStrategy,
) -> Result<(RebuildCounts, Vec<PartStockSummary>)> {
    let store = Arc::new(InMemoryLedgerStore::new(config));
    let restored = store.restore(rows).context("restoring ledger rows")?;
    tracing::info!(rows = restored, strategy = %strategy, "ledger restored");

    let projector = StockSummaryProjector::from_config(config).with_strategy(strategy);
    let admin = InventoryAdmin::new(store.clone(), AuditEmitter::new(InMemoryAuditStore::new()), projector);
    let counts = admin.rebuild(&TenantContext::system(), tenant_id)?;

    Ok((counts, store.summaries(tenant_id)))
}
