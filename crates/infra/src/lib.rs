//! Infrastructure layer: storage, locking and orchestration for the stock ledger.
//!
//! Wiring is explicit: the append engine is built from a store, a part catalog,
//! an audit sink and a [`LedgerSink`](sink::LedgerSink) (normally the
//! [`StockSummaryProjector`](projector::StockSummaryProjector)).

pub mod admin;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod guard;
pub mod idempotency;
pub mod lock;
pub mod projector;
pub mod sink;
pub mod store;

mod integration_tests;

pub use admin::{AdminError, InventoryAdmin};
pub use catalog::{BomGraphGuard, CatalogError, InMemoryCatalog, PartCatalog};
pub use config::{ConfigError, LedgerConfig};
pub use engine::{AppendError, AppendOutcome, LedgerAppendEngine};
pub use projector::{RebuildError, StockSummaryProjector};
pub use sink::{LedgerSink, SinkError};
pub use store::{EntryFilter, InMemoryLedgerStore, LedgerStore, LedgerTransaction, RebuildCounts, StoreError};
