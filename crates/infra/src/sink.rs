//! Post-insert hook of the append engine.

use thiserror::Error;

use factory_inventory::{ProjectionError, StockLedgerEntry};

use crate::store::{LedgerTransaction, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SinkError {
    pub fn reason(&self) -> &'static str {
        match self {
            SinkError::Projection(e) => e.reason(),
            SinkError::Store(e) => e.reason(),
        }
    }
}

/// Receives every newly inserted ledger row inside the inserting transaction.
///
/// Never called for a resolved duplicate. An error aborts the append and
/// rolls the insert back.
pub trait LedgerSink: Send + Sync {
    fn on_ledger_insert(&self, tx: &mut dyn LedgerTransaction, entry: &StockLedgerEntry) -> Result<(), SinkError>;
}

impl<K> LedgerSink for std::sync::Arc<K>
where
    K: LedgerSink + ?Sized,
{
    fn on_ledger_insert(&self, tx: &mut dyn LedgerTransaction, entry: &StockLedgerEntry) -> Result<(), SinkError> {
        (**self).on_ledger_insert(tx, entry)
    }
}
