//! Token cost accounting: rate table, exchange-rate cache and cost ledgers.

pub mod exchange;
pub mod ledger;
pub mod rates;

pub use exchange::{ExchangeRateCache, ExchangeRateSource, HttpRateSource};
pub use ledger::{CostLedger, Direction, LedgerRow};
pub use rates::{ModelRate, RateTable, compute_cost};
