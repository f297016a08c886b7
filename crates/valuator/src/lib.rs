//! # Stonks Valuator Crate
//!
//! Read-side reporting over the ledger: what a wallet is worth right now, and
//! what it has traded.
//!
//! ## Architectural Principles
//!
//! - **Reader Only:** Nothing here takes a lock or writes. Reports are built
//!   from committed state through `LedgerReader`.
//! - **Stateless Calculation:** `ValuationEngine` is a pure calculator from
//!   wallet, holdings, history and a price map to a `PortfolioReport`.
//! - **Partial Success:** A symbol that cannot be quoted is listed as unpriced
//!   instead of failing the report.
//!
//! ## Public API
//!
//! - `PortfolioValuator`: fetches state and quotes, returns a `PortfolioReport`.
//! - `TradeHistory`: newest-first pages of history plus whole-history stats.
//! - `ValuationEngine`: the pure valuation math.
//! - `ValuatorError`: the specific error types that can be returned from this crate.

pub mod engine;
pub mod error;
pub mod report;
pub mod portfolio;

pub use engine::ValuationEngine;
pub use error::ValuatorError;
pub use report::{HistoryPage, PortfolioReport, PositionValuation};
pub use portfolio::{PortfolioValuator, TradeHistory};
