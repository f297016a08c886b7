//! # Stonks Executor Crate
//!
//! This crate is the trade execution engine: it turns a buy or sell request into
//! one atomic set of ledger writes (wallet balance, holding, transaction row).
//!
//! ## Architectural Principles
//!
//! - **Price First, Lock Second:** The oracle is called exactly once per order,
//!   strictly before any row lock is taken, and that single price is used for
//!   every computation in the order.
//! - **All or Nothing:** Settlement runs inside one `UnitOfWork` under a
//!   deadline. Any failure, including an elapsed deadline, rolls back every
//!   write of the order.
//! - **Injected Collaborators:** The `LedgerStore` and `PriceOracle` are trait
//!   objects handed to the engine at construction, so the same engine runs
//!   against PostgreSQL and live quotes or against the in-memory doubles.
//!
//! ## Public API
//!
//! - `TradeEngine`: `buy` and `sell`.
//! - `BuyReceipt` / `SellReceipt`: the committed post-state of an order.
//! - `TradeError` / `ErrorCategory`: the typed failure taxonomy.

pub mod engine;
pub mod error;

pub use engine::{BuyReceipt, EngineSettings, OrderStage, SellReceipt, TradeEngine};
pub use error::{ErrorCategory, TradeError};
