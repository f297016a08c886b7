//! # Stonks Database Crate
//!
//! The ledger's persistence layer: wallets, open holdings, and the append-only
//! transaction history.
//!
//! ## Architectural Principles
//!
//! - **Units of Work:** Every mutation happens inside a [`UnitOfWork`]. Rows are
//!   locked exclusively for the lifetime of the unit of work, and a unit of work
//!   that is dropped without `commit` leaves no trace.
//! - **Two Backends, One Contract:** [`PgLedgerStore`] uses PostgreSQL row locks
//!   (`SELECT ... FOR UPDATE`) with a transaction-local `lock_timeout`;
//!   [`MemoryLedgerStore`] gives the same guarantees in-process and supports
//!   fault injection for tests.
//! - **Exact Arithmetic:** Monetary columns are `NUMERIC(20, 8)` and map to
//!   `rust_decimal::Decimal`; no value passes through a float.
//!
//! ## Public API
//!
//! - `connect` / `run_migrations`: pool setup and the embedded schema.
//! - `LedgerStore`, `UnitOfWork`, `LedgerReader`: the storage seams used by the
//!   executor and valuator crates.
//! - `DbError`: the specific error types that can be returned from this crate.

pub mod connection;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use memory::{Fault, FaultPoint, MemoryLedgerStore, MemoryUnitOfWork};
pub use postgres::{PgLedgerStore, PgUnitOfWork};
pub use store::{LedgerReader, LedgerStore, TradeStats, UnitOfWork};
