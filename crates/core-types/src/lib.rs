pub mod enums;
pub mod error;
pub mod money;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{InstrumentClass, Side};
pub use error::CoreError;
pub use money::{LEDGER_LIMIT, LEDGER_SCALE};
pub use structs::{Holding, NewHolding, NewTransaction, Transaction, Wallet};
