use crate::error::DbError;
use async_trait::async_trait;
use core_types::{Holding, NewHolding, NewTransaction, Transaction, Wallet, money};
use rust_decimal::Decimal;

/// Aggregates over a wallet's whole trade history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeStats {
    pub total_trades: i64,
    pub total_realized_pnl: Decimal,
    /// Sells booked at a profit.
    pub winning_trades: i64,
    /// Sum of `total_amount` over buys and sells.
    pub total_volume: Decimal,
}

/// Checks an opening balance against the column range and rounds it to the ledger scale.
pub(crate) fn opening_balance(initial_balance: Decimal) -> Result<Decimal, DbError> {
    if initial_balance < Decimal::ZERO {
        return Err(DbError::InvalidInput(format!(
            "initial balance {initial_balance} is negative"
        )));
    }
    let balance = money::normalize(initial_balance);
    if balance >= money::LEDGER_LIMIT {
        return Err(DbError::InvalidInput(format!(
            "initial balance {initial_balance} exceeds the ledger range"
        )));
    }
    Ok(balance)
}

/// A transactional ledger store.
///
/// Every balance or holding mutation happens inside a [`UnitOfWork`] obtained
/// from [`LedgerStore::begin`]. Rows locked inside a unit of work stay locked
/// until it commits, rolls back, or is dropped; dropping an uncommitted unit of
/// work discards all of its writes.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a new atomic unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError>;

    /// Creates the owner's wallet with `initial_balance`, or returns the
    /// existing one untouched.
    async fn open_wallet(&self, owner_id: i64, initial_balance: Decimal) -> Result<Wallet, DbError>;
}

/// One all-or-nothing group of ledger writes.
///
/// The `lock_*` methods wait for any other unit of work holding the same row
/// (bounded by the store's lock timeout) instead of failing fast.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Locks the owner's wallet row exclusively. `None` if the owner has no wallet.
    async fn lock_wallet_for_update(&mut self, owner_id: i64) -> Result<Option<Wallet>, DbError>;

    /// Locks the holding row for `(wallet_id, symbol)`. `None` if no position is open.
    async fn lock_holding_for_update(
        &mut self,
        wallet_id: i64,
        symbol: &str,
    ) -> Result<Option<Holding>, DbError>;

    async fn set_wallet_balance(&mut self, wallet_id: i64, balance: Decimal) -> Result<(), DbError>;

    async fn insert_holding(&mut self, holding: &NewHolding) -> Result<Holding, DbError>;

    /// Rewrites quantity and cost basis of an existing holding.
    async fn update_holding(
        &mut self,
        holding_id: i64,
        quantity: Decimal,
        average_buy_price: Decimal,
    ) -> Result<(), DbError>;

    async fn delete_holding(&mut self, holding_id: i64) -> Result<(), DbError>;

    async fn append_transaction(&mut self, transaction: &NewTransaction) -> Result<Transaction, DbError>;

    /// Makes every write of this unit of work durable and releases its locks.
    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    /// Discards every write of this unit of work and releases its locks.
    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// Read-only access to committed ledger state, used by reporting.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn find_wallet(&self, owner_id: i64) -> Result<Option<Wallet>, DbError>;

    /// Open holdings of a wallet, ordered by symbol.
    async fn holdings(&self, wallet_id: i64) -> Result<Vec<Holding>, DbError>;

    /// The full history of a wallet, oldest first.
    async fn transactions(&self, wallet_id: i64) -> Result<Vec<Transaction>, DbError>;

    /// One page of history, newest first.
    async fn transactions_page(
        &self,
        wallet_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, DbError>;

    async fn trade_stats(&self, wallet_id: i64) -> Result<TradeStats, DbError>;
}
