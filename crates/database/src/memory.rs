use crate::error::DbError;
use crate::store::{LedgerReader, LedgerStore, TradeStats, UnitOfWork, opening_balance};
use async_trait::async_trait;
use chrono::Utc;
use core_types::{Holding, NewHolding, NewTransaction, Transaction, Wallet};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// The storage call at which an injected [`Fault`] fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    LockWallet,
    LockHolding,
    WriteWallet,
    WriteHolding,
    AppendTransaction,
    Commit,
}

impl fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultPoint::LockWallet => "lock_wallet",
            FaultPoint::LockHolding => "lock_holding",
            FaultPoint::WriteWallet => "write_wallet",
            FaultPoint::WriteHolding => "write_holding",
            FaultPoint::AppendTransaction => "append_transaction",
            FaultPoint::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// A one-shot storage fault. The first unit of work to reach the point consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The call fails with [`DbError::InjectedFault`].
    Fail(FaultPoint),
    /// The call sleeps for the given duration before proceeding.
    Stall(FaultPoint, Duration),
}

impl Fault {
    fn point(&self) -> FaultPoint {
        match self {
            Fault::Fail(point) | Fault::Stall(point, _) => *point,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Wallet(i64),
    Holding(i64, String),
}

#[derive(Debug, Default)]
struct LedgerState {
    next_id: i64,
    /// Keyed by wallet id.
    wallets: HashMap<i64, Wallet>,
    /// Keyed by holding id.
    holdings: BTreeMap<i64, Holding>,
    transactions: Vec<Transaction>,
}

impl LedgerState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn wallet_by_owner(&self, owner_id: i64) -> Option<&Wallet> {
        self.wallets.values().find(|w| w.owner_id == owner_id)
    }
}

/// An in-process ledger store with the same locking and atomicity contract as
/// the PostgreSQL store.
///
/// Each wallet and each `(wallet, symbol)` pair has its own async mutex. A unit
/// of work keeps every lock it takes until it commits, rolls back, or is
/// dropped, and buffers its writes in a private overlay that is applied to the
/// shared state in one step on commit. Row locks that nobody holds or waits on
/// are pruned on the next acquisition. Used for tests and local runs without a
/// database.
#[derive(Clone)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    locks: Arc<Mutex<HashMap<LockKey, Arc<Mutex<()>>>>>,
    faults: Arc<Mutex<Vec<Fault>>>,
    lock_timeout: Duration,
}

impl MemoryLedgerStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            locks: Arc::new(Mutex::new(HashMap::new())),
            faults: Arc::new(Mutex::new(Vec::new())),
            lock_timeout,
        }
    }

    /// Arms a one-shot fault for the next unit of work that reaches its point.
    pub async fn inject(&self, fault: Fault) {
        self.faults.lock().await.push(fault);
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

async fn trip(faults: &Mutex<Vec<Fault>>, point: FaultPoint) -> Result<(), DbError> {
    let fault = {
        let mut armed = faults.lock().await;
        armed
            .iter()
            .position(|f| f.point() == point)
            .map(|index| armed.remove(index))
    };

    match fault {
        Some(Fault::Fail(point)) => Err(DbError::InjectedFault(point.to_string())),
        Some(Fault::Stall(_, delay)) => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
        None => Ok(()),
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self.clone(),
            guards: Vec::new(),
            held: HashSet::new(),
            balances: HashMap::new(),
            holding_writes: BTreeMap::new(),
            appended: Vec::new(),
        }))
    }

    async fn open_wallet(&self, owner_id: i64, initial_balance: Decimal) -> Result<Wallet, DbError> {
        let initial_balance = opening_balance(initial_balance)?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state.wallet_by_owner(owner_id) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let wallet = Wallet {
            id: state.allocate_id(),
            owner_id,
            balance: initial_balance,
            created_at: now,
            updated_at: now,
        };
        state.wallets.insert(wallet.id, wallet.clone());
        tracing::info!(owner_id, %initial_balance, "Opened wallet.");
        Ok(wallet)
    }
}

/// A unit of work over [`MemoryLedgerStore`].
pub struct MemoryUnitOfWork {
    store: MemoryLedgerStore,
    guards: Vec<OwnedMutexGuard<()>>,
    held: HashSet<LockKey>,
    /// Pending wallet balances, keyed by wallet id.
    balances: HashMap<i64, Decimal>,
    /// Pending holding rows; `None` marks a deletion.
    holding_writes: BTreeMap<i64, Option<Holding>>,
    appended: Vec<Transaction>,
}

impl MemoryUnitOfWork {
    async fn acquire(&mut self, key: LockKey) -> Result<(), DbError> {
        if self.held.contains(&key) {
            return Ok(());
        }

        let row_lock = {
            let mut locks = self.store.locks.lock().await;
            // An entry only the map refers to is neither held nor awaited.
            locks.retain(|_, row_lock| Arc::strong_count(row_lock) > 1);
            locks.entry(key.clone()).or_default().clone()
        };

        match tokio::time::timeout(self.store.lock_timeout, row_lock.lock_owned()).await {
            Ok(guard) => {
                self.guards.push(guard);
                self.held.insert(key);
                Ok(())
            }
            Err(_) => Err(DbError::LockTimeout(format!("{key:?}"))),
        }
    }

    /// The holding as this unit of work sees it: pending writes first, then committed state.
    fn visible_holding(&self, state: &LedgerState, holding_id: i64) -> Option<Holding> {
        match self.holding_writes.get(&holding_id) {
            Some(pending) => pending.clone(),
            None => state.holdings.get(&holding_id).cloned(),
        }
    }

    fn find_visible_holding(&self, state: &LedgerState, wallet_id: i64, symbol: &str) -> Option<Holding> {
        let committed = state
            .holdings
            .values()
            .filter(|h| h.wallet_id == wallet_id && h.symbol == symbol)
            .map(|h| h.id);
        let pending = self
            .holding_writes
            .iter()
            .filter_map(|(id, h)| h.as_ref().map(|h| (*id, h)))
            .filter(|(_, h)| h.wallet_id == wallet_id && h.symbol == symbol)
            .map(|(id, _)| id);

        committed
            .chain(pending)
            .find_map(|id| self.visible_holding(state, id))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_wallet_for_update(&mut self, owner_id: i64) -> Result<Option<Wallet>, DbError> {
        trip(&self.store.faults, FaultPoint::LockWallet).await?;
        self.acquire(LockKey::Wallet(owner_id)).await?;

        let state = self.store.state.lock().await;
        Ok(state.wallet_by_owner(owner_id).map(|wallet| {
            let mut wallet = wallet.clone();
            if let Some(balance) = self.balances.get(&wallet.id) {
                wallet.balance = *balance;
            }
            wallet
        }))
    }

    async fn lock_holding_for_update(
        &mut self,
        wallet_id: i64,
        symbol: &str,
    ) -> Result<Option<Holding>, DbError> {
        trip(&self.store.faults, FaultPoint::LockHolding).await?;
        self.acquire(LockKey::Holding(wallet_id, symbol.to_string())).await?;

        let state = self.store.state.lock().await;
        Ok(self.find_visible_holding(&state, wallet_id, symbol))
    }

    async fn set_wallet_balance(&mut self, wallet_id: i64, balance: Decimal) -> Result<(), DbError> {
        trip(&self.store.faults, FaultPoint::WriteWallet).await?;
        if balance < Decimal::ZERO {
            return Err(DbError::ConstraintViolation(format!(
                "wallet {wallet_id} balance {balance} is negative"
            )));
        }

        let state = self.store.state.lock().await;
        if !state.wallets.contains_key(&wallet_id) {
            return Err(DbError::NotFound);
        }
        drop(state);

        self.balances.insert(wallet_id, balance);
        Ok(())
    }

    async fn insert_holding(&mut self, holding: &NewHolding) -> Result<Holding, DbError> {
        trip(&self.store.faults, FaultPoint::WriteHolding).await?;
        if holding.quantity <= Decimal::ZERO || holding.average_buy_price < Decimal::ZERO {
            return Err(DbError::ConstraintViolation(format!(
                "holding {} has quantity {} and average price {}",
                holding.symbol, holding.quantity, holding.average_buy_price
            )));
        }

        let mut state = self.store.state.lock().await;
        if !state.wallets.contains_key(&holding.wallet_id) {
            return Err(DbError::ConstraintViolation(format!(
                "wallet {} does not exist",
                holding.wallet_id
            )));
        }
        if self
            .find_visible_holding(&state, holding.wallet_id, &holding.symbol)
            .is_some()
        {
            return Err(DbError::ConstraintViolation(format!(
                "wallet {} already holds {}",
                holding.wallet_id, holding.symbol
            )));
        }

        let now = Utc::now();
        let row = Holding {
            id: state.allocate_id(),
            wallet_id: holding.wallet_id,
            symbol: holding.symbol.clone(),
            quantity: holding.quantity,
            average_buy_price: holding.average_buy_price,
            instrument_class: holding.instrument_class,
            created_at: now,
            updated_at: now,
        };
        drop(state);

        self.holding_writes.insert(row.id, Some(row.clone()));
        Ok(row)
    }

    async fn update_holding(
        &mut self,
        holding_id: i64,
        quantity: Decimal,
        average_buy_price: Decimal,
    ) -> Result<(), DbError> {
        trip(&self.store.faults, FaultPoint::WriteHolding).await?;
        if quantity <= Decimal::ZERO || average_buy_price < Decimal::ZERO {
            return Err(DbError::ConstraintViolation(format!(
                "holding {holding_id} would have quantity {quantity} and average price {average_buy_price}"
            )));
        }

        let state = self.store.state.lock().await;
        let mut holding = self
            .visible_holding(&state, holding_id)
            .ok_or(DbError::NotFound)?;
        drop(state);

        holding.quantity = quantity;
        holding.average_buy_price = average_buy_price;
        holding.updated_at = Utc::now();
        self.holding_writes.insert(holding_id, Some(holding));
        Ok(())
    }

    async fn delete_holding(&mut self, holding_id: i64) -> Result<(), DbError> {
        trip(&self.store.faults, FaultPoint::WriteHolding).await?;

        let state = self.store.state.lock().await;
        if self.visible_holding(&state, holding_id).is_none() {
            return Err(DbError::NotFound);
        }
        drop(state);

        self.holding_writes.insert(holding_id, None);
        Ok(())
    }

    async fn append_transaction(&mut self, transaction: &NewTransaction) -> Result<Transaction, DbError> {
        trip(&self.store.faults, FaultPoint::AppendTransaction).await?;
        if transaction.quantity <= Decimal::ZERO || transaction.price_per_unit <= Decimal::ZERO {
            return Err(DbError::ConstraintViolation(format!(
                "transaction for {} has quantity {} and price {}",
                transaction.symbol, transaction.quantity, transaction.price_per_unit
            )));
        }

        let mut state = self.store.state.lock().await;
        if !state.wallets.contains_key(&transaction.wallet_id) {
            return Err(DbError::ConstraintViolation(format!(
                "wallet {} does not exist",
                transaction.wallet_id
            )));
        }
        let row = Transaction {
            id: state.allocate_id(),
            wallet_id: transaction.wallet_id,
            symbol: transaction.symbol.clone(),
            side: transaction.side,
            quantity: transaction.quantity,
            price_per_unit: transaction.price_per_unit,
            total_amount: transaction.total_amount,
            realized_pnl: transaction.realized_pnl,
            created_at: Utc::now(),
        };
        drop(state);

        self.appended.push(row.clone());
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let mut this = *self;
        trip(&this.store.faults, FaultPoint::Commit).await?;

        let mut state = this.store.state.lock().await;
        let now = Utc::now();
        for (wallet_id, balance) in this.balances.drain() {
            if let Some(wallet) = state.wallets.get_mut(&wallet_id) {
                wallet.balance = balance;
                wallet.updated_at = now;
            }
        }
        for (holding_id, pending) in std::mem::take(&mut this.holding_writes) {
            match pending {
                Some(holding) => {
                    state.holdings.insert(holding_id, holding);
                }
                None => {
                    state.holdings.remove(&holding_id);
                }
            }
        }
        state.transactions.append(&mut this.appended);
        drop(state);

        // Row locks are released only after the new state is visible.
        this.guards.clear();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}

#[async_trait]
impl LedgerReader for MemoryLedgerStore {
    async fn find_wallet(&self, owner_id: i64) -> Result<Option<Wallet>, DbError> {
        Ok(self.state.lock().await.wallet_by_owner(owner_id).cloned())
    }

    async fn holdings(&self, wallet_id: i64) -> Result<Vec<Holding>, DbError> {
        let state = self.state.lock().await;
        let mut holdings: Vec<Holding> = state
            .holdings
            .values()
            .filter(|h| h.wallet_id == wallet_id)
            .cloned()
            .collect();
        holdings.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(holdings)
    }

    async fn transactions(&self, wallet_id: i64) -> Result<Vec<Transaction>, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.wallet_id == wallet_id)
            .cloned()
            .collect())
    }

    async fn transactions_page(
        &self,
        wallet_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, DbError> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);

        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.wallet_id == wallet_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn trade_stats(&self, wallet_id: i64) -> Result<TradeStats, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.wallet_id == wallet_id)
            .fold(TradeStats::default(), |mut stats, t| {
                stats.total_trades += 1;
                stats.total_realized_pnl += t.realized_pnl;
                if t.realized_pnl > Decimal::ZERO {
                    stats.winning_trades += 1;
                }
                stats.total_volume += t.total_amount;
                stats
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{InstrumentClass, Side};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn faults_fire_once() {
        let store = MemoryLedgerStore::default();
        store.inject(Fault::Fail(FaultPoint::Commit)).await;

        assert!(matches!(
            trip(&store.faults, FaultPoint::LockWallet).await,
            Ok(())
        ));
        assert!(matches!(
            trip(&store.faults, FaultPoint::Commit).await,
            Err(DbError::InjectedFault(point)) if point == "commit"
        ));
        assert!(trip(&store.faults, FaultPoint::Commit).await.is_ok());
    }

    #[tokio::test]
    async fn idle_row_locks_are_pruned() {
        let store = MemoryLedgerStore::default();
        for owner_id in 1..=10 {
            store.open_wallet(owner_id, dec!(1)).await.unwrap();
            let mut uow = store.begin().await.unwrap();
            uow.lock_wallet_for_update(owner_id).await.unwrap();
            uow.commit().await.unwrap();
        }
        assert_eq!(store.locks.lock().await.len(), 1);

        let mut held = store.begin().await.unwrap();
        held.lock_wallet_for_update(1).await.unwrap();
        let mut other = store.begin().await.unwrap();
        other.lock_wallet_for_update(2).await.unwrap();
        assert_eq!(store.locks.lock().await.len(), 2);

        drop(other);
        let mut contender = store.begin().await.unwrap();
        let timed_out = tokio::time::timeout(Duration::from_millis(50), contender.lock_wallet_for_update(1)).await;
        assert!(timed_out.is_err(), "a held lock must survive pruning");
        held.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn unit_of_work_reads_its_own_writes() {
        let store = MemoryLedgerStore::default();
        let wallet = store.open_wallet(1, dec!(100)).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        uow.lock_wallet_for_update(1).await.unwrap();
        uow.set_wallet_balance(wallet.id, dec!(40)).await.unwrap();
        let inserted = uow
            .insert_holding(&NewHolding {
                wallet_id: wallet.id,
                symbol: "AAPL".to_string(),
                quantity: dec!(2),
                average_buy_price: dec!(30),
                instrument_class: InstrumentClass::Stock,
            })
            .await
            .unwrap();

        let seen = uow.lock_wallet_for_update(1).await.unwrap().unwrap();
        assert_eq!(seen.balance, dec!(40));
        let held = uow
            .lock_holding_for_update(wallet.id, "AAPL")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(held.id, inserted.id);

        // Nothing is visible outside until commit.
        assert_eq!(store.find_wallet(1).await.unwrap().unwrap().balance, dec!(100));
        assert!(store.holdings(wallet.id).await.unwrap().is_empty());

        uow.commit().await.unwrap();
        assert_eq!(store.find_wallet(1).await.unwrap().unwrap().balance, dec!(40));
        assert_eq!(store.holdings(wallet.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_negative_balance_and_bad_transactions() {
        let store = MemoryLedgerStore::default();
        let wallet = store.open_wallet(1, dec!(10)).await.unwrap();
        let mut uow = store.begin().await.unwrap();

        assert!(matches!(
            uow.set_wallet_balance(wallet.id, dec!(-1)).await,
            Err(DbError::ConstraintViolation(_))
        ));
        assert!(matches!(
            uow.append_transaction(&NewTransaction {
                wallet_id: wallet.id,
                symbol: "BTC".to_string(),
                side: Side::Buy,
                quantity: dec!(0),
                price_per_unit: dec!(1),
                total_amount: dec!(0),
                realized_pnl: dec!(0),
            })
            .await,
            Err(DbError::ConstraintViolation(_))
        ));
    }
}
