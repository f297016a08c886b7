use crate::error::{ErrorCategory, TradeError};
use configuration::Config;
use core_types::money::{self, LEDGER_LIMIT};
use core_types::{CoreError, InstrumentClass, NewHolding, NewTransaction, Side};
use database::{LedgerStore, UnitOfWork};
use price_oracle::{InstrumentRoster, OracleError, PriceOracle, validate_quote};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The lifecycle of one order. Only `Committed` and `Aborted` are visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStage {
    Received,
    Validated,
    Priced,
    Locked,
    Settled,
    Committed,
    Aborted,
}

impl fmt::Display for OrderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStage::Received => "received",
            OrderStage::Validated => "validated",
            OrderStage::Priced => "priced",
            OrderStage::Locked => "locked",
            OrderStage::Settled => "settled",
            OrderStage::Committed => "committed",
            OrderStage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Deadlines applied to every order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Bounds the single price request made before any lock is taken.
    pub oracle_timeout: Duration,
    /// Bounds the whole unit of work, from `begin` to `commit`.
    pub store_deadline: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            oracle_timeout: config.oracle.timeout(),
            store_deadline: config.ledger.store_deadline(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            oracle_timeout: Duration::from_secs(5),
            store_deadline: Duration::from_secs(10),
        }
    }
}

/// The committed outcome of a buy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuyReceipt {
    pub transaction_id: i64,
    pub symbol: String,
    /// Wallet balance after the debit.
    pub balance: Decimal,
    /// Cost basis of the whole position after the fill.
    pub average_price: Decimal,
    /// Total quantity now held.
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub price: Decimal,
    pub total_cost: Decimal,
}

/// The committed outcome of a sell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SellReceipt {
    pub transaction_id: i64,
    pub symbol: String,
    /// Wallet balance after the credit.
    pub balance: Decimal,
    pub realized_pnl: Decimal,
    pub sold_at: Decimal,
    pub sold_quantity: Decimal,
    /// Zero when the position was closed.
    pub remaining_quantity: Decimal,
    pub proceeds: Decimal,
}

/// A validated order, ready to be priced.
#[derive(Debug, Clone)]
struct Order {
    owner_id: i64,
    side: Side,
    symbol: String,
    class: InstrumentClass,
    quantity: Decimal,
}

/// Executes market orders against the ledger.
///
/// Each order is validated without I/O, priced with exactly one oracle call, and
/// then settled inside a single unit of work that locks the wallet row first and
/// the holding row second. The price obtained up front is the one debited,
/// credited and recorded. The engine holds no balances of its own, so any number
/// of engines may share one store.
pub struct TradeEngine {
    store: Arc<dyn LedgerStore>,
    oracle: Arc<dyn PriceOracle>,
    roster: InstrumentRoster,
    settings: EngineSettings,
}

impl TradeEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        oracle: Arc<dyn PriceOracle>,
        roster: InstrumentRoster,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            oracle,
            roster,
            settings,
        }
    }

    /// Builds an engine whose roster and deadlines come from the loaded configuration.
    pub fn from_config(store: Arc<dyn LedgerStore>, oracle: Arc<dyn PriceOracle>, config: &Config) -> Self {
        Self::new(
            store,
            oracle,
            InstrumentRoster::new(&config.ledger.stock_symbols),
            EngineSettings::from_config(config),
        )
    }

    /// Buys `quantity` of `symbol` for `owner_id` at the current market price.
    pub async fn buy(&self, owner_id: i64, symbol: &str, quantity: &str) -> Result<BuyReceipt, TradeError> {
        let order = self.validate(owner_id, Side::Buy, symbol, quantity)?;
        let price = self.quote(&order).await?;

        let settled = tokio::time::timeout(self.settings.store_deadline, self.settle_buy(&order, price)).await;
        let receipt = self.finish(&order, settled)?;

        tracing::info!(
            owner_id,
            symbol = %receipt.symbol,
            quantity = %receipt.filled_quantity,
            %price,
            balance = %receipt.balance,
            "Buy order committed."
        );
        Ok(receipt)
    }

    /// Sells `quantity` of an open `symbol` position for `owner_id` at the current market price.
    pub async fn sell(&self, owner_id: i64, symbol: &str, quantity: &str) -> Result<SellReceipt, TradeError> {
        let order = self.validate(owner_id, Side::Sell, symbol, quantity)?;
        let price = self.quote(&order).await?;

        let settled = tokio::time::timeout(self.settings.store_deadline, self.settle_sell(&order, price)).await;
        let receipt = self.finish(&order, settled)?;

        tracing::info!(
            owner_id,
            symbol = %receipt.symbol,
            quantity = %receipt.sold_quantity,
            %price,
            pnl = %receipt.realized_pnl,
            balance = %receipt.balance,
            "Sell order committed."
        );
        Ok(receipt)
    }

    fn validate(&self, owner_id: i64, side: Side, symbol: &str, quantity: &str) -> Result<Order, TradeError> {
        tracing::debug!(owner_id, %side, symbol, quantity, stage = %OrderStage::Received);

        match self.parse_order(owner_id, side, symbol, quantity) {
            Ok(order) => {
                advance(&order, OrderStage::Validated);
                Ok(order)
            }
            Err(e) => {
                tracing::warn!(owner_id, %side, symbol, quantity, error = %e, "Order rejected.");
                Err(e)
            }
        }
    }

    fn parse_order(&self, owner_id: i64, side: Side, symbol: &str, quantity: &str) -> Result<Order, TradeError> {
        if owner_id <= 0 {
            return Err(TradeError::Unauthorized(owner_id));
        }
        let quantity = money::parse_quantity(quantity)?;
        let symbol = money::normalize_symbol(symbol)?;
        let class = self.roster.classify(&symbol);
        Ok(Order {
            owner_id,
            side,
            symbol,
            class,
            quantity,
        })
    }

    /// The one price request of the order. No lock is held while it runs.
    async fn quote(&self, order: &Order) -> Result<Decimal, TradeError> {
        let requested = self.oracle.get_price(&order.symbol, order.class);
        let result = match tokio::time::timeout(self.settings.oracle_timeout, requested).await {
            Ok(quote) => quote.and_then(|price| validate_quote(&order.symbol, price)),
            Err(_) => Err(OracleError::MarketUnavailable(format!(
                "no quote within {:?}",
                self.settings.oracle_timeout
            ))),
        };

        match result {
            Ok(price) => {
                tracing::debug!(owner_id = order.owner_id, symbol = %order.symbol, %price, stage = %OrderStage::Priced);
                Ok(price)
            }
            Err(source) => {
                let e = TradeError::MarketUnavailable {
                    symbol: order.symbol.clone(),
                    source,
                };
                log_abort(order, &e);
                Err(e)
            }
        }
    }

    async fn settle_buy(&self, order: &Order, price: Decimal) -> Result<BuyReceipt, TradeError> {
        let mut uow = self.store.begin().await?;
        match apply_buy(uow.as_mut(), order, price).await {
            Ok(receipt) => {
                uow.commit().await?;
                Ok(receipt)
            }
            Err(e) => {
                discard(uow, order).await;
                Err(e)
            }
        }
    }

    async fn settle_sell(&self, order: &Order, price: Decimal) -> Result<SellReceipt, TradeError> {
        let mut uow = self.store.begin().await?;
        match apply_sell(uow.as_mut(), order, price).await {
            Ok(receipt) => {
                uow.commit().await?;
                Ok(receipt)
            }
            Err(e) => {
                discard(uow, order).await;
                Err(e)
            }
        }
    }

    /// Maps an elapsed deadline to an error and records the final stage.
    ///
    /// When the deadline fires, the settle future is dropped mid-flight together
    /// with its unit of work, which rolls back every write it made.
    fn finish<T>(
        &self,
        order: &Order,
        settled: Result<Result<T, TradeError>, tokio::time::error::Elapsed>,
    ) -> Result<T, TradeError> {
        let result = settled.unwrap_or(Err(TradeError::DeadlineExceeded(self.settings.store_deadline)));
        match &result {
            Ok(_) => advance(order, OrderStage::Committed),
            Err(e) => log_abort(order, e),
        }
        result
    }
}

async fn apply_buy(uow: &mut dyn UnitOfWork, order: &Order, price: Decimal) -> Result<BuyReceipt, TradeError> {
    let wallet = uow
        .lock_wallet_for_update(order.owner_id)
        .await?
        .ok_or(TradeError::WalletNotFound(order.owner_id))?;
    advance(order, OrderStage::Locked);

    let total_cost = money::notional(order.quantity, price)?;
    if total_cost.is_zero() {
        return Err(TradeError::InvalidQuantity {
            quantity: order.quantity.to_string(),
            reason: "order value rounds to zero".to_string(),
        });
    }
    if wallet.balance < total_cost {
        return Err(TradeError::InsufficientBalance {
            required: total_cost,
            available: wallet.balance,
        });
    }

    let balance = money::normalize(wallet.balance - total_cost);
    uow.set_wallet_balance(wallet.id, balance).await?;

    let (quantity, average_price) = match uow.lock_holding_for_update(wallet.id, &order.symbol).await? {
        None => {
            uow.insert_holding(&NewHolding {
                wallet_id: wallet.id,
                symbol: order.symbol.clone(),
                quantity: order.quantity,
                average_buy_price: price,
                instrument_class: order.class,
            })
            .await?;
            (order.quantity, price)
        }
        Some(holding) => {
            let quantity = in_ledger_range(holding.quantity.checked_add(order.quantity), "holding quantity")?;
            let average_price =
                money::weighted_average(holding.quantity, holding.average_buy_price, order.quantity, price)?;
            uow.update_holding(holding.id, quantity, average_price).await?;
            (quantity, average_price)
        }
    };

    let recorded = uow
        .append_transaction(&NewTransaction {
            wallet_id: wallet.id,
            symbol: order.symbol.clone(),
            side: Side::Buy,
            quantity: order.quantity,
            price_per_unit: price,
            total_amount: total_cost,
            realized_pnl: money::normalize(Decimal::ZERO),
        })
        .await?;
    advance(order, OrderStage::Settled);

    Ok(BuyReceipt {
        transaction_id: recorded.id,
        symbol: order.symbol.clone(),
        balance,
        average_price,
        quantity,
        filled_quantity: order.quantity,
        price,
        total_cost,
    })
}

async fn apply_sell(uow: &mut dyn UnitOfWork, order: &Order, price: Decimal) -> Result<SellReceipt, TradeError> {
    let wallet = uow
        .lock_wallet_for_update(order.owner_id)
        .await?
        .ok_or(TradeError::WalletNotFound(order.owner_id))?;
    let holding = uow
        .lock_holding_for_update(wallet.id, &order.symbol)
        .await?
        .ok_or_else(|| TradeError::NoSuchPosition(order.symbol.clone()))?;
    advance(order, OrderStage::Locked);

    if holding.quantity < order.quantity {
        return Err(TradeError::InsufficientPosition {
            requested: order.quantity,
            available: holding.quantity,
        });
    }

    let proceeds = money::notional(order.quantity, price)?;
    if proceeds.is_zero() {
        return Err(TradeError::InvalidQuantity {
            quantity: order.quantity.to_string(),
            reason: "order value rounds to zero".to_string(),
        });
    }
    let realized_pnl = money::realized_pnl(order.quantity, price, holding.average_buy_price)?;

    let remaining_quantity = money::normalize(holding.quantity - order.quantity);
    if remaining_quantity.is_zero() {
        uow.delete_holding(holding.id).await?;
    } else {
        // A sell never changes the cost basis.
        uow.update_holding(holding.id, remaining_quantity, holding.average_buy_price)
            .await?;
    }

    let balance = in_ledger_range(wallet.balance.checked_add(proceeds), "wallet balance")?;
    uow.set_wallet_balance(wallet.id, balance).await?;

    let recorded = uow
        .append_transaction(&NewTransaction {
            wallet_id: wallet.id,
            symbol: order.symbol.clone(),
            side: Side::Sell,
            quantity: order.quantity,
            price_per_unit: price,
            total_amount: proceeds,
            realized_pnl,
        })
        .await?;
    advance(order, OrderStage::Settled);

    Ok(SellReceipt {
        transaction_id: recorded.id,
        symbol: order.symbol.clone(),
        balance,
        realized_pnl,
        sold_at: price,
        sold_quantity: order.quantity,
        remaining_quantity,
        proceeds,
    })
}

fn in_ledger_range(value: Option<Decimal>, what: &str) -> Result<Decimal, TradeError> {
    match value.map(money::normalize) {
        Some(v) if v < LEDGER_LIMIT => Ok(v),
        _ => Err(CoreError::Calculation(format!("{what} would exceed the ledger range")).into()),
    }
}

async fn discard(uow: Box<dyn UnitOfWork>, order: &Order) {
    if let Err(e) = uow.rollback().await {
        // The connection drops the transaction anyway; nothing was committed.
        tracing::error!(owner_id = order.owner_id, symbol = %order.symbol, error = %e, "Rollback failed.");
    }
}

fn advance(order: &Order, stage: OrderStage) {
    tracing::debug!(owner_id = order.owner_id, side = %order.side, symbol = %order.symbol, %stage);
}

fn log_abort(order: &Order, e: &TradeError) {
    let stage = OrderStage::Aborted;
    match e.category() {
        ErrorCategory::Persistence => tracing::error!(
            owner_id = order.owner_id,
            side = %order.side,
            symbol = %order.symbol,
            %stage,
            error = %e,
            "Order rolled back."
        ),
        category => tracing::warn!(
            owner_id = order.owner_id,
            side = %order.side,
            symbol = %order.symbol,
            %stage,
            ?category,
            error = %e,
            "Order rejected."
        ),
    }
}
