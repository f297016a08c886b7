use core_types::{Side, Transaction};
use database::{DbError, Fault, FaultPoint, LedgerReader, LedgerStore, MemoryLedgerStore};
use executor::{EngineSettings, ErrorCategory, TradeEngine, TradeError};
use price_oracle::{InstrumentRoster, OracleError, StaticPriceOracle};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const OWNER: i64 = 1;

struct Harness {
    store: Arc<MemoryLedgerStore>,
    oracle: Arc<StaticPriceOracle>,
    engine: TradeEngine,
}

impl Harness {
    fn new(store: MemoryLedgerStore, settings: EngineSettings) -> Self {
        let store = Arc::new(store);
        let oracle = Arc::new(StaticPriceOracle::with_prices([
            ("AAPL", dec!(50)),
            ("BTC", dec!(30000)),
        ]));
        let engine = TradeEngine::new(
            store.clone(),
            oracle.clone(),
            InstrumentRoster::new(["AAPL", "MSFT"]),
            settings,
        );
        Self { store, oracle, engine }
    }

    async fn with_wallet(balance: Decimal) -> Self {
        let harness = Self::new(MemoryLedgerStore::default(), EngineSettings::default());
        harness.store.open_wallet(OWNER, balance).await.unwrap();
        harness
    }

    async fn balance(&self, owner_id: i64) -> Decimal {
        self.store.find_wallet(owner_id).await.unwrap().unwrap().balance
    }

    async fn wallet_id(&self, owner_id: i64) -> i64 {
        self.store.find_wallet(owner_id).await.unwrap().unwrap().id
    }

    async fn transaction_count(&self, owner_id: i64) -> usize {
        let wallet_id = self.wallet_id(owner_id).await;
        self.store.transactions(wallet_id).await.unwrap().len()
    }
}

#[tokio::test]
async fn buy_buy_sell_scenario() {
    let h = Harness::with_wallet(dec!(100000)).await;

    let first = h.engine.buy(OWNER, "AAPL", "2").await.unwrap();
    assert_eq!(first.balance, dec!(99900));
    assert_eq!(first.quantity, dec!(2));
    assert_eq!(first.average_price, dec!(50));
    assert_eq!(first.total_cost, dec!(100));

    h.oracle.set_price("AAPL", dec!(60)).await;
    let second = h.engine.buy(OWNER, "aapl", "3").await.unwrap();
    assert_eq!(second.balance, dec!(99720));
    assert_eq!(second.quantity, dec!(5));
    assert_eq!(second.average_price, dec!(56));

    h.oracle.set_price("AAPL", dec!(70)).await;
    let sold = h.engine.sell(OWNER, "AAPL", "5").await.unwrap();
    assert_eq!(sold.proceeds, dec!(350));
    assert_eq!(sold.realized_pnl, dec!(70));
    assert_eq!(sold.sold_at, dec!(70));
    assert_eq!(sold.remaining_quantity, Decimal::ZERO);
    assert_eq!(sold.balance, dec!(100070));

    let wallet_id = h.wallet_id(OWNER).await;
    assert!(h.store.holdings(wallet_id).await.unwrap().is_empty());
    assert_eq!(h.balance(OWNER).await, dec!(100070));

    let history = h.store.transactions(wallet_id).await.unwrap();
    let sides: Vec<Side> = history.iter().map(|t| t.side).collect();
    assert_eq!(sides, vec![Side::Buy, Side::Buy, Side::Sell]);
    assert_eq!(history[2].realized_pnl, dec!(70));
    assert_eq!(history[2].price_per_unit, dec!(70));
}

#[tokio::test]
async fn partial_sell_keeps_cost_basis() {
    let h = Harness::with_wallet(dec!(1000)).await;
    h.engine.buy(OWNER, "AAPL", "4").await.unwrap();

    h.oracle.set_price("AAPL", dec!(40)).await;
    let sold = h.engine.sell(OWNER, "AAPL", "1.5").await.unwrap();
    assert_eq!(sold.realized_pnl, dec!(-15));
    assert_eq!(sold.remaining_quantity, dec!(2.5));

    let wallet_id = h.wallet_id(OWNER).await;
    let holdings = h.store.holdings(wallet_id).await.unwrap();
    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].quantity, dec!(2.5));
    assert_eq!(holdings[0].average_buy_price, dec!(50));
}

#[tokio::test]
async fn weighted_average_is_rounded_once_at_ledger_scale() {
    let h = Harness::with_wallet(dec!(1000)).await;
    h.oracle.set_price("AAPL", dec!(1)).await;
    h.engine.buy(OWNER, "AAPL", "1").await.unwrap();
    h.oracle.set_price("AAPL", dec!(2)).await;
    let receipt = h.engine.buy(OWNER, "AAPL", "2").await.unwrap();

    assert_eq!(receipt.average_price, dec!(1.66666667));
    assert_eq!(receipt.average_price.scale(), 8);
    assert_eq!(receipt.balance, dec!(995));
}

#[tokio::test]
async fn insufficient_balance_has_no_side_effects() {
    let h = Harness::with_wallet(dec!(100)).await;

    let err = h.engine.buy(OWNER, "AAPL", "3").await.unwrap_err();
    assert!(matches!(
        err,
        TradeError::InsufficientBalance { required, available }
            if required == dec!(150) && available == dec!(100)
    ));
    assert_eq!(err.category(), ErrorCategory::BusinessRule);

    assert_eq!(h.balance(OWNER).await, dec!(100));
    assert_eq!(h.transaction_count(OWNER).await, 0);
    let wallet_id = h.wallet_id(OWNER).await;
    assert!(h.store.holdings(wallet_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn spending_the_exact_balance_is_allowed() {
    let h = Harness::with_wallet(dec!(100)).await;
    let receipt = h.engine.buy(OWNER, "AAPL", "2").await.unwrap();
    assert_eq!(receipt.balance, Decimal::ZERO);
}

#[tokio::test]
async fn overselling_is_rejected_without_mutation() {
    let h = Harness::with_wallet(dec!(1000)).await;
    h.engine.buy(OWNER, "AAPL", "2").await.unwrap();

    let err = h.engine.sell(OWNER, "AAPL", "3").await.unwrap_err();
    assert!(matches!(
        err,
        TradeError::InsufficientPosition { requested, available }
            if requested == dec!(3) && available == dec!(2)
    ));

    assert_eq!(h.balance(OWNER).await, dec!(900));
    assert_eq!(h.transaction_count(OWNER).await, 1);
    let wallet_id = h.wallet_id(OWNER).await;
    assert_eq!(h.store.holdings(wallet_id).await.unwrap()[0].quantity, dec!(2));
}

#[tokio::test]
async fn selling_an_unheld_symbol_is_no_such_position() {
    let h = Harness::with_wallet(dec!(1000)).await;
    let err = h.engine.sell(OWNER, "BTC", "1").await.unwrap_err();
    assert!(matches!(err, TradeError::NoSuchPosition(symbol) if symbol == "BTC"));
}

#[tokio::test]
async fn missing_wallet_is_reported() {
    let h = Harness::new(MemoryLedgerStore::default(), EngineSettings::default());
    let err = h.engine.buy(99, "AAPL", "1").await.unwrap_err();
    assert!(matches!(err, TradeError::WalletNotFound(99)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn malformed_quantities_are_rejected_before_any_io() {
    let h = Harness::with_wallet(dec!(1000)).await;

    for quantity in ["", "abc", "0", "-1", "0.000000001", "NaN", "1.2.3"] {
        let err = h.engine.buy(OWNER, "AAPL", quantity).await.unwrap_err();
        assert!(
            matches!(err, TradeError::InvalidQuantity { .. }),
            "quantity {quantity:?} gave {err:?}"
        );
        assert_eq!(err.category(), ErrorCategory::Validation);
    }
    let err = h.engine.sell(OWNER, "AAPL", "-2").await.unwrap_err();
    assert!(matches!(err, TradeError::InvalidQuantity { .. }));

    assert_eq!(h.oracle.calls(), 0);
}

#[tokio::test]
async fn bad_symbols_and_owners_are_rejected_before_any_io() {
    let h = Harness::with_wallet(dec!(1000)).await;

    let err = h.engine.buy(OWNER, "  ", "1").await.unwrap_err();
    assert!(matches!(err, TradeError::InvalidSymbol(_)));
    let err = h.engine.buy(OWNER, "AA PL", "1").await.unwrap_err();
    assert!(matches!(err, TradeError::InvalidSymbol(_)));
    let err = h.engine.buy(0, "AAPL", "1").await.unwrap_err();
    assert!(matches!(err, TradeError::Unauthorized(0)));

    assert_eq!(h.oracle.calls(), 0);
}

#[tokio::test]
async fn oracle_failure_aborts_before_locking() {
    let h = Harness::with_wallet(dec!(1000)).await;
    h.oracle
        .set_failure("AAPL", OracleError::MarketUnavailable("exchange closed".to_string()))
        .await;

    let err = h.engine.buy(OWNER, "AAPL", "1").await.unwrap_err();
    assert!(matches!(err, TradeError::MarketUnavailable { .. }));
    assert_eq!(err.category(), ErrorCategory::Market);
    assert!(err.is_retryable());

    let err = h.engine.buy(OWNER, "DOGE", "1").await.unwrap_err();
    assert!(matches!(
        err,
        TradeError::MarketUnavailable { source: OracleError::InvalidSymbol(_), .. }
    ));

    assert_eq!(h.balance(OWNER).await, dec!(1000));
    assert_eq!(h.transaction_count(OWNER).await, 0);
    assert_eq!(h.oracle.calls(), 2);
}

#[tokio::test]
async fn slow_oracle_times_out_as_market_unavailable() {
    let h = Harness::new(
        MemoryLedgerStore::default(),
        EngineSettings {
            oracle_timeout: Duration::from_millis(50),
            store_deadline: Duration::from_secs(5),
        },
    );
    h.store.open_wallet(OWNER, dec!(1000)).await.unwrap();
    h.oracle.set_latency(Duration::from_secs(2)).await;

    let err = h.engine.buy(OWNER, "AAPL", "1").await.unwrap_err();
    assert!(matches!(err, TradeError::MarketUnavailable { .. }));
    assert_eq!(h.balance(OWNER).await, dec!(1000));
}

#[tokio::test]
async fn oracle_is_called_once_per_order() {
    let h = Harness::with_wallet(dec!(1000)).await;
    h.engine.buy(OWNER, "AAPL", "1").await.unwrap();
    h.engine.sell(OWNER, "AAPL", "1").await.unwrap();
    assert_eq!(h.oracle.calls(), 2);
}

#[tokio::test]
async fn storage_fault_mid_buy_rolls_everything_back() {
    let h = Harness::with_wallet(dec!(1000)).await;
    h.store.inject(Fault::Fail(FaultPoint::AppendTransaction)).await;

    let err = h.engine.buy(OWNER, "AAPL", "2").await.unwrap_err();
    assert!(matches!(err, TradeError::Storage(DbError::InjectedFault(_))));
    assert_eq!(err.category(), ErrorCategory::Persistence);
    assert!(err.is_retryable());

    assert_eq!(h.balance(OWNER).await, dec!(1000));
    assert_eq!(h.transaction_count(OWNER).await, 0);
    let wallet_id = h.wallet_id(OWNER).await;
    assert!(h.store.holdings(wallet_id).await.unwrap().is_empty());

    // The same order succeeds once the fault is gone.
    let receipt = h.engine.buy(OWNER, "AAPL", "2").await.unwrap();
    assert_eq!(receipt.balance, dec!(900));
}

#[tokio::test]
async fn commit_failure_on_sell_keeps_the_position() {
    let h = Harness::with_wallet(dec!(1000)).await;
    h.engine.buy(OWNER, "AAPL", "2").await.unwrap();
    h.store.inject(Fault::Fail(FaultPoint::Commit)).await;

    let err = h.engine.sell(OWNER, "AAPL", "2").await.unwrap_err();
    assert!(matches!(err, TradeError::Storage(_)));

    let wallet_id = h.wallet_id(OWNER).await;
    assert_eq!(h.store.holdings(wallet_id).await.unwrap()[0].quantity, dec!(2));
    assert_eq!(h.balance(OWNER).await, dec!(900));
    assert_eq!(h.transaction_count(OWNER).await, 1);
}

#[tokio::test]
async fn stalled_storage_exceeds_the_deadline_and_rolls_back() {
    let h = Harness::new(
        MemoryLedgerStore::default(),
        EngineSettings {
            oracle_timeout: Duration::from_secs(1),
            store_deadline: Duration::from_millis(100),
        },
    );
    h.store.open_wallet(OWNER, dec!(1000)).await.unwrap();
    h.store
        .inject(Fault::Stall(FaultPoint::WriteHolding, Duration::from_secs(2)))
        .await;

    let err = h.engine.buy(OWNER, "AAPL", "2").await.unwrap_err();
    assert!(matches!(err, TradeError::DeadlineExceeded(_)));
    assert!(err.is_retryable());
    assert_eq!(h.balance(OWNER).await, dec!(1000));
    assert_eq!(h.transaction_count(OWNER).await, 0);

    // The abandoned unit of work released its wallet lock.
    let receipt = h.engine.buy(OWNER, "AAPL", "2").await.unwrap();
    assert_eq!(receipt.balance, dec!(900));
}

#[tokio::test]
async fn locked_wallet_times_out_but_other_wallets_proceed() {
    let h = Harness::new(
        MemoryLedgerStore::new(Duration::from_millis(100)),
        EngineSettings::default(),
    );
    h.store.open_wallet(1, dec!(1000)).await.unwrap();
    h.store.open_wallet(2, dec!(1000)).await.unwrap();

    let mut blocker = h.store.begin().await.unwrap();
    blocker.lock_wallet_for_update(1).await.unwrap();

    let other = h.engine.buy(2, "AAPL", "1").await.unwrap();
    assert_eq!(other.balance, dec!(950));

    let err = h.engine.buy(1, "AAPL", "1").await.unwrap_err();
    assert!(matches!(err, TradeError::Storage(DbError::LockTimeout(_))));
    assert!(err.is_retryable());

    blocker.rollback().await.unwrap();
    let receipt = h.engine.buy(1, "AAPL", "1").await.unwrap();
    assert_eq!(receipt.balance, dec!(950));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_buys_on_one_wallet_serialize() {
    let h = Arc::new(Harness::with_wallet(dec!(100)).await);
    h.oracle.set_price("AAPL", dec!(10)).await;

    let orders = (0..20).map(|_| {
        let h = h.clone();
        tokio::spawn(async move { h.engine.buy(OWNER, "AAPL", "1").await })
    });
    let results = futures::future::join_all(orders).await;

    let mut filled = 0;
    let mut rejected = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => filled += 1,
            Err(TradeError::InsufficientBalance { .. }) => rejected += 1,
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }
    assert_eq!(filled, 10);
    assert_eq!(rejected, 10);

    let wallet_id = h.wallet_id(OWNER).await;
    assert_eq!(h.balance(OWNER).await, Decimal::ZERO);
    let holdings = h.store.holdings(wallet_id).await.unwrap();
    assert_eq!(holdings[0].quantity, dec!(10));
    assert_eq!(holdings[0].average_buy_price, dec!(10));
    assert_eq!(h.transaction_count(OWNER).await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sells_never_oversell() {
    let h = Arc::new(Harness::with_wallet(dec!(1000)).await);
    h.engine.buy(OWNER, "AAPL", "5").await.unwrap();

    let orders = (0..12).map(|_| {
        let h = h.clone();
        tokio::spawn(async move { h.engine.sell(OWNER, "AAPL", "1").await })
    });
    let results = futures::future::join_all(orders).await;

    let filled = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    assert_eq!(filled, 5);

    let wallet_id = h.wallet_id(OWNER).await;
    assert!(h.store.holdings(wallet_id).await.unwrap().is_empty());
    assert_eq!(h.balance(OWNER).await, dec!(1000));
    assert_eq!(h.transaction_count(OWNER).await, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn interleaved_buys_and_sells_reconcile() {
    let initial = dec!(100000);
    let h = Arc::new(Harness::with_wallet(initial).await);
    h.oracle.set_price("BTC", dec!(3.33333333)).await;

    let orders = (0..200).map(|i| {
        let h = h.clone();
        tokio::spawn(async move {
            if i % 3 == 2 {
                h.engine.sell(OWNER, "BTC", "0.7").await.map(|_| ())
            } else {
                h.engine.buy(OWNER, "BTC", "0.3").await.map(|_| ())
            }
        })
    });
    for result in futures::future::join_all(orders).await {
        match result.unwrap() {
            Ok(()) | Err(TradeError::InsufficientPosition { .. }) | Err(TradeError::NoSuchPosition(_)) => {}
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    let wallet_id = h.wallet_id(OWNER).await;
    let history = h.store.transactions(wallet_id).await.unwrap();
    let sum = |side: Side, field: fn(&Transaction) -> Decimal| -> Decimal {
        history.iter().filter(|t| t.side == side).map(field).sum()
    };

    let bought = sum(Side::Buy, |t| t.total_amount);
    let sold = sum(Side::Sell, |t| t.total_amount);
    assert_eq!(h.balance(OWNER).await, initial - bought + sold);

    let holdings = h.store.holdings(wallet_id).await.unwrap();
    assert!(holdings.iter().all(|holding| holding.quantity > Decimal::ZERO));
    let held: Decimal = holdings.iter().map(|holding| holding.quantity).sum();
    assert_eq!(
        held,
        sum(Side::Buy, |t| t.quantity) - sum(Side::Sell, |t| t.quantity)
    );
}

#[tokio::test]
async fn sell_worth_nothing_after_rounding_is_rejected() {
    let h = Harness::with_wallet(dec!(10)).await;
    h.oracle.set_price("BTC", dec!(0.00000001)).await;
    h.engine.buy(OWNER, "BTC", "1").await.unwrap();

    let err = h.engine.sell(OWNER, "BTC", "0.1").await.unwrap_err();
    assert!(matches!(err, TradeError::InvalidQuantity { .. }));
    assert_eq!(err.category(), ErrorCategory::Validation);

    let wallet_id = h.wallet_id(OWNER).await;
    let holdings = h.store.holdings(wallet_id).await.unwrap();
    assert_eq!(holdings[0].quantity, dec!(1));
    assert_eq!(h.balance(OWNER).await, dec!(9.99999999));
    assert_eq!(h.transaction_count(OWNER).await, 1);
}

#[tokio::test]
async fn cash_and_pnl_reconcile_against_history() {
    let initial = dec!(100000);
    let h = Harness::with_wallet(initial).await;

    for (side, price, quantity) in [
        (Side::Buy, dec!(50), "2"),
        (Side::Buy, dec!(60), "3"),
        (Side::Sell, dec!(70), "1"),
        (Side::Buy, dec!(46), "4"),
        (Side::Sell, dec!(60), "8"),
    ] {
        h.oracle.set_price("AAPL", price).await;
        match side {
            Side::Buy => {
                h.engine.buy(OWNER, "AAPL", quantity).await.unwrap();
            }
            Side::Sell => {
                h.engine.sell(OWNER, "AAPL", quantity).await.unwrap();
            }
        }
    }

    let wallet_id = h.wallet_id(OWNER).await;
    let history = h.store.transactions(wallet_id).await.unwrap();
    let total = |side: Side| -> Decimal {
        history
            .iter()
            .filter(|t| t.side == side)
            .map(|t| t.total_amount)
            .sum()
    };
    let bought = total(Side::Buy);
    let sold = total(Side::Sell);
    let pnl: Decimal = history.iter().map(|t| t.realized_pnl).sum();
    let final_balance = h.balance(OWNER).await;

    assert_eq!(bought, dec!(464));
    assert_eq!(sold, dec!(550));
    assert_eq!(pnl, dec!(86));
    assert_eq!(bought - sold, initial - final_balance);
    // Once flat, everything bought was sold: the P&L is proceeds over cost.
    assert_eq!(sold - pnl, bought);
}
