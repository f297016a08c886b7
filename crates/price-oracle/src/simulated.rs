use crate::PriceOracle;
use crate::error::OracleError;
use crate::source::validate_quote;
use async_trait::async_trait;
use core_types::InstrumentClass;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct QuoteBoard {
    quotes: HashMap<String, Result<Decimal, OracleError>>,
    latency: Option<Duration>,
}

/// An in-process oracle that answers from a fixed quote board.
///
/// Used for paper sessions and tests: prices, failures and response latency are
/// all set explicitly, and every request is counted.
#[derive(Debug, Default)]
pub struct StaticPriceOracle {
    board: RwLock<QuoteBoard>,
    calls: AtomicUsize,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an oracle that already quotes the given symbols.
    pub fn with_prices<'a, I>(prices: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Decimal)>,
    {
        let quotes = prices
            .into_iter()
            .map(|(symbol, price)| (symbol.to_string(), Ok(price)))
            .collect();
        Self {
            board: RwLock::new(QuoteBoard { quotes, latency: None }),
            calls: AtomicUsize::new(0),
        }
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.board.write().await.quotes.insert(symbol.to_string(), Ok(price));
    }

    /// Makes every subsequent request for `symbol` fail with `error`.
    pub async fn set_failure(&self, symbol: &str, error: OracleError) {
        self.board.write().await.quotes.insert(symbol.to_string(), Err(error));
    }

    /// Delays every answer, e.g. to exercise request timeouts.
    pub async fn set_latency(&self, latency: Duration) {
        self.board.write().await.latency = Some(latency);
    }

    /// How many quotes have been requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn get_price(&self, symbol: &str, _class: InstrumentClass) -> Result<Decimal, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let (quote, latency) = {
            let board = self.board.read().await;
            (board.quotes.get(symbol).cloned(), board.latency)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match quote {
            Some(Ok(price)) => validate_quote(symbol, price),
            Some(Err(error)) => Err(error),
            None => Err(OracleError::InvalidSymbol(symbol.to_string())),
        }
    }
}
