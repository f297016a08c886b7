//! # Stonks Price Oracle
//!
//! The leaf adapter that turns a symbol into a current market price.
//!
//! ## Public API
//!
//! - `PriceOracle`: the contract the trade engine and the portfolio valuator consume.
//! - `HttpPriceOracle`: quotes crypto from Binance and equities from Finnhub, with a
//!   bounded request timeout.
//! - `StaticPriceOracle`: an in-process quote board for paper sessions and tests.
//! - `InstrumentRoster`: classifies a symbol as STOCK or CRYPTO.
//! - `OracleError`: `MarketUnavailable`, `InvalidSymbol`, `InvalidPrice`.

use async_trait::async_trait;
use configuration::OracleConfig;
use core_types::InstrumentClass;
use rust_decimal::Decimal;
use std::time::Duration;

pub mod error;
pub mod responses;
pub mod roster;
pub mod simulated;
pub mod source;

// --- Public API ---
pub use error::OracleError;
pub use roster::InstrumentRoster;
pub use simulated::StaticPriceOracle;
pub use source::{PriceSource, validate_quote};

/// The abstract interface for a market price source.
///
/// Implementations return a strictly positive price at the ledger scale, or a
/// typed failure. They never retry internally.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_price(&self, symbol: &str, class: InstrumentClass) -> Result<Decimal, OracleError>;
}

/// Quotes live prices over HTTP, picking the [`PriceSource`] by instrument class.
#[derive(Debug, Clone)]
pub struct HttpPriceOracle {
    client: reqwest::Client,
    crypto: PriceSource,
    equity: PriceSource,
    timeout: Duration,
}

impl HttpPriceOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, OracleError> {
        let timeout = config.timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| OracleError::MarketUnavailable(format!("failed to build HTTP client: {e}")))?;

        if config.finnhub_api_key.is_empty() {
            tracing::warn!("No Finnhub API key configured; equity quotes will be unavailable.");
        }

        Ok(Self {
            client,
            crypto: PriceSource::for_class(InstrumentClass::Crypto, config),
            equity: PriceSource::for_class(InstrumentClass::Stock, config),
            timeout,
        })
    }

    fn source_for(&self, class: InstrumentClass) -> &PriceSource {
        match class {
            InstrumentClass::Crypto => &self.crypto,
            InstrumentClass::Stock => &self.equity,
        }
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn get_price(&self, symbol: &str, class: InstrumentClass) -> Result<Decimal, OracleError> {
        let source = self.source_for(class);
        tracing::debug!(symbol, %class, source = source.name(), "Requesting quote");

        // The client timeout covers each request; this bounds the whole exchange,
        // including reading the body.
        let price = tokio::time::timeout(self.timeout, source.fetch(&self.client, symbol))
            .await
            .map_err(|_| OracleError::MarketUnavailable("quote request timed out".to_string()))??;

        tracing::debug!(symbol, %price, source = source.name(), "Received quote");
        Ok(price)
    }
}
