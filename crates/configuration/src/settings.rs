use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::time::Duration;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the PostgreSQL ledger store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Falls back to the `DATABASE_URL` environment variable when unset.
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// Market data sources and the bound on every quote request.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Upper bound on a single price request. Must be single-digit seconds.
    pub timeout_secs: u64,
    /// Spot ticker endpoint used for crypto symbols.
    pub binance_base_url: String,
    /// Quote endpoint used for equity symbols.
    pub finnhub_base_url: String,
    pub finnhub_api_key: String,
    /// Crypto symbols are quoted against this asset (e.g. BTC -> BTCUSDT).
    pub quote_asset: String,
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            binance_base_url: "https://api.binance.com".to_string(),
            finnhub_base_url: "https://finnhub.io".to_string(),
            finnhub_api_key: String::new(),
            quote_asset: "USDT".to_string(),
        }
    }
}

/// Parameters of the trade ledger itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Cash credited to a newly opened wallet.
    pub initial_balance: Decimal,
    /// Deadline for everything that happens between opening a unit of work and committing it.
    pub store_deadline_secs: u64,
    /// How long an order waits for another order's row lock before giving up.
    pub lock_timeout_secs: u64,
    /// Symbols priced from the equity source. Everything else is treated as crypto.
    pub stock_symbols: Vec<String>,
    pub history_page_size: u32,
}

impl LedgerConfig {
    pub fn store_deadline(&self) -> Duration {
        Duration::from_secs(self.store_deadline_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(100000),
            store_deadline_secs: 10,
            lock_timeout_secs: 5,
            stock_symbols: ["AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "NVDA", "META", "NFLX"]
                .into_iter()
                .map(String::from)
                .collect(),
            history_page_size: 10,
        }
    }
}

/// Where and how verbosely the application logs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}
