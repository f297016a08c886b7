use crate::error::ConfigError;
use core_types::LEDGER_LIMIT;
use rust_decimal::Decimal;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::init_tracing;
pub use settings::{Config, DatabaseConfig, LedgerConfig, LoggingConfig, OracleConfig};

/// Loads the application configuration from `config.toml` and the environment.
///
/// The file is optional. Any key can be overridden with an environment variable
/// prefixed `STONKS__`, e.g. `STONKS__ORACLE__TIMEOUT_SECS=3` or
/// `STONKS__LEDGER__STOCK_SYMBOLS=AAPL,MSFT`.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from("config.toml")
}

/// Same as [`load_config`] but reads the given file instead of `config.toml`.
pub fn load_config_from(path: &str) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("STONKS")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("ledger.stock_symbols")
                .try_parsing(true),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    validate(&config)?;
    Ok(config)
}

/// Rejects configurations the engine cannot honour.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if !(1..=9).contains(&config.oracle.timeout_secs) {
        return Err(ConfigError::ValidationError(format!(
            "oracle.timeout_secs must be between 1 and 9, got {}",
            config.oracle.timeout_secs
        )));
    }
    if config.ledger.initial_balance < Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "ledger.initial_balance cannot be negative".to_string(),
        ));
    }
    if config.ledger.initial_balance >= LEDGER_LIMIT {
        return Err(ConfigError::ValidationError(
            "ledger.initial_balance exceeds the ledger range".to_string(),
        ));
    }
    if config.ledger.store_deadline_secs == 0 || config.ledger.lock_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "ledger deadlines must be at least one second".to_string(),
        ));
    }
    if config.ledger.lock_timeout_secs > config.ledger.store_deadline_secs {
        return Err(ConfigError::ValidationError(
            "ledger.lock_timeout_secs cannot exceed ledger.store_deadline_secs".to_string(),
        ));
    }
    if config.ledger.history_page_size == 0 {
        return Err(ConfigError::ValidationError(
            "ledger.history_page_size must be positive".to_string(),
        ));
    }
    if config.oracle.quote_asset.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "oracle.quote_asset cannot be empty".to_string(),
        ));
    }
    Ok(())
}
