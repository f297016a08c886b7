use thiserror::Error;

/// Why a quote could not be produced. Every variant is surfaced to the caller
/// as a market failure; none of them is retried inside the oracle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Market data unavailable: {0}")]
    MarketUnavailable(String),

    #[error("The price source does not know symbol '{0}'")]
    InvalidSymbol(String),

    #[error("The price source returned an unusable quote: {0}")]
    InvalidPrice(String),
}

impl From<reqwest::Error> for OracleError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OracleError::MarketUnavailable("quote request timed out".to_string())
        } else {
            OracleError::MarketUnavailable(e.to_string())
        }
    }
}
