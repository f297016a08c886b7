use core_types::CoreError;
use database::DbError;
use price_oracle::OracleError;
use rust_decimal::Decimal;
use thiserror::Error;

/// The four kinds of order failure callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed input, rejected before any I/O.
    Validation,
    /// The price could not be obtained.
    Market,
    /// The ledger state does not allow the order.
    BusinessRule,
    /// Storage failed or timed out; the unit of work was rolled back.
    Persistence,
}

#[derive(Error, Debug)]
pub enum TradeError {
    #[error("Invalid quantity '{quantity}': {reason}")]
    InvalidQuantity { quantity: String, reason: String },

    #[error("Invalid symbol '{0}'")]
    InvalidSymbol(String),

    #[error("Caller is not authorised to trade for owner {0}")]
    Unauthorized(i64),

    #[error("Market price unavailable for {symbol}: {source}")]
    MarketUnavailable {
        symbol: String,
        #[source]
        source: OracleError,
    },

    #[error("No wallet exists for owner {0}")]
    WalletNotFound(i64),

    #[error("Not enough cash available to execute trade. Required: {required}, Available: {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("No open position for symbol: {0}")]
    NoSuchPosition(String),

    #[error("Not enough quantity held to sell. Requested: {requested}, Available: {available}")]
    InsufficientPosition { requested: Decimal, available: Decimal },

    #[error("Storage failure: {0}")]
    Storage(#[from] DbError),

    #[error("The order did not settle within {0:?}")]
    DeadlineExceeded(std::time::Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TradeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TradeError::InvalidQuantity { .. } | TradeError::InvalidSymbol(_) | TradeError::Unauthorized(_) => {
                ErrorCategory::Validation
            }
            TradeError::MarketUnavailable { .. } => ErrorCategory::Market,
            TradeError::WalletNotFound(_)
            | TradeError::InsufficientBalance { .. }
            | TradeError::NoSuchPosition(_)
            | TradeError::InsufficientPosition { .. } => ErrorCategory::BusinessRule,
            TradeError::Storage(_) | TradeError::DeadlineExceeded(_) | TradeError::Internal(_) => {
                ErrorCategory::Persistence
            }
        }
    }

    /// Whether resubmitting the same order may succeed. Nothing is retried internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Market | ErrorCategory::Persistence)
    }
}

impl From<CoreError> for TradeError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidQuantity(quantity, reason) => TradeError::InvalidQuantity { quantity, reason },
            CoreError::InvalidSymbol(symbol) => TradeError::InvalidSymbol(symbol),
            CoreError::InvalidInput(field, reason) => TradeError::Internal(format!("{field}: {reason}")),
            CoreError::Calculation(reason) => TradeError::Internal(reason),
        }
    }
}
