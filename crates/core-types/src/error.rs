use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),

    #[error("Invalid quantity '{0}': {1}")]
    InvalidQuantity(String, String),

    #[error("Invalid symbol '{0}'")]
    InvalidSymbol(String),

    #[error("Calculation error: {0}")]
    Calculation(String),
}
