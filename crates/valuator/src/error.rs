use database::DbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValuatorError {
    #[error("No wallet exists for owner {0}")]
    WalletNotFound(i64),

    #[error("Failed to read the ledger: {0}")]
    Database(#[from] DbError),
}
