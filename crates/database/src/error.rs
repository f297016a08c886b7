use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    #[error("Database query failed: {0}")]
    QueryError(sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Timed out waiting for a row lock: {0}")]
    LockTimeout(String),

    #[error("A write violated a ledger constraint: {0}")]
    ConstraintViolation(String),

    #[error("A stored row could not be decoded: {0}")]
    CorruptRow(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("The requested data was not found in the database.")]
    NotFound,

    #[error("Injected storage fault at {0}")]
    InjectedFault(String),
}

// Postgres SQLSTATE codes that get their own variant.
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";
const CHECK_VIOLATION: &str = "23514";
const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = e {
            return DbError::NotFound;
        }
        if matches!(e, sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) {
            return DbError::CorruptRow(e.to_string());
        }
        if let Some(db) = e.as_database_error() {
            let message = db.message().to_string();
            match db.code().as_deref() {
                Some(LOCK_NOT_AVAILABLE) | Some(QUERY_CANCELED) => {
                    return DbError::LockTimeout(message);
                }
                Some(CHECK_VIOLATION) | Some(UNIQUE_VIOLATION) => {
                    return DbError::ConstraintViolation(message);
                }
                _ => {}
            }
        }
        DbError::QueryError(e)
    }
}
