use thiserror::Error;

/// Errors raised by a [`Store`](super::Store) implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database rejected or failed the query
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migrations could not be applied
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored column held a value this service does not understand
    #[error("invalid value {value:?} in column {column}")]
    InvalidValue { column: &'static str, value: String },
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
