use common::{ProductId, ServiceDay};
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row that had to exist for a write was missing.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Another ticket already holds this number for the service day.
    #[error("Ticket number {sequence_number} is already taken for service day {service_day}")]
    SequenceConflict {
        service_day: ServiceDay,
        sequence_number: u32,
    },

    /// A conditional stock decrement found less stock than expected.
    #[error("Stock for product {product_id} changed during the unit of work")]
    StockConflict { product_id: ProductId },

    /// A statement or connection acquisition exceeded its deadline.
    #[error("Storage operation timed out")]
    Timeout,

    /// The store refused the operation.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A persisted value could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true if re-running the whole unit of work may succeed.
    ///
    /// Covers ticket number collisions, stock races, timeouts, and the
    /// PostgreSQL serialization failure (`40001`) and deadlock (`40P01`)
    /// codes.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::SequenceConflict { .. }
            | StoreError::StockConflict { .. }
            | StoreError::Timeout => true,
            StoreError::Database(err) => match err {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(db_err) => {
                    matches!(db_err.code().as_deref(), Some("40001" | "40P01" | "57014"))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // 57014 is query_canceled, raised when statement_timeout fires
        let timed_out = match &err {
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("57014"),
            _ => false,
        };
        if timed_out {
            StoreError::Timeout
        } else {
            StoreError::Database(err)
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
