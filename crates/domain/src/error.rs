//! Domain error types.

use common::{ServiceDay, UnknownStatus};
use store::StoreError;
use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An order or ticket does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The cart was rejected.
    #[error("Order error: {0}")]
    Order(OrderError),

    /// The requested status change is not allowed.
    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// A status name could not be parsed.
    #[error(transparent)]
    UnknownStatus(#[from] UnknownStatus),

    /// No ticket could be issued within the attempt budget.
    ///
    /// `last_error` is the store failure of the final attempt.
    #[error("Could not issue a ticket for {service_day} after {attempts} attempts")]
    SequenceExhausted {
        service_day: ServiceDay,
        attempts: u32,
        #[source]
        last_error: StoreError,
    },

    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<OrderError> for DomainError {
    fn from(e: OrderError) -> Self {
        DomainError::Order(e)
    }
}

/// Coarse classification of a [`DomainError`] for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ProductInactive,
    InsufficientStock,
    InvalidInput,
    InvalidTransition,
    SequenceConflict,
    StorageFailure,
}

impl ErrorKind {
    /// Returns a short label, used as a metrics dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ProductInactive => "product_inactive",
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::SequenceConflict => "sequence_conflict",
            ErrorKind::StorageFailure => "storage_failure",
        }
    }
}

impl DomainError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::NotFound { .. } => ErrorKind::NotFound,
            DomainError::Order(err) => match err {
                OrderError::ProductNotFound { .. } => ErrorKind::NotFound,
                OrderError::ProductInactive { .. } => ErrorKind::ProductInactive,
                OrderError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
                OrderError::InvalidQuantity { .. }
                | OrderError::TooFewLineItems { .. }
                | OrderError::AmountOverflow => ErrorKind::InvalidInput,
            },
            DomainError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            DomainError::UnknownStatus(_) => ErrorKind::InvalidInput,
            DomainError::SequenceExhausted {
                last_error: StoreError::SequenceConflict { .. },
                ..
            } => ErrorKind::SequenceConflict,
            DomainError::SequenceExhausted { .. } => ErrorKind::StorageFailure,
            DomainError::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            DomainError::Store(StoreError::SequenceConflict { .. }) => ErrorKind::SequenceConflict,
            DomainError::Store(_) => ErrorKind::StorageFailure,
        }
    }

    /// Returns true if submitting the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DomainError::SequenceExhausted { .. } => true,
            DomainError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
