use thiserror::Error;

use crate::domain::MovementType;

/// Coarse classification a transport layer maps to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The addressed entity does not exist (404)
    NotFound,
    /// The request was malformed before any state was touched (400)
    InvalidInput,
    /// The request conflicts with current state (409)
    Conflict,
    /// Storage failure; details are logged, not exposed (500)
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Stock movement not found: {0}")]
    MovementNotFound(String),

    #[error("Billing batch not found: {0}")]
    BillingNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Barcode already in use: {0}")]
    DuplicateBarcode(String),

    #[error("Transaction is already billed and can no longer be changed")]
    AlreadyBilled,

    #[error("Transaction is already cancelled")]
    AlreadyCancelled,

    #[error("Stock of '{product}' cannot go negative (current {current}, delta {delta})")]
    NegativeStock {
        product: String,
        current: i64,
        delta: i64,
    },

    #[error("Movements of type '{0}' cannot be deleted")]
    ProtectedMovement(MovementType),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::AccountNotFound(_)
            | AppError::ProductNotFound(_)
            | AppError::TransactionNotFound(_)
            | AppError::MovementNotFound(_)
            | AppError::BillingNotFound(_) => ErrorKind::NotFound,
            AppError::InvalidInput(_) => ErrorKind::InvalidInput,
            AppError::DuplicateBarcode(_)
            | AppError::AlreadyBilled
            | AppError::AlreadyCancelled
            | AppError::NegativeStock { .. }
            | AppError::ProtectedMovement(_) => ErrorKind::Conflict,
            AppError::Database(_) => ErrorKind::Internal,
        }
    }
}
