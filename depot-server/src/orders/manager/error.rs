use shared::models::OrderStatus;
use shared::{AppError, ErrorCode};
use thiserror::Error;

use crate::inventory::{StockError, StorageError};

/// Order / courier run errors
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Order not found: {0}")]
    OrderNotFound(i64),

    #[error("Courier run not found: {0}")]
    RunNotFound(i64),

    #[error("Order reference already exists: {0}")]
    ReferenceExists(String),

    #[error("Invalid transition {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Edge exists but a precondition blocks it (run state, status for edit, ...)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type OrderResult<T> = Result<T, OrderError>;

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Storage(e) => {
                tracing::error!(error = %e, "Order storage failure");
                AppError::database(e.to_string())
            }
            OrderError::Stock(e) => e.into(),
            OrderError::Validation(msg) => AppError::validation(msg),
            OrderError::OrderNotFound(id) => {
                AppError::with_message(ErrorCode::OrderNotFound, format!("Order {} not found", id))
                    .with_detail("order_id", id)
            }
            OrderError::RunNotFound(id) => {
                AppError::with_message(ErrorCode::RunNotFound, format!("Courier run {} not found", id))
                    .with_detail("run_id", id)
            }
            OrderError::ReferenceExists(reference) => AppError::with_message(
                ErrorCode::OrderReferenceExists,
                format!("Order reference '{}' already exists", reference),
            ),
            OrderError::InvalidTransition { from, to } => {
                AppError::invalid_transition(format!("Cannot move order from {} to {}", from, to))
                    .with_detail("from", from.as_str())
                    .with_detail("to", to.as_str())
            }
            OrderError::InvalidOperation(msg) => AppError::invalid_transition(msg),
        }
    }
}
