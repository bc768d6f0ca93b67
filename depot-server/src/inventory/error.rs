use shared::models::Bucket;
use shared::{AppError, ErrorCode};
use thiserror::Error;

use super::storage::StorageError;

/// 库存操作错误
#[derive(Debug, Error)]
pub enum StockError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Product not found: {0}")]
    ProductNotFound(i64),

    #[error("Product code already exists: {0}")]
    ProductCodeExists(String),

    #[error(
        "Insufficient stock for product {product_id}: {bucket} has {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: i64,
        bucket: Bucket,
        available: i64,
        requested: i64,
    },
}

pub type StockResult<T> = Result<T, StockError>;

impl From<StockError> for AppError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::Storage(e) => {
                tracing::error!(error = %e, "Inventory storage failure");
                AppError::database(e.to_string())
            }
            StockError::Validation(msg) => AppError::validation(msg),
            StockError::ProductNotFound(id) => {
                AppError::with_message(ErrorCode::ProductNotFound, format!("Product {} not found", id))
                    .with_detail("product_id", id)
            }
            StockError::ProductCodeExists(code) => AppError::with_message(
                ErrorCode::ProductCodeExists,
                format!("Product code '{}' already exists", code),
            )
            .with_detail("code", code),
            StockError::InsufficientStock {
                product_id,
                bucket,
                available,
                requested,
            } => AppError::insufficient_stock(format!(
                "Insufficient stock: {} has {}, requested {}",
                bucket, available, requested
            ))
            .with_detail("product_id", product_id)
            .with_detail("bucket", bucket.as_str())
            .with_detail("available", available)
            .with_detail("requested", requested),
        }
    }
}
