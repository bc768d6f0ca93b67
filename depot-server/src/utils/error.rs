//! 统一错误处理
//!
//! 错误类型统一来自 `shared::error`：
//! - [`AppError`] - 应用错误 (ErrorCode + message + details)
//! - [`ApiResponse`] - API 响应结构
//!
//! 各子系统的 thiserror 错误 (StockError / OrderError / ChatError ...)
//! 通过 `From` 转换为 [`AppError`]，由 axum 渲染为
//! `{"code", "kind", "message", "details"}`。
//!
//! # 使用示例
//!
//! ```ignore
//! // 返回错误
//! Err(AppError::not_found("Order 42"))
//!
//! // 子系统错误直接 `?`
//! let order = state.orders.get_order(id)?;
//! ```

pub use shared::error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
