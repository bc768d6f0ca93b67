//! Shared types for the depot back-office
//!
//! Common types used by the depot server and its clients: domain models,
//! the realtime chat protocol, the unified error system and small utilities.

pub mod error;
pub mod models;
pub mod realtime;
pub mod util;

// Re-exports
pub use axum::{Json, body};
pub use error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
pub use http;
pub use serde::{Deserialize, Serialize};

// Realtime re-exports (for convenient access)
pub use realtime::{ClientEvent, ServerEvent};
