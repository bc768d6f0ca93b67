//! Data models
//!
//! Shared between depot-server and its clients (via API / realtime channel).
//! Entity IDs are `i64` values allocated from redb counters; ledger movement
//! ids and message sequences are monotonic `u64` counters.

pub mod account;
pub mod chat;
pub mod delivery;
pub mod order;
pub mod product;
pub mod stock;

// Re-exports
pub use account::*;
pub use chat::*;
pub use delivery::*;
pub use order::*;
pub use product::*;
pub use stock::*;
