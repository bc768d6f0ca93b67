//! Inventory: bucket manager, movement ledger and reconciliation
//!
//! - [`InventoryStorage`] - redb tables (products, ledger, orders, runs)
//! - [`StockManager`] - the only writer of bucket values
//! - [`Reconciler`] - read-only audit plus explicit correction

pub mod buckets;
pub mod error;
pub mod movement;
pub mod reconcile;
pub mod storage;

pub use buckets::{MovementContext, StockManager};
pub use error::{StockError, StockResult};
pub use reconcile::{Reconciler, holds_local_reservation};
pub use storage::{InventoryStorage, StorageError, StorageResult};
