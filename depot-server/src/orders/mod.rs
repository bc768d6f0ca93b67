//! Orders: lifecycle state machine, courier runs and their stock effects

pub mod manager;
pub mod pricing;
pub mod state_machine;

pub use manager::{OrderError, OrderResult, OrdersManager};
