//! Courier run (delivery list)

use serde::{Deserialize, Serialize};

/// Orders assigned to one deliverer for one run.
///
/// `handoff_confirmed` attests that the goods left the warehouse with the
/// courier; `return_confirmed` attests that undelivered goods came back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierRun {
    pub id: i64,
    pub deliverer_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub handoff_confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_confirmed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_confirmed_by: Option<i64>,
    pub return_confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_confirmed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_confirmed_by: Option<i64>,
    pub created_by: i64,
    pub created_at: i64,
}

impl CourierRun {
    /// Goods are out with the courier: local reservations are held
    pub fn holds_stock(&self) -> bool {
        self.handoff_confirmed && !self.return_confirmed
    }
}

/// Create run payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCreate {
    pub deliverer_id: i64,
    pub label: Option<String>,
}

/// Run confirmation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfirmation {
    pub run: CourierRun,
    /// Orders whose stock moved with this confirmation
    pub order_ids: Vec<i64>,
    pub movements: usize,
}
