//! Order Model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    ToCall,
    Validated,
    Cancelled,
    Unreachable,
    PendingPayment,
    Assigned,
    Delivered,
    Refused,
    DeliveryCancelled,
    Returned,
    ExpressPaid,
    ExpressArrived,
    ExpressDelivered,
    ExpressCancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 15] = [
        OrderStatus::New,
        OrderStatus::ToCall,
        OrderStatus::Validated,
        OrderStatus::Cancelled,
        OrderStatus::Unreachable,
        OrderStatus::PendingPayment,
        OrderStatus::Assigned,
        OrderStatus::Delivered,
        OrderStatus::Refused,
        OrderStatus::DeliveryCancelled,
        OrderStatus::Returned,
        OrderStatus::ExpressPaid,
        OrderStatus::ExpressArrived,
        OrderStatus::ExpressDelivered,
        OrderStatus::ExpressCancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::ToCall => "TO_CALL",
            OrderStatus::Validated => "VALIDATED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Unreachable => "UNREACHABLE",
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::Assigned => "ASSIGNED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Refused => "REFUSED",
            OrderStatus::DeliveryCancelled => "DELIVERY_CANCELLED",
            OrderStatus::Returned => "RETURNED",
            OrderStatus::ExpressPaid => "EXPRESS_PAID",
            OrderStatus::ExpressArrived => "EXPRESS_ARRIVED",
            OrderStatus::ExpressDelivered => "EXPRESS_DELIVERED",
            OrderStatus::ExpressCancelled => "EXPRESS_CANCELLED",
        }
    }

    /// Statuses before any stock is committed
    pub fn is_pre_reservation(&self) -> bool {
        matches!(
            self,
            OrderStatus::New
                | OrderStatus::ToCall
                | OrderStatus::Validated
                | OrderStatus::Unreachable
                | OrderStatus::PendingPayment
        )
    }

    /// Local delivery outcome that leaves the goods with the courier
    pub fn is_undelivered_outcome(&self) -> bool {
        matches!(
            self,
            OrderStatus::Refused | OrderStatus::DeliveryCancelled | OrderStatus::Returned
        )
    }

    /// Statuses holding an express reservation
    pub fn holds_express(&self) -> bool {
        matches!(self, OrderStatus::ExpressPaid | OrderStatus::ExpressArrived)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown order status: {}", s))
    }
}

/// 配送渠道
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryChannel {
    #[default]
    Local,
    Express,
}

/// 未送达原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnReason {
    CustomerRefused,
    CustomerUnreachable,
    WrongAddress,
    Postponed,
    Damaged,
    Other,
}

/// Order entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    /// Unique business reference
    pub reference: String,
    pub client_name: String,
    pub client_phone: String,
    pub client_city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_address: Option<String>,
    pub product_id: i64,
    pub quantity: i64,
    pub amount: Decimal,
    pub delivery_channel: DeliveryChannel,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_reason: Option<ReturnReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliverer_id: Option<i64>,
    /// Courier run (delivery list) the order belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
    /// Goods for this order physically left with the courier: set when the
    /// order sits ASSIGNED on a run whose handoff is confirmed.
    #[serde(default)]
    pub handed_off: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_callback_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_by: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Order intake payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderCreate {
    /// Generated when absent
    #[validate(length(min = 1, max = 64))]
    pub reference: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub client_name: String,
    #[validate(length(min = 6, max = 20), custom(function = "validate_phone"))]
    pub client_phone: String,
    #[validate(length(min = 1, max = 120))]
    pub client_city: String,
    pub client_address: Option<String>,
    pub product_id: i64,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i64,
    pub note: Option<String>,
}

fn validate_phone(phone: &str) -> Result<(), validator::ValidationError> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits
        .chars()
        .all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
    {
        Ok(())
    } else {
        Err(validator::ValidationError::new("phone"))
    }
}

/// Status transition request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub to: OrderStatus,
    /// Required when `to == ASSIGNED`
    #[serde(default)]
    pub run_id: Option<i64>,
    /// Required for REFUSED / DELIVERY_CANCELLED / RETURNED
    #[serde(default)]
    pub return_reason: Option<ReturnReason>,
    #[serde(default)]
    pub note: Option<String>,
}

impl TransitionRequest {
    pub fn to(status: OrderStatus) -> Self {
        Self {
            to: status,
            run_id: None,
            return_reason: None,
            note: None,
        }
    }

    pub fn with_run(mut self, run_id: i64) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_reason(mut self, reason: ReturnReason) -> Self {
        self.return_reason = Some(reason);
        self
    }
}

/// Schedule a callback on a TO_CALL order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackRequest {
    /// Unix millis
    pub at: i64,
}

/// Quantity edit
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuantityUpdate {
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i64,
}

/// Privileged bulk delete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDeleteRequest {
    pub order_ids: Vec<i64>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDeleteResult {
    pub deleted: Vec<i64>,
    /// Compensating movements written
    pub movements: usize,
}

/// 订单变更事件 (提交后广播)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: i64,
    pub actor_id: i64,
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: OrderEventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEventPayload {
    Created,
    StatusChanged {
        from: OrderStatus,
        to: OrderStatus,
    },
    QuantityChanged {
        from: i64,
        to: i64,
    },
    CallbackScheduled {
        at: i64,
    },
    Deleted {
        reason: String,
    },
}
