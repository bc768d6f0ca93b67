//! Order status graph
//!
//! Legal edges only. Stock side effects depend on the courier run and are
//! decided by the manager; this module answers "is this edge allowed" and
//! "which stock movement does it carry".

use shared::models::{DeliveryChannel, MovementKind, OrderStatus};

use OrderStatus::*;

/// Successors of a status
pub fn next_statuses(from: OrderStatus) -> &'static [OrderStatus] {
    match from {
        New => &[ToCall],
        ToCall => &[Validated, Cancelled, Unreachable],
        Unreachable => &[ToCall, Cancelled],
        Validated => &[Assigned, ExpressPaid, PendingPayment, Cancelled],
        PendingPayment => &[Assigned, ExpressPaid, Cancelled],
        Assigned => &[Delivered, Refused, DeliveryCancelled, Returned],
        Refused | DeliveryCancelled => &[Returned],
        ExpressPaid => &[ExpressArrived, ExpressCancelled],
        ExpressArrived => &[ExpressDelivered, ExpressCancelled],
        Cancelled | Delivered | Returned | ExpressDelivered | ExpressCancelled => &[],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    next_statuses(from).contains(&to)
}

/// No outgoing edges
pub fn is_terminal(status: OrderStatus) -> bool {
    next_statuses(status).is_empty()
}

/// Delivery outcomes other than DELIVERED must carry a return reason
pub fn requires_return_reason(to: OrderStatus) -> bool {
    to.is_undelivered_outcome()
}

/// Channel fixed by entering this status
pub fn channel_for(to: OrderStatus) -> Option<DeliveryChannel> {
    match to {
        Assigned => Some(DeliveryChannel::Local),
        ExpressPaid => Some(DeliveryChannel::Express),
        _ => None,
    }
}

/// Express-side movement carried by an edge
///
/// Local movements hinge on the run's handoff and are not listed here.
pub fn express_movement(to: OrderStatus) -> Option<MovementKind> {
    match to {
        ExpressPaid => Some(MovementKind::ReserveExpress),
        ExpressDelivered => Some(MovementKind::WithdrawExpress),
        ExpressCancelled => Some(MovementKind::CancelExpress),
        _ => None,
    }
}

/// Required permission to move an order into `to`
pub fn required_permission(to: OrderStatus) -> &'static str {
    use crate::auth::permissions::{DELIVERY_MANAGE, ORDERS_CALL, ORDERS_DELIVER};
    match to {
        ToCall | Validated | Cancelled | Unreachable | PendingPayment | ExpressPaid
        | ExpressArrived | ExpressDelivered | ExpressCancelled => ORDERS_CALL,
        Assigned => DELIVERY_MANAGE,
        Delivered | Refused | DeliveryCancelled | Returned => ORDERS_DELIVER,
        New => ORDERS_CALL,
    }
}
