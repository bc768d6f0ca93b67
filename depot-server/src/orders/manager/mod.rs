//! OrdersManager - order lifecycle, courier runs and their stock effects
//!
//! # Mutation Flow
//!
//! ```text
//! transition(order, request)
//!     ├─ 1. Begin write transaction (the per-product exclusive section)
//!     ├─ 2. Load order, check the edge against the status graph
//!     ├─ 3. Check preconditions (run, return reason, free stock)
//!     ├─ 4. Apply stock movements through StockManager (same txn)
//!     ├─ 5. Persist order snapshot
//!     ├─ 6. Commit transaction
//!     └─ 7. Broadcast OrderEvent(s)
//! ```
//!
//! # Local reservation
//!
//! The reservation follows the goods. An order on a run whose handoff is not
//! confirmed only holds a *pending commitment* (units still counted in
//! `available` but promised). RESERVE_LOCAL fires when the goods leave with
//! the courier, RETURN_LOCAL when the run's return is confirmed, and
//! DELIVER_LOCAL on delivery. Delivery outcomes on their own never move
//! stock.

mod error;
pub use error::*;

use std::collections::BTreeSet;

use redb::WriteTransaction;
use shared::models::{
    Bucket, BulkDeleteResult, CourierRun, DeliveryChannel, MovementKind, Order, OrderCreate,
    OrderEvent, OrderEventPayload, OrderStatus, RunConfirmation, RunCreate, TransitionRequest,
};
use shared::util::now_millis;
use tokio::sync::broadcast;
use validator::Validate;

use super::{pricing, state_machine};
use crate::inventory::{
    InventoryStorage, MovementContext, StockError, StockManager, holds_local_reservation,
};
use crate::inventory::storage::{ORDER_ID_KEY, RUN_ID_KEY};
use crate::security_log;

/// Event broadcast channel capacity
const EVENT_CHANNEL_CAPACITY: usize = 4096;

pub struct OrdersManager {
    storage: InventoryStorage,
    stock: StockManager,
    event_tx: broadcast::Sender<OrderEvent>,
}

impl std::fmt::Debug for OrdersManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrdersManager")
            .field("storage", &"<InventoryStorage>")
            .field("event_tx", &"<broadcast::Sender>")
            .finish()
    }
}

impl OrdersManager {
    pub fn new(stock: StockManager) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            storage: stock.storage().clone(),
            stock,
            event_tx,
        }
    }

    /// Create an OrdersManager with existing storage (for testing)
    #[cfg(test)]
    pub fn with_storage(storage: InventoryStorage) -> Self {
        Self::new(StockManager::new(storage))
    }

    /// Subscribe to event broadcasts
    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.event_tx.subscribe()
    }

    pub fn stock(&self) -> &StockManager {
        &self.stock
    }

    fn commit(&self, txn: WriteTransaction) -> OrderResult<()> {
        txn.commit()
            .map_err(crate::inventory::StorageError::from)?;
        Ok(())
    }

    /// Broadcast events after successful commit
    fn publish(&self, events: Vec<OrderEvent>) {
        for event in events {
            if self.event_tx.send(event).is_err() {
                tracing::debug!("Order event not delivered: no active receivers");
                break;
            }
        }
    }

    fn event(order_id: i64, actor_id: i64, payload: OrderEventPayload) -> OrderEvent {
        OrderEvent {
            order_id,
            actor_id,
            timestamp: now_millis(),
            payload,
        }
    }

    fn load_order(&self, txn: &WriteTransaction, order_id: i64) -> OrderResult<Order> {
        self.storage
            .get_order_txn(txn, order_id)?
            .ok_or(OrderError::OrderNotFound(order_id))
    }

    fn load_run(&self, txn: &WriteTransaction, run_id: i64) -> OrderResult<CourierRun> {
        self.storage
            .get_run_txn(txn, run_id)?
            .ok_or(OrderError::RunNotFound(run_id))
    }

    /// `available` minus units promised to runs not yet handed off
    fn ensure_promisable(
        &self,
        txn: &WriteTransaction,
        product_id: i64,
        quantity: i64,
        exclude_order: Option<i64>,
    ) -> OrderResult<()> {
        let product = self
            .storage
            .get_product_txn(txn, product_id)?
            .ok_or(StockError::ProductNotFound(product_id))?;
        let pending = self
            .storage
            .pending_local_commitment_txn(txn, product_id, exclude_order)?;
        let free = product.stock.available - pending;
        if free < quantity {
            return Err(StockError::InsufficientStock {
                product_id,
                bucket: Bucket::Available,
                available: free,
                requested: quantity,
            }
            .into());
        }
        Ok(())
    }

    fn move_stock(
        &self,
        txn: &WriteTransaction,
        order: &Order,
        kind: MovementKind,
        quantity: i64,
        actor_id: i64,
        reason: &str,
    ) -> OrderResult<usize> {
        let ctx = MovementContext::new(actor_id, reason).for_order(order.id);
        let outcome = self
            .stock
            .apply_movement_txn(txn, order.product_id, kind, quantity, &ctx)?;
        Ok(outcome.movements.len())
    }

    // ========== Intake & reads ==========

    pub fn create_order(&self, create: OrderCreate, actor_id: i64) -> OrderResult<Order> {
        create
            .validate()
            .map_err(|e| OrderError::Validation(e.to_string()))?;

        let txn = self.storage.begin_write()?;
        let product = self
            .storage
            .get_product_txn(&txn, create.product_id)?
            .ok_or(StockError::ProductNotFound(create.product_id))?;

        let id = self.storage.next_id(&txn, ORDER_ID_KEY)?;
        let reference = match create.reference.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => format!("ORD-{:06}", id),
        };
        if self
            .storage
            .order_id_for_reference_txn(&txn, &reference)?
            .is_some()
        {
            return Err(OrderError::ReferenceExists(reference));
        }

        let now = now_millis();
        let order = Order {
            id,
            reference,
            client_name: create.client_name.trim().to_string(),
            client_phone: create.client_phone.trim().to_string(),
            client_city: create.client_city.trim().to_string(),
            client_address: create.client_address,
            product_id: product.id,
            quantity: create.quantity,
            amount: pricing::order_amount(&product, create.quantity),
            delivery_channel: DeliveryChannel::Local,
            status: OrderStatus::New,
            return_reason: None,
            caller_id: None,
            deliverer_id: None,
            run_id: None,
            handed_off: false,
            scheduled_callback_at: None,
            note: create.note,
            created_by: actor_id,
            created_at: now,
            updated_at: now,
        };
        self.storage.insert_order(&txn, &order)?;
        self.commit(txn)?;

        tracing::info!(order_id = order.id, reference = %order.reference, product_id = order.product_id, "Order created");
        self.publish(vec![Self::event(order.id, actor_id, OrderEventPayload::Created)]);
        Ok(order)
    }

    pub fn get_order(&self, order_id: i64) -> OrderResult<Order> {
        self.storage
            .get_order(order_id)?
            .ok_or(OrderError::OrderNotFound(order_id))
    }

    pub fn list_orders(&self, status: Option<OrderStatus>) -> OrderResult<Vec<Order>> {
        Ok(self.storage.list_orders(status)?)
    }

    // ========== State machine ==========

    pub fn transition(
        &self,
        order_id: i64,
        request: TransitionRequest,
        actor_id: i64,
    ) -> OrderResult<Order> {
        let txn = self.storage.begin_write()?;
        let mut order = self.load_order(&txn, order_id)?;
        let from = order.status;
        let to = request.to;

        if !state_machine::can_transition(from, to) {
            return Err(OrderError::InvalidTransition { from, to });
        }

        if state_machine::requires_return_reason(to) {
            let reason = request.return_reason.or(order.return_reason).ok_or_else(|| {
                OrderError::Validation(format!("{} requires a return reason", to))
            })?;
            order.return_reason = Some(reason);
        }

        let reason = format!("order {} {} -> {}", order.reference, from, to);
        match to {
            OrderStatus::Assigned => {
                let run_id = request.run_id.ok_or_else(|| {
                    OrderError::Validation("ASSIGNED requires a courier run".to_string())
                })?;
                let run = self.load_run(&txn, run_id)?;
                if run.return_confirmed {
                    return Err(OrderError::InvalidOperation(format!(
                        "Courier run {} is closed",
                        run_id
                    )));
                }

                // 先检查可承诺量，再决定是否立即预留
                self.ensure_promisable(&txn, order.product_id, order.quantity, Some(order.id))?;
                if run.handoff_confirmed {
                    self.move_stock(
                        &txn,
                        &order,
                        MovementKind::ReserveLocal,
                        order.quantity,
                        actor_id,
                        &reason,
                    )?;
                    order.handed_off = true;
                }

                order.run_id = Some(run.id);
                order.deliverer_id = Some(run.deliverer_id);
                self.storage.link_order_to_run(&txn, run.id, order.id)?;
            }
            OrderStatus::Delivered => {
                if !order.handed_off {
                    return Err(OrderError::InvalidOperation(format!(
                        "Order {} cannot be delivered before the run handoff is confirmed",
                        order.id
                    )));
                }
                self.move_stock(
                    &txn,
                    &order,
                    MovementKind::DeliverLocal,
                    order.quantity,
                    actor_id,
                    &reason,
                )?;
            }
            OrderStatus::ExpressPaid => {
                self.ensure_promisable(&txn, order.product_id, order.quantity, Some(order.id))?;
                self.move_stock(
                    &txn,
                    &order,
                    MovementKind::ReserveExpress,
                    order.quantity,
                    actor_id,
                    &reason,
                )?;
            }
            OrderStatus::ExpressDelivered | OrderStatus::ExpressCancelled => {
                if let Some(kind) = state_machine::express_movement(to) {
                    self.move_stock(&txn, &order, kind, order.quantity, actor_id, &reason)?;
                }
            }
            // REFUSED / DELIVERY_CANCELLED / RETURNED: 货还在配送员手里, 回库确认时才入库
            _ => {}
        }

        if let Some(channel) = state_machine::channel_for(to) {
            order.delivery_channel = channel;
        }
        if from == OrderStatus::ToCall {
            order.caller_id = Some(actor_id);
        }
        if request.note.is_some() {
            order.note = request.note;
        }
        order.status = to;
        order.updated_at = now_millis();
        self.storage.put_order(&txn, &order)?;
        self.commit(txn)?;

        tracing::info!(order_id, from = %from, to = %to, actor_id, "Order status changed");
        self.publish(vec![Self::event(
            order_id,
            actor_id,
            OrderEventPayload::StatusChanged { from, to },
        )]);
        Ok(order)
    }

    // ========== Call center ==========

    /// Keep a TO_CALL order out of the queue until `at`
    pub fn schedule_callback(&self, order_id: i64, at: i64, actor_id: i64) -> OrderResult<Order> {
        if at <= 0 {
            return Err(OrderError::Validation("callback time must be positive".to_string()));
        }

        let txn = self.storage.begin_write()?;
        let mut order = self.load_order(&txn, order_id)?;
        if order.status != OrderStatus::ToCall {
            return Err(OrderError::InvalidOperation(format!(
                "Callbacks apply to TO_CALL orders, order {} is {}",
                order_id, order.status
            )));
        }
        order.scheduled_callback_at = Some(at);
        order.caller_id = Some(actor_id);
        order.updated_at = now_millis();
        self.storage.put_order(&txn, &order)?;
        self.commit(txn)?;

        self.publish(vec![Self::event(
            order_id,
            actor_id,
            OrderEventPayload::CallbackScheduled { at },
        )]);
        Ok(order)
    }

    /// TO_CALL orders with no callback or a due one, oldest first
    pub fn call_queue(&self, now: i64) -> OrderResult<Vec<Order>> {
        let mut queue: Vec<Order> = self
            .storage
            .list_orders(Some(OrderStatus::ToCall))?
            .into_iter()
            .filter(|o| o.scheduled_callback_at.is_none_or(|at| at <= now))
            .collect();
        queue.sort_by_key(|o| (o.created_at, o.id));
        Ok(queue)
    }

    // ========== Quantity edit ==========

    pub fn update_quantity(&self, order_id: i64, quantity: i64, actor_id: i64) -> OrderResult<Order> {
        if !(1..=1000).contains(&quantity) {
            return Err(OrderError::Validation(format!(
                "quantity must be between 1 and 1000, got {}",
                quantity
            )));
        }

        let txn = self.storage.begin_write()?;
        let mut order = self.load_order(&txn, order_id)?;
        let previous = order.quantity;
        if previous == quantity {
            return Ok(order);
        }
        let delta = quantity - previous;
        let reason = format!("order {} quantity {} -> {}", order.reference, previous, quantity);

        match order.status {
            s if s.is_pre_reservation() => {}
            OrderStatus::Assigned if order.handed_off => {
                if delta > 0 {
                    self.ensure_promisable(&txn, order.product_id, delta, Some(order.id))?;
                    self.move_stock(&txn, &order, MovementKind::ReserveLocal, delta, actor_id, &reason)?;
                } else {
                    self.move_stock(&txn, &order, MovementKind::ReturnLocal, -delta, actor_id, &reason)?;
                }
            }
            OrderStatus::Assigned => {
                // 仍是待交接承诺: 只校验新数量
                self.ensure_promisable(&txn, order.product_id, quantity, Some(order.id))?;
            }
            OrderStatus::ExpressPaid | OrderStatus::ExpressArrived => {
                if delta > 0 {
                    self.ensure_promisable(&txn, order.product_id, delta, Some(order.id))?;
                    self.move_stock(&txn, &order, MovementKind::ReserveExpress, delta, actor_id, &reason)?;
                } else {
                    self.move_stock(&txn, &order, MovementKind::CancelExpress, -delta, actor_id, &reason)?;
                }
            }
            other => {
                return Err(OrderError::InvalidOperation(format!(
                    "Quantity of a {} order cannot change",
                    other
                )));
            }
        }

        let product = self
            .storage
            .get_product_txn(&txn, order.product_id)?
            .ok_or(StockError::ProductNotFound(order.product_id))?;
        order.quantity = quantity;
        order.amount = pricing::order_amount(&product, quantity);
        order.updated_at = now_millis();
        self.storage.put_order(&txn, &order)?;
        self.commit(txn)?;

        tracing::info!(order_id, from = previous, to = quantity, "Order quantity changed");
        self.publish(vec![Self::event(
            order_id,
            actor_id,
            OrderEventPayload::QuantityChanged {
                from: previous,
                to: quantity,
            },
        )]);
        Ok(order)
    }

    // ========== Bulk delete ==========

    /// Remove orders and release what they hold, all in one transaction
    pub fn bulk_delete(
        &self,
        order_ids: &[i64],
        reason: &str,
        actor_id: i64,
    ) -> OrderResult<BulkDeleteResult> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(OrderError::Validation("bulk delete needs a reason".to_string()));
        }
        let ids: BTreeSet<i64> = order_ids.iter().copied().collect();
        if ids.is_empty() {
            return Err(OrderError::Validation("no orders given".to_string()));
        }

        let txn = self.storage.begin_write()?;
        let mut movements = 0;
        for &order_id in &ids {
            let order = self.load_order(&txn, order_id)?;
            let run = match order.run_id {
                Some(run_id) => self.storage.get_run_txn(&txn, run_id)?,
                None => None,
            };
            let note = format!("bulk delete of order {}: {}", order.reference, reason);

            if holds_local_reservation(&order, run.as_ref()) {
                movements += self.move_stock(
                    &txn,
                    &order,
                    MovementKind::ReturnLocal,
                    order.quantity,
                    actor_id,
                    &note,
                )?;
            } else if order.status.holds_express() {
                movements += self.move_stock(
                    &txn,
                    &order,
                    MovementKind::CancelExpress,
                    order.quantity,
                    actor_id,
                    &note,
                )?;
            }
            self.storage.remove_order(&txn, &order)?;
        }
        self.commit(txn)?;

        let deleted: Vec<i64> = ids.into_iter().collect();
        security_log!(
            "WARN",
            "orders_bulk_delete",
            actor_id = actor_id,
            count = deleted.len(),
            movements = movements,
            reason = reason
        );
        self.publish(
            deleted
                .iter()
                .map(|id| {
                    Self::event(
                        *id,
                        actor_id,
                        OrderEventPayload::Deleted {
                            reason: reason.to_string(),
                        },
                    )
                })
                .collect(),
        );
        Ok(BulkDeleteResult { deleted, movements })
    }

    // ========== Courier runs ==========

    pub fn create_run(&self, create: RunCreate, actor_id: i64) -> OrderResult<CourierRun> {
        if create.deliverer_id <= 0 {
            return Err(OrderError::Validation("deliverer_id is required".to_string()));
        }
        let txn = self.storage.begin_write()?;
        let run = CourierRun {
            id: self.storage.next_id(&txn, RUN_ID_KEY)?,
            deliverer_id: create.deliverer_id,
            label: create.label,
            handoff_confirmed: false,
            handoff_confirmed_at: None,
            handoff_confirmed_by: None,
            return_confirmed: false,
            return_confirmed_at: None,
            return_confirmed_by: None,
            created_by: actor_id,
            created_at: now_millis(),
        };
        self.storage.put_run(&txn, &run)?;
        self.commit(txn)?;
        tracing::info!(run_id = run.id, deliverer_id = run.deliverer_id, "Courier run created");
        Ok(run)
    }

    pub fn get_run(&self, run_id: i64) -> OrderResult<CourierRun> {
        self.storage
            .get_run(run_id)?
            .ok_or(OrderError::RunNotFound(run_id))
    }

    pub fn list_runs(&self) -> OrderResult<Vec<CourierRun>> {
        Ok(self.storage.list_runs()?)
    }

    /// Goods left with the courier: reserve every ASSIGNED order of the run
    ///
    /// One product short of stock fails the whole confirmation.
    pub fn confirm_handoff(&self, run_id: i64, actor_id: i64) -> OrderResult<RunConfirmation> {
        let txn = self.storage.begin_write()?;
        let mut run = self.load_run(&txn, run_id)?;
        if run.handoff_confirmed || run.return_confirmed {
            return Err(OrderError::InvalidOperation(format!(
                "Handoff of run {} already confirmed or run closed",
                run_id
            )));
        }

        let mut order_ids = Vec::new();
        let mut movements = 0;
        for mut order in self.storage.orders_for_run_txn(&txn, run_id)? {
            if order.status != OrderStatus::Assigned || order.handed_off {
                continue;
            }
            let reason = format!("handoff of run {} for order {}", run_id, order.reference);
            movements += self.move_stock(
                &txn,
                &order,
                MovementKind::ReserveLocal,
                order.quantity,
                actor_id,
                &reason,
            )?;
            order.handed_off = true;
            order.updated_at = now_millis();
            self.storage.put_order(&txn, &order)?;
            order_ids.push(order.id);
        }

        run.handoff_confirmed = true;
        run.handoff_confirmed_at = Some(now_millis());
        run.handoff_confirmed_by = Some(actor_id);
        self.storage.put_run(&txn, &run)?;
        self.commit(txn)?;

        tracing::info!(run_id, orders = order_ids.len(), movements, "Run handoff confirmed");
        Ok(RunConfirmation {
            run,
            order_ids,
            movements,
        })
    }

    /// Undelivered goods are back: release them and close the run
    pub fn confirm_return(&self, run_id: i64, actor_id: i64) -> OrderResult<RunConfirmation> {
        let txn = self.storage.begin_write()?;
        let mut run = self.load_run(&txn, run_id)?;
        if run.return_confirmed {
            return Err(OrderError::InvalidOperation(format!(
                "Return of run {} already confirmed",
                run_id
            )));
        }

        let orders = self.storage.orders_for_run_txn(&txn, run_id)?;
        if let Some(open) = orders.iter().find(|o| o.status == OrderStatus::Assigned) {
            return Err(OrderError::InvalidOperation(format!(
                "Order {} of run {} has no delivery outcome yet",
                open.id, run_id
            )));
        }

        let mut order_ids = Vec::new();
        let mut movements = 0;
        let mut events = Vec::new();
        for mut order in orders {
            if !order.status.is_undelivered_outcome() {
                continue;
            }
            if holds_local_reservation(&order, Some(&run)) {
                let reason = format!("return of run {} for order {}", run_id, order.reference);
                movements += self.move_stock(
                    &txn,
                    &order,
                    MovementKind::ReturnLocal,
                    order.quantity,
                    actor_id,
                    &reason,
                )?;
            }
            if order.status != OrderStatus::Returned {
                events.push(Self::event(
                    order.id,
                    actor_id,
                    OrderEventPayload::StatusChanged {
                        from: order.status,
                        to: OrderStatus::Returned,
                    },
                ));
                order.status = OrderStatus::Returned;
            }
            order.updated_at = now_millis();
            self.storage.put_order(&txn, &order)?;
            order_ids.push(order.id);
        }

        run.return_confirmed = true;
        run.return_confirmed_at = Some(now_millis());
        run.return_confirmed_by = Some(actor_id);
        self.storage.put_run(&txn, &run)?;
        self.commit(txn)?;

        tracing::info!(run_id, orders = order_ids.len(), movements, "Run return confirmed");
        self.publish(events);
        Ok(RunConfirmation {
            run,
            order_ids,
            movements,
        })
    }
}

#[cfg(test)]
mod tests;
