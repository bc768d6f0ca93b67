use super::*;
use crate::inventory::Reconciler;
use rust_decimal::Decimal;
use shared::models::{Product, ProductCreate, ReturnReason, StockBuckets};

mod test_boundary;
mod test_flows;

const OPERATOR: i64 = 1;
const DELIVERER: i64 = 42;

fn create_test_manager() -> OrdersManager {
    let storage = InventoryStorage::open_in_memory().unwrap();
    OrdersManager::with_storage(storage)
}

fn seed_product(manager: &OrdersManager, code: &str, initial_stock: i64) -> Product {
    manager
        .stock()
        .create_product(
            ProductCreate {
                code: code.to_string(),
                name: format!("Product {code}"),
                unit_price: Decimal::new(19900, 2),
                price_for_two: Some(Decimal::new(34900, 2)),
                price_for_three: None,
                alert_threshold: 2,
                initial_stock,
            },
            OPERATOR,
        )
        .unwrap()
}

fn order_create(product_id: i64, quantity: i64) -> OrderCreate {
    OrderCreate {
        reference: None,
        client_name: "Amina".to_string(),
        client_phone: "0600123456".to_string(),
        client_city: "Rabat".to_string(),
        client_address: None,
        product_id,
        quantity,
        note: None,
    }
}

fn new_order(manager: &OrdersManager, product_id: i64, quantity: i64) -> Order {
    manager
        .create_order(order_create(product_id, quantity), OPERATOR)
        .unwrap()
}

fn move_to(manager: &OrdersManager, order_id: i64, to: OrderStatus) -> Order {
    manager
        .transition(order_id, TransitionRequest::to(to), OPERATOR)
        .unwrap()
}

// ========================================================================
// Helper: an order confirmed by the call center
// ========================================================================

fn validated_order(manager: &OrdersManager, product_id: i64, quantity: i64) -> Order {
    let order = new_order(manager, product_id, quantity);
    move_to(manager, order.id, OrderStatus::ToCall);
    move_to(manager, order.id, OrderStatus::Validated)
}

fn new_run(manager: &OrdersManager) -> CourierRun {
    manager
        .create_run(
            RunCreate {
                deliverer_id: DELIVERER,
                label: Some("Morning".to_string()),
            },
            OPERATOR,
        )
        .unwrap()
}

fn assign(manager: &OrdersManager, order_id: i64, run_id: i64) -> OrderResult<Order> {
    manager.transition(
        order_id,
        TransitionRequest::to(OrderStatus::Assigned).with_run(run_id),
        OPERATOR,
    )
}

fn outcome(
    manager: &OrdersManager,
    order_id: i64,
    to: OrderStatus,
    reason: ReturnReason,
) -> Order {
    manager
        .transition(order_id, TransitionRequest::to(to).with_reason(reason), OPERATOR)
        .unwrap()
}

fn buckets(manager: &OrdersManager, product_id: i64) -> StockBuckets {
    manager.stock().get_product(product_id).unwrap().stock
}

/// Reconciler agrees with the stored bucket and the ledger replays cleanly
fn assert_consistent(manager: &OrdersManager, product_id: i64) {
    let reconciler = Reconciler::new(manager.stock().clone());
    let report = reconciler.compute_expected(product_id).unwrap();
    assert_eq!(
        report.discrepancy, 0,
        "reserved_local {} vs expected {}",
        report.current_reserved_local, report.expected_reserved_local
    );
    assert!(reconciler.verify_ledger(product_id).unwrap().consistent);
}
