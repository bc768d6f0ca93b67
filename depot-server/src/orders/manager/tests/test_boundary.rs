use super::*;
use std::sync::{Arc, Barrier};

#[test]
fn test_pending_commitment_limits_assignment() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 5);
    let run = new_run(&manager);
    let first = validated_order(&manager, product.id, 4);
    let second = validated_order(&manager, product.id, 2);

    assign(&manager, first.id, run.id).unwrap();
    let result = assign(&manager, second.id, run.id);
    assert!(matches!(
        result,
        Err(OrderError::Stock(StockError::InsufficientStock {
            available: 1,
            requested: 2,
            ..
        }))
    ));
    assert_eq!(manager.get_order(second.id).unwrap().status, OrderStatus::Validated);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(5, 0, 0));
}

#[test]
fn test_pending_commitment_limits_express() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 5);
    let run = new_run(&manager);
    let local = validated_order(&manager, product.id, 4);
    let express = validated_order(&manager, product.id, 2);
    assign(&manager, local.id, run.id).unwrap();

    let result = manager.transition(express.id, TransitionRequest::to(OrderStatus::ExpressPaid), OPERATOR);
    assert!(matches!(result, Err(OrderError::Stock(StockError::InsufficientStock { .. }))));
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(5, 0, 0));
}

#[test]
fn test_insufficient_stock_leaves_status_unchanged() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 1);
    let order = validated_order(&manager, product.id, 3);
    let run = new_run(&manager);
    manager.confirm_handoff(run.id, OPERATOR).unwrap();

    let result = assign(&manager, order.id, run.id);
    assert!(matches!(result, Err(OrderError::Stock(StockError::InsufficientStock { .. }))));

    let loaded = manager.get_order(order.id).unwrap();
    assert_eq!(loaded.status, OrderStatus::Validated);
    assert_eq!(loaded.run_id, None);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(1, 0, 0));
    assert_eq!(manager.stock().movements(product.id).unwrap().len(), 1);
}

#[test]
fn test_handoff_is_all_or_nothing() {
    let manager = create_test_manager();
    let plenty = seed_product(&manager, "SKU-1", 10);
    let scarce = seed_product(&manager, "SKU-2", 2);
    let run = new_run(&manager);
    let a = validated_order(&manager, plenty.id, 3);
    let b = validated_order(&manager, scarce.id, 2);
    assign(&manager, a.id, run.id).unwrap();
    assign(&manager, b.id, run.id).unwrap();

    // a reservation outside the order flow eats into the promise
    manager
        .stock()
        .apply_movement(
            scarce.id,
            MovementKind::ReserveExpress,
            1,
            &MovementContext::new(OPERATOR, "manual hold"),
        )
        .unwrap();

    let result = manager.confirm_handoff(run.id, OPERATOR);
    assert!(matches!(result, Err(OrderError::Stock(StockError::InsufficientStock { .. }))));
    assert_eq!(buckets(&manager, plenty.id), StockBuckets::new(10, 0, 0));
    assert!(!manager.get_run(run.id).unwrap().handoff_confirmed);
    assert!(!manager.get_order(a.id).unwrap().handed_off);
}

#[test]
fn test_delivered_requires_handoff() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let order = validated_order(&manager, product.id, 2);
    let run = new_run(&manager);
    assign(&manager, order.id, run.id).unwrap();

    let result = manager.transition(order.id, TransitionRequest::to(OrderStatus::Delivered), OPERATOR);
    assert!(matches!(result, Err(OrderError::InvalidOperation(_))));
    assert_eq!(manager.get_order(order.id).unwrap().status, OrderStatus::Assigned);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(10, 0, 0));
}

#[test]
fn test_confirmations_not_repeatable() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let order = validated_order(&manager, product.id, 2);
    let run = new_run(&manager);
    assign(&manager, order.id, run.id).unwrap();

    manager.confirm_handoff(run.id, OPERATOR).unwrap();
    assert!(matches!(
        manager.confirm_handoff(run.id, OPERATOR),
        Err(OrderError::InvalidOperation(_))
    ));
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(8, 2, 0));

    outcome(&manager, order.id, OrderStatus::Refused, ReturnReason::CustomerRefused);
    manager.confirm_return(run.id, OPERATOR).unwrap();
    assert!(matches!(
        manager.confirm_return(run.id, OPERATOR),
        Err(OrderError::InvalidOperation(_))
    ));
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(10, 0, 0));
    assert_consistent(&manager, product.id);
}

#[test]
fn test_return_blocked_while_orders_open() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let order = validated_order(&manager, product.id, 2);
    let run = new_run(&manager);
    assign(&manager, order.id, run.id).unwrap();
    manager.confirm_handoff(run.id, OPERATOR).unwrap();

    let result = manager.confirm_return(run.id, OPERATOR);
    assert!(matches!(result, Err(OrderError::InvalidOperation(_))));
    assert!(!manager.get_run(run.id).unwrap().return_confirmed);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(8, 2, 0));
}

#[test]
fn test_closed_run_rejects_assignment() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let run = new_run(&manager);
    manager.confirm_handoff(run.id, OPERATOR).unwrap();
    manager.confirm_return(run.id, OPERATOR).unwrap();

    let order = validated_order(&manager, product.id, 1);
    let result = assign(&manager, order.id, run.id);
    assert!(matches!(result, Err(OrderError::InvalidOperation(_))));
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(10, 0, 0));
}

#[test]
fn test_quantity_edit_rejected_on_final_status() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let order = validated_order(&manager, product.id, 1);
    move_to(&manager, order.id, OrderStatus::ExpressPaid);
    move_to(&manager, order.id, OrderStatus::ExpressArrived);
    move_to(&manager, order.id, OrderStatus::ExpressDelivered);

    let result = manager.update_quantity(order.id, 2, OPERATOR);
    assert!(matches!(result, Err(OrderError::InvalidOperation(_))));
    assert_eq!(manager.get_order(order.id).unwrap().quantity, 1);
}

#[test]
fn test_quantity_edit_checks_stock() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 4);
    let order = validated_order(&manager, product.id, 2);
    let run = new_run(&manager);
    assign(&manager, order.id, run.id).unwrap();

    // pending: the new quantity must fit in what is still free
    assert!(manager.update_quantity(order.id, 4, OPERATOR).is_ok());
    assert!(matches!(
        manager.update_quantity(order.id, 5, OPERATOR),
        Err(OrderError::Stock(StockError::InsufficientStock { .. }))
    ));
    assert_eq!(manager.get_order(order.id).unwrap().quantity, 4);

    assert!(matches!(
        manager.update_quantity(order.id, 0, OPERATOR),
        Err(OrderError::Validation(_))
    ));
}

#[test]
fn test_bulk_delete_is_atomic() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let order = validated_order(&manager, product.id, 2);
    move_to(&manager, order.id, OrderStatus::ExpressPaid);

    let result = manager.bulk_delete(&[order.id, 999_999], "cleanup", OPERATOR);
    assert!(matches!(result, Err(OrderError::OrderNotFound(999_999))));
    assert!(manager.get_order(order.id).is_ok());
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(8, 0, 2));

    let result = manager.bulk_delete(&[order.id], "  ", OPERATOR);
    assert!(matches!(result, Err(OrderError::Validation(_))));
}

#[test]
fn test_concurrent_assignments_never_overcommit() {
    let manager = Arc::new(create_test_manager());
    let product = seed_product(&manager, "SKU-1", 10);
    let run = new_run(&manager);
    manager.confirm_handoff(run.id, OPERATOR).unwrap();

    let orders: Vec<Order> = (0..2)
        .map(|_| validated_order(&manager, product.id, 6))
        .collect();

    let barrier = Arc::new(Barrier::new(orders.len()));
    let handles: Vec<_> = orders
        .iter()
        .map(|order| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            let order_id = order.id;
            let run_id = run.id;
            std::thread::spawn(move || {
                barrier.wait();
                assign(&manager, order_id, run_id).is_ok()
            })
        })
        .collect();

    let succeeded = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(succeeded, 1);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(4, 6, 0));
    assert_consistent(&manager, product.id);
}
