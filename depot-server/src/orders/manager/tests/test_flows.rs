use super::*;

#[test]
fn test_local_delivery_flow() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let order = validated_order(&manager, product.id, 4);
    let run = new_run(&manager);

    // Assigned on a run still in the warehouse: promised, not yet reserved
    assign(&manager, order.id, run.id).unwrap();
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(10, 0, 0));
    assert_consistent(&manager, product.id);

    let confirmation = manager.confirm_handoff(run.id, OPERATOR).unwrap();
    assert_eq!(confirmation.order_ids, vec![order.id]);
    assert_eq!(confirmation.movements, 2);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(6, 4, 0));
    assert!(manager.get_order(order.id).unwrap().handed_off);
    assert_consistent(&manager, product.id);

    move_to(&manager, order.id, OrderStatus::Delivered);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(6, 0, 0));
    assert_consistent(&manager, product.id);

    let kinds: Vec<MovementKind> = manager
        .stock()
        .movements(product.id)
        .unwrap()
        .iter()
        .map(|m| m.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            MovementKind::Restock,
            MovementKind::ReserveLocal,
            MovementKind::ReserveLocal,
            MovementKind::DeliverLocal,
        ]
    );
}

#[test]
fn test_assignment_to_handed_off_run_reserves_immediately() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let run = new_run(&manager);
    manager.confirm_handoff(run.id, OPERATOR).unwrap();

    let order = validated_order(&manager, product.id, 3);
    let assigned = assign(&manager, order.id, run.id).unwrap();

    assert!(assigned.handed_off);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(7, 3, 0));
    assert_consistent(&manager, product.id);
}

#[test]
fn test_returned_before_handoff_moves_nothing() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let order = validated_order(&manager, product.id, 4);
    let run = new_run(&manager);
    assign(&manager, order.id, run.id).unwrap();

    outcome(&manager, order.id, OrderStatus::Returned, ReturnReason::Postponed);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(10, 0, 0));
    assert_consistent(&manager, product.id);

    // the later handoff skips it, the return has nothing to release
    let handoff = manager.confirm_handoff(run.id, OPERATOR).unwrap();
    assert!(handoff.order_ids.is_empty());
    let returned = manager.confirm_return(run.id, OPERATOR).unwrap();
    assert_eq!(returned.movements, 0);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(10, 0, 0));
    assert_consistent(&manager, product.id);
}

#[test]
fn test_refused_after_handoff_released_on_return() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let delivered = validated_order(&manager, product.id, 2);
    let refused = validated_order(&manager, product.id, 3);
    let run = new_run(&manager);
    assign(&manager, delivered.id, run.id).unwrap();
    assign(&manager, refused.id, run.id).unwrap();
    manager.confirm_handoff(run.id, OPERATOR).unwrap();
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(5, 5, 0));

    move_to(&manager, delivered.id, OrderStatus::Delivered);
    outcome(&manager, refused.id, OrderStatus::Refused, ReturnReason::CustomerRefused);

    // goods still with the courier
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(5, 3, 0));
    assert_consistent(&manager, product.id);

    let confirmation = manager.confirm_return(run.id, OPERATOR).unwrap();
    assert_eq!(confirmation.order_ids, vec![refused.id]);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(8, 0, 0));
    assert_eq!(
        manager.get_order(refused.id).unwrap().status,
        OrderStatus::Returned
    );
    assert_consistent(&manager, product.id);
}

#[test]
fn test_express_flow() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let order = validated_order(&manager, product.id, 2);

    let paid = move_to(&manager, order.id, OrderStatus::ExpressPaid);
    assert_eq!(paid.delivery_channel, DeliveryChannel::Express);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(8, 0, 2));

    move_to(&manager, order.id, OrderStatus::ExpressArrived);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(8, 0, 2));

    move_to(&manager, order.id, OrderStatus::ExpressDelivered);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(8, 0, 0));
    assert!(manager.stock().replay(product.id).unwrap().consistent);
}

#[test]
fn test_express_cancel_releases() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let order = validated_order(&manager, product.id, 2);

    move_to(&manager, order.id, OrderStatus::PendingPayment);
    move_to(&manager, order.id, OrderStatus::ExpressPaid);
    move_to(&manager, order.id, OrderStatus::ExpressCancelled);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(10, 0, 0));
}

#[test]
fn test_quantity_edit_before_reservation_recomputes_amount() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let order = new_order(&manager, product.id, 1);
    assert_eq!(order.amount, Decimal::new(19900, 2));

    let edited = manager.update_quantity(order.id, 2, OPERATOR).unwrap();
    assert_eq!(edited.quantity, 2);
    // bundle price, not 2 x unit price
    assert_eq!(edited.amount, Decimal::new(34900, 2));
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(10, 0, 0));
}

#[test]
fn test_quantity_edit_after_handoff_moves_delta() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let order = validated_order(&manager, product.id, 2);
    let run = new_run(&manager);
    assign(&manager, order.id, run.id).unwrap();
    manager.confirm_handoff(run.id, OPERATOR).unwrap();

    manager.update_quantity(order.id, 5, OPERATOR).unwrap();
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(5, 5, 0));
    assert_consistent(&manager, product.id);

    manager.update_quantity(order.id, 1, OPERATOR).unwrap();
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(9, 1, 0));
    assert_consistent(&manager, product.id);
}

#[test]
fn test_quantity_edit_on_express_moves_delta() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let order = validated_order(&manager, product.id, 2);
    move_to(&manager, order.id, OrderStatus::ExpressPaid);

    manager.update_quantity(order.id, 3, OPERATOR).unwrap();
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(7, 0, 3));
    manager.update_quantity(order.id, 1, OPERATOR).unwrap();
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(9, 0, 1));
}

#[test]
fn test_bulk_delete_compensates() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 10);
    let local = validated_order(&manager, product.id, 3);
    let express = validated_order(&manager, product.id, 2);
    let fresh = new_order(&manager, product.id, 1);
    let run = new_run(&manager);
    assign(&manager, local.id, run.id).unwrap();
    manager.confirm_handoff(run.id, OPERATOR).unwrap();
    move_to(&manager, express.id, OrderStatus::ExpressPaid);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(5, 3, 2));

    let mut rx = manager.subscribe();
    let result = manager
        .bulk_delete(&[local.id, express.id, fresh.id], "duplicate import", OPERATOR)
        .unwrap();

    assert_eq!(result.deleted.len(), 3);
    assert_eq!(result.movements, 4);
    assert_eq!(buckets(&manager, product.id), StockBuckets::new(10, 0, 0));
    assert!(manager.list_orders(None).unwrap().is_empty());
    assert_consistent(&manager, product.id);

    let mut deleted_events = 0;
    while let Ok(event) = rx.try_recv() {
        assert!(matches!(event.payload, OrderEventPayload::Deleted { .. }));
        deleted_events += 1;
    }
    assert_eq!(deleted_events, 3);
}

#[test]
fn test_conservation_across_mixed_flows() {
    let manager = create_test_manager();
    let product = seed_product(&manager, "SKU-1", 20);
    let run = new_run(&manager);

    let a = validated_order(&manager, product.id, 3);
    let b = validated_order(&manager, product.id, 2);
    let c = validated_order(&manager, product.id, 4);
    let d = validated_order(&manager, product.id, 1);

    assign(&manager, a.id, run.id).unwrap();
    assign(&manager, b.id, run.id).unwrap();
    move_to(&manager, c.id, OrderStatus::ExpressPaid);
    manager.confirm_handoff(run.id, OPERATOR).unwrap();
    assign(&manager, d.id, run.id).unwrap();

    move_to(&manager, a.id, OrderStatus::Delivered);
    outcome(&manager, b.id, OrderStatus::DeliveryCancelled, ReturnReason::WrongAddress);
    outcome(&manager, d.id, OrderStatus::Refused, ReturnReason::CustomerRefused);
    move_to(&manager, c.id, OrderStatus::ExpressArrived);
    move_to(&manager, c.id, OrderStatus::ExpressDelivered);
    manager.confirm_return(run.id, OPERATOR).unwrap();

    // 20 - delivered (3 local + 4 express)
    let stock = buckets(&manager, product.id);
    assert_eq!(stock, StockBuckets::new(13, 0, 0));
    assert_eq!(stock.total(), 13);
    assert_consistent(&manager, product.id);
}
