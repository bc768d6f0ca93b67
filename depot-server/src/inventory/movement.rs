//! Movement planning and ledger replay
//!
//! Pure functions: no storage, no clock. [`plan`] turns a movement kind and
//! a positive quantity into per-bucket deltas using the fixed effect table
//! of [`MovementKind::effects`]; [`replay`] folds a ledger back into bucket
//! values.

use shared::models::{Bucket, MovementKind, StockBuckets, StockMovement};

use super::error::{StockError, StockResult};

/// One bucket change produced by a movement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketChange {
    pub bucket: Bucket,
    pub delta: i64,
    pub before: i64,
    pub after: i64,
}

/// Planned application of one movement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementPlan {
    pub kind: MovementKind,
    pub before: StockBuckets,
    pub after: StockBuckets,
    pub changes: Vec<BucketChange>,
    /// A bucket ended below zero (CORRECTION only)
    pub flagged: bool,
}

/// Plan a non-correction movement of `quantity` units
///
/// Rejects `quantity <= 0` and any bucket that would end below zero.
pub fn plan(
    product_id: i64,
    kind: MovementKind,
    quantity: i64,
    before: StockBuckets,
) -> StockResult<MovementPlan> {
    if kind.is_correction() {
        return Err(StockError::Validation(
            "CORRECTION needs an explicit bucket and signed delta".to_string(),
        ));
    }
    if quantity <= 0 {
        return Err(StockError::Validation(format!(
            "{} quantity must be positive, got {}",
            kind, quantity
        )));
    }

    let mut after = before;
    let mut changes = Vec::with_capacity(kind.effects().len());
    for &(bucket, sign) in kind.effects() {
        let delta = sign * quantity;
        let current = after.get(bucket);
        let next = current + delta;
        if next < 0 {
            return Err(StockError::InsufficientStock {
                product_id,
                bucket,
                available: current,
                requested: quantity,
            });
        }
        *after.get_mut(bucket) = next;
        changes.push(BucketChange {
            bucket,
            delta,
            before: current,
            after: next,
        });
    }

    Ok(MovementPlan {
        kind,
        before,
        after,
        changes,
        flagged: false,
    })
}

/// Plan an operator correction: signed `delta` on one bucket
///
/// Allowed to drive the bucket negative; the plan is then flagged.
pub fn plan_correction(
    bucket: Bucket,
    delta: i64,
    before: StockBuckets,
) -> StockResult<MovementPlan> {
    if delta == 0 {
        return Err(StockError::Validation(
            "correction delta must be non-zero".to_string(),
        ));
    }

    let mut after = before;
    let current = before.get(bucket);
    let next = current + delta;
    *after.get_mut(bucket) = next;

    Ok(MovementPlan {
        kind: MovementKind::Correction,
        before,
        after,
        changes: vec![BucketChange {
            bucket,
            delta,
            before: current,
            after: next,
        }],
        flagged: next < 0,
    })
}

/// Fold a ledger (creation order) from the zero state
pub fn replay<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> StockBuckets {
    let mut buckets = StockBuckets::default();
    for movement in movements {
        *buckets.get_mut(movement.bucket) += movement.quantity_delta;
    }
    buckets
}

/// First ledger row whose `balance_before` does not continue the running value
pub fn first_broken_link<'a>(
    movements: impl IntoIterator<Item = &'a StockMovement>,
) -> Option<&'a StockMovement> {
    let mut running = StockBuckets::default();
    for movement in movements {
        let bucket = running.get_mut(movement.bucket);
        if *bucket != movement.balance_before
            || movement.balance_before + movement.quantity_delta != movement.balance_after
        {
            return Some(movement);
        }
        *bucket = movement.balance_after;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_movements(product_id: i64, plans: &[MovementPlan]) -> Vec<StockMovement> {
        let mut seq = 0;
        plans
            .iter()
            .flat_map(|plan| {
                plan.changes.iter().map(move |c| (plan.kind, *c))
            })
            .map(|(kind, change)| {
                seq += 1;
                StockMovement {
                    id: seq,
                    product_id,
                    kind,
                    bucket: change.bucket,
                    quantity_delta: change.delta,
                    balance_before: change.before,
                    balance_after: change.after,
                    actor_id: 1,
                    reason: String::new(),
                    related_order_id: None,
                    created_at: 0,
                }
            })
            .collect()
    }

    #[test]
    fn test_every_kind_moves_exactly_its_table_entries() {
        let start = StockBuckets::new(100, 100, 100);
        for kind in MovementKind::ALL {
            if kind.is_correction() {
                continue;
            }
            let plan = plan(1, kind, 7, start).unwrap();
            assert_eq!(plan.changes.len(), kind.effects().len(), "{kind}");
            for (change, (bucket, sign)) in plan.changes.iter().zip(kind.effects()) {
                assert_eq!(change.bucket, *bucket);
                assert_eq!(change.delta, sign * 7);
                assert_eq!(plan.after.get(*bucket), 100 + sign * 7);
            }
            // 未涉及的桶不变
            for bucket in Bucket::ALL {
                if kind.effects().iter().all(|(b, _)| *b != bucket) {
                    assert_eq!(plan.after.get(bucket), 100, "{kind} touched {bucket}");
                }
            }
        }
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        let start = StockBuckets::new(10, 0, 0);
        assert!(matches!(
            plan(1, MovementKind::Restock, 0, start),
            Err(StockError::Validation(_))
        ));
        assert!(matches!(
            plan(1, MovementKind::ReserveLocal, -2, start),
            Err(StockError::Validation(_))
        ));
        assert!(matches!(
            plan(1, MovementKind::Correction, 2, start),
            Err(StockError::Validation(_))
        ));
    }

    #[test]
    fn test_insufficient_stock_names_bucket() {
        let start = StockBuckets::new(2, 1, 0);
        match plan(9, MovementKind::ReserveLocal, 3, start) {
            Err(StockError::InsufficientStock {
                product_id,
                bucket,
                available,
                requested,
            }) => {
                assert_eq!(product_id, 9);
                assert_eq!(bucket, Bucket::Available);
                assert_eq!(available, 2);
                assert_eq!(requested, 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            plan(9, MovementKind::DeliverLocal, 2, start),
            Err(StockError::InsufficientStock {
                bucket: Bucket::ReservedLocal,
                ..
            })
        ));
    }

    #[test]
    fn test_correction_may_go_negative_and_is_flagged() {
        let start = StockBuckets::new(5, 1, 0);
        let plan = plan_correction(Bucket::ReservedLocal, -3, start).unwrap();
        assert!(plan.flagged);
        assert_eq!(plan.after.reserved_local, -2);
        assert_eq!(plan.after.available, 5);

        let plan = plan_correction(Bucket::ReservedLocal, 2, start).unwrap();
        assert!(!plan.flagged);
        assert!(plan_correction(Bucket::Available, 0, start).is_err());
    }

    #[test]
    fn test_replay_reproduces_buckets_and_conserves_total() {
        let mut state = StockBuckets::default();
        let mut plans = Vec::new();
        let mut restocked = 0;
        let mut removed = 0;
        for (kind, q) in [
            (MovementKind::Restock, 20),
            (MovementKind::ReserveLocal, 6),
            (MovementKind::ReserveExpress, 3),
            (MovementKind::DeliverLocal, 4),
            (MovementKind::ReturnLocal, 2),
            (MovementKind::CancelExpress, 1),
            (MovementKind::WithdrawExpress, 2),
            (MovementKind::Restock, 5),
        ] {
            let p = plan(1, kind, q, state).unwrap();
            state = p.after;
            match kind {
                MovementKind::Restock => restocked += q,
                MovementKind::DeliverLocal | MovementKind::WithdrawExpress => removed += q,
                _ => {}
            }
            plans.push(p);
        }

        let ledger = to_movements(1, &plans);
        assert_eq!(replay(&ledger), state);
        assert_eq!(state.total(), restocked - removed);
        assert!(first_broken_link(&ledger).is_none());
    }

    #[test]
    fn test_broken_link_detected() {
        let p = plan(1, MovementKind::Restock, 4, StockBuckets::default()).unwrap();
        let mut ledger = to_movements(1, &[p]);
        ledger[0].balance_before = 1;
        assert_eq!(first_broken_link(&ledger).map(|m| m.id), Some(1));
    }
}
