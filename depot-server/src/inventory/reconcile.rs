//! Reconciliation / audit engine
//!
//! Diagnosis and repair are separate entry points:
//! - `compute_expected`, `audit_all`, `verify_ledger`,
//!   `products_with_negative_bucket` only read.
//! - `apply_correction` writes one CORRECTION movement and is reachable
//!   only from an explicit operator request. The periodic sweep never
//!   calls it.

use shared::models::{
    AuditReport, Bucket, CourierRun, DeliveryChannel, LedgerReplay, MovementOutcome,
    NegativeBucketEntry, Order, OrderStatus, ReconciliationReport,
};
use shared::util::now_millis;

use super::buckets::{MovementContext, StockManager};
use super::error::{StockError, StockResult};
use crate::security_log;

/// Does this order hold units in `reserved_local`?
///
/// LOCAL channel, a status between assignment and confirmed return, goods
/// handed to the courier, and a run still out (handoff confirmed, return not).
pub fn holds_local_reservation(order: &Order, run: Option<&CourierRun>) -> bool {
    order.delivery_channel == DeliveryChannel::Local
        && matches!(
            order.status,
            OrderStatus::Assigned
                | OrderStatus::Refused
                | OrderStatus::DeliveryCancelled
                | OrderStatus::Returned
        )
        && order.handed_off
        && run.is_some_and(CourierRun::holds_stock)
}

#[derive(Clone)]
pub struct Reconciler {
    stock: StockManager,
}

impl Reconciler {
    pub fn new(stock: StockManager) -> Self {
        Self { stock }
    }

    /// Expected `reserved_local` from the order set, and the drift
    pub fn compute_expected(&self, product_id: i64) -> StockResult<ReconciliationReport> {
        let (product, orders) = self
            .stock
            .storage()
            .product_orders_with_runs(product_id)?
            .ok_or(StockError::ProductNotFound(product_id))?;

        let mut expected = 0;
        let mut contributing = Vec::new();
        for (order, run) in &orders {
            if holds_local_reservation(order, run.as_ref()) {
                expected += order.quantity;
                contributing.push(order.id);
            }
        }

        let report = ReconciliationReport {
            product_id,
            product_code: product.code,
            current_reserved_local: product.stock.reserved_local,
            expected_reserved_local: expected,
            discrepancy: product.stock.reserved_local - expected,
            contributing_orders: contributing,
        };

        if report.has_discrepancy() {
            tracing::warn!(
                product_id,
                current = report.current_reserved_local,
                expected = report.expected_reserved_local,
                discrepancy = report.discrepancy,
                "reserved_local drift detected"
            );
        }
        Ok(report)
    }

    /// Replay the ledger and compare with stored buckets
    pub fn verify_ledger(&self, product_id: i64) -> StockResult<LedgerReplay> {
        self.stock.replay(product_id)
    }

    /// Sweep every product (read-only)
    pub fn audit_all(&self) -> StockResult<AuditReport> {
        let products = self.stock.list_products()?;
        let mut discrepancies = Vec::new();
        let mut ledger_mismatches = Vec::new();

        for product in &products {
            let report = self.compute_expected(product.id)?;
            if report.has_discrepancy() {
                discrepancies.push(report);
            }
            let replay = self.verify_ledger(product.id)?;
            if !replay.consistent {
                ledger_mismatches.push(replay);
            }
        }

        Ok(AuditReport {
            generated_at: now_millis(),
            products_checked: products.len(),
            discrepancies,
            ledger_mismatches,
        })
    }

    pub fn products_with_negative_bucket(&self) -> StockResult<Vec<NegativeBucketEntry>> {
        Ok(self
            .stock
            .list_products()?
            .into_iter()
            .filter_map(|p| {
                let negative = p.stock.negative_buckets();
                (!negative.is_empty()).then(|| NegativeBucketEntry {
                    product_id: p.id,
                    product_code: p.code,
                    buckets: p.stock,
                    negative,
                })
            })
            .collect())
    }

    /// Operator repair: one CORRECTION movement on `reserved_local`
    pub fn apply_correction(
        &self,
        product_id: i64,
        delta: i64,
        reason: &str,
        actor_id: i64,
    ) -> StockResult<MovementOutcome> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(StockError::Validation(
                "a correction needs a reason".to_string(),
            ));
        }

        let storage = self.stock.storage();
        let txn = storage.begin_write()?;
        let outcome = self.stock.apply_correction_txn(
            &txn,
            product_id,
            Bucket::ReservedLocal,
            delta,
            &MovementContext::new(actor_id, reason),
        )?;
        txn.commit().map_err(super::storage::StorageError::from)?;

        security_log!(
            "WARN",
            "stock_correction",
            product_id = product_id,
            delta = delta,
            actor_id = actor_id,
            reason = reason
        );
        Ok(outcome)
    }
}
