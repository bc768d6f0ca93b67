//! Stock movement ledger types
//!
//! Every movement kind maps to a fixed list of `(bucket, sign)` effects.
//! The quantity carried by a request is always positive; the sign comes
//! from this table and never from the caller.

use serde::{Deserialize, Serialize};

use super::product::StockBuckets;

/// 库存桶
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Available,
    ReservedLocal,
    ReservedExpress,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [
        Bucket::Available,
        Bucket::ReservedLocal,
        Bucket::ReservedExpress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Available => "available",
            Bucket::ReservedLocal => "reserved_local",
            Bucket::ReservedExpress => "reserved_express",
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Movement kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Restock,
    ReserveLocal,
    DeliverLocal,
    ReturnLocal,
    ReserveExpress,
    CancelExpress,
    WithdrawExpress,
    Correction,
}

const RESTOCK_EFFECTS: &[(Bucket, i64)] = &[(Bucket::Available, 1)];
const RESERVE_LOCAL_EFFECTS: &[(Bucket, i64)] =
    &[(Bucket::Available, -1), (Bucket::ReservedLocal, 1)];
const DELIVER_LOCAL_EFFECTS: &[(Bucket, i64)] = &[(Bucket::ReservedLocal, -1)];
const RETURN_LOCAL_EFFECTS: &[(Bucket, i64)] =
    &[(Bucket::ReservedLocal, -1), (Bucket::Available, 1)];
const RESERVE_EXPRESS_EFFECTS: &[(Bucket, i64)] =
    &[(Bucket::Available, -1), (Bucket::ReservedExpress, 1)];
const CANCEL_EXPRESS_EFFECTS: &[(Bucket, i64)] =
    &[(Bucket::ReservedExpress, -1), (Bucket::Available, 1)];
const WITHDRAW_EXPRESS_EFFECTS: &[(Bucket, i64)] = &[(Bucket::ReservedExpress, -1)];

impl MovementKind {
    pub const ALL: [MovementKind; 8] = [
        MovementKind::Restock,
        MovementKind::ReserveLocal,
        MovementKind::DeliverLocal,
        MovementKind::ReturnLocal,
        MovementKind::ReserveExpress,
        MovementKind::CancelExpress,
        MovementKind::WithdrawExpress,
        MovementKind::Correction,
    ];

    /// Fixed effect table. CORRECTION returns an empty slice: its bucket
    /// and signed delta are chosen by the operator.
    pub fn effects(&self) -> &'static [(Bucket, i64)] {
        match self {
            MovementKind::Restock => RESTOCK_EFFECTS,
            MovementKind::ReserveLocal => RESERVE_LOCAL_EFFECTS,
            MovementKind::DeliverLocal => DELIVER_LOCAL_EFFECTS,
            MovementKind::ReturnLocal => RETURN_LOCAL_EFFECTS,
            MovementKind::ReserveExpress => RESERVE_EXPRESS_EFFECTS,
            MovementKind::CancelExpress => CANCEL_EXPRESS_EFFECTS,
            MovementKind::WithdrawExpress => WITHDRAW_EXPRESS_EFFECTS,
            MovementKind::Correction => &[],
        }
    }

    pub fn is_correction(&self) -> bool {
        matches!(self, MovementKind::Correction)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Restock => "RESTOCK",
            MovementKind::ReserveLocal => "RESERVE_LOCAL",
            MovementKind::DeliverLocal => "DELIVER_LOCAL",
            MovementKind::ReturnLocal => "RETURN_LOCAL",
            MovementKind::ReserveExpress => "RESERVE_EXPRESS",
            MovementKind::CancelExpress => "CANCEL_EXPRESS",
            MovementKind::WithdrawExpress => "WITHDRAW_EXPRESS",
            MovementKind::Correction => "CORRECTION",
        }
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger entry (one per affected bucket)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    /// Global monotonic sequence (creation order)
    pub id: u64,
    pub product_id: i64,
    pub kind: MovementKind,
    pub bucket: Bucket,
    pub quantity_delta: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub actor_id: i64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_order_id: Option<i64>,
    pub created_at: i64,
}

/// Result of one applied movement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementOutcome {
    pub product_id: i64,
    pub kind: MovementKind,
    pub before: StockBuckets,
    pub after: StockBuckets,
    pub movements: Vec<StockMovement>,
    /// CORRECTION drove a bucket below zero
    pub flagged: bool,
}

/// Ledger replay vs stored buckets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerReplay {
    pub product_id: i64,
    pub replayed: StockBuckets,
    pub stored: StockBuckets,
    pub movement_count: usize,
    pub consistent: bool,
}

/// Expected `reserved_local` computed from the order set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub product_id: i64,
    pub product_code: String,
    pub current_reserved_local: i64,
    pub expected_reserved_local: i64,
    /// current − expected
    pub discrepancy: i64,
    /// Orders whose quantity makes up the expected value
    pub contributing_orders: Vec<i64>,
}

impl ReconciliationReport {
    pub fn has_discrepancy(&self) -> bool {
        self.discrepancy != 0
    }
}

/// Sweep over every product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub generated_at: i64,
    pub products_checked: usize,
    pub discrepancies: Vec<ReconciliationReport>,
    pub ledger_mismatches: Vec<LedgerReplay>,
}

/// Product with at least one negative bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegativeBucketEntry {
    pub product_id: i64,
    pub product_code: String,
    pub buckets: StockBuckets,
    pub negative: Vec<Bucket>,
}

/// Operator correction of `reserved_local`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub delta: i64,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 每个 kind 的效果之和：非零说明改变总库存
    fn net_effect(kind: MovementKind) -> i64 {
        kind.effects().iter().map(|(_, sign)| sign).sum()
    }

    #[test]
    fn test_effect_table() {
        use Bucket::*;
        use MovementKind::*;
        assert_eq!(Restock.effects(), &[(Available, 1)]);
        assert_eq!(ReserveLocal.effects(), &[(Available, -1), (ReservedLocal, 1)]);
        assert_eq!(DeliverLocal.effects(), &[(ReservedLocal, -1)]);
        assert_eq!(ReturnLocal.effects(), &[(ReservedLocal, -1), (Available, 1)]);
        assert_eq!(
            ReserveExpress.effects(),
            &[(Available, -1), (ReservedExpress, 1)]
        );
        assert_eq!(
            CancelExpress.effects(),
            &[(ReservedExpress, -1), (Available, 1)]
        );
        assert_eq!(WithdrawExpress.effects(), &[(ReservedExpress, -1)]);
        assert!(Correction.effects().is_empty());
    }

    #[test]
    fn test_only_restock_and_removals_change_total() {
        for kind in MovementKind::ALL {
            let expected = match kind {
                MovementKind::Restock => 1,
                MovementKind::DeliverLocal | MovementKind::WithdrawExpress => -1,
                _ => 0,
            };
            assert_eq!(net_effect(kind), expected, "{kind}");
        }
    }

    #[test]
    fn test_each_bucket_at_most_once_per_kind() {
        for kind in MovementKind::ALL {
            let effects = kind.effects();
            for (i, (a, _)) in effects.iter().enumerate() {
                assert!(effects[i + 1..].iter().all(|(b, _)| a != b), "{kind}");
            }
        }
    }

    #[test]
    fn test_kind_serde_names() {
        for kind in MovementKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        let bucket: Bucket = serde_json::from_str("\"reserved_local\"").unwrap();
        assert_eq!(bucket, Bucket::ReservedLocal);
    }
}
