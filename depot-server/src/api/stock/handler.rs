//! Stock API Handlers
//!
//! 对账只读；修正是唯一的写入口，且只能由操作员显式调用。

use axum::{
    Json,
    extract::{Path, State},
};
use shared::models::{
    AuditReport, CorrectionRequest, LedgerReplay, MovementOutcome, NegativeBucketEntry, Product,
    ReconciliationReport,
};

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::utils::{AppError, AppResult};

/// GET /api/stock/low - available ≤ alert_threshold
pub async fn low_stock(State(state): State<ServerState>) -> AppResult<Json<Vec<Product>>> {
    Ok(Json(state.stock.low_stock()?))
}

/// GET /api/stock/audit - 全量巡检报告
pub async fn audit_all(State(state): State<ServerState>) -> AppResult<Json<AuditReport>> {
    let reconciler = state.reconciler.clone();
    let report = tokio::task::spawn_blocking(move || reconciler.audit_all())
        .await
        .map_err(|e| AppError::internal(e.to_string()))??;
    Ok(Json(report))
}

/// GET /api/stock/audit/{id} - 预期 reserved_local 与差异
pub async fn compute_expected(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ReconciliationReport>> {
    Ok(Json(state.reconciler.compute_expected(id)?))
}

/// GET /api/stock/audit/{id}/ledger - 流水重放
pub async fn verify_ledger(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<LedgerReplay>> {
    Ok(Json(state.reconciler.verify_ledger(id)?))
}

/// GET /api/stock/negative
pub async fn negative_buckets(
    State(state): State<ServerState>,
) -> AppResult<Json<Vec<NegativeBucketEntry>>> {
    Ok(Json(state.reconciler.products_with_negative_bucket()?))
}

/// POST /api/stock/{id}/corrections - 修正 reserved_local
pub async fn apply_correction(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<CorrectionRequest>,
) -> AppResult<Json<MovementOutcome>> {
    let outcome = state.reconciler.apply_correction(
        id,
        payload.delta,
        &payload.reason,
        current_user.id,
    )?;
    Ok(Json(outcome))
}
