//! Courier run API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use shared::models::{CourierRun, RunConfirmation, RunCreate};

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::utils::AppResult;

/// GET /api/runs
pub async fn list(State(state): State<ServerState>) -> AppResult<Json<Vec<CourierRun>>> {
    Ok(Json(state.orders.list_runs()?))
}

/// GET /api/runs/{id}
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<CourierRun>> {
    Ok(Json(state.orders.get_run(id)?))
}

/// POST /api/runs
pub async fn create(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Json(payload): Json<RunCreate>,
) -> AppResult<Json<CourierRun>> {
    Ok(Json(state.orders.create_run(payload, current_user.id)?))
}

/// POST /api/runs/{id}/handoff - 货物随配送员出库，预留所有已分配订单
pub async fn confirm_handoff(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<RunConfirmation>> {
    Ok(Json(state.orders.confirm_handoff(id, current_user.id)?))
}

/// POST /api/runs/{id}/return - 未送达货物回库
pub async fn confirm_return(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<RunConfirmation>> {
    Ok(Json(state.orders.confirm_return(id, current_user.id)?))
}
