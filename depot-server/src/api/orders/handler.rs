//! Order API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use shared::models::{
    BulkDeleteRequest, BulkDeleteResult, CallbackRequest, Order, OrderCreate, OrderStatus,
    QuantityUpdate, TransitionRequest,
};
use shared::util::now_millis;

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::orders::state_machine;
use crate::security_log;
use crate::utils::validation::validate;
use crate::utils::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CallQueueQuery {
    /// Unix millis, defaults to now
    #[serde(default)]
    pub now: Option<i64>,
}

/// GET /api/orders?status=
pub async fn list(
    State(state): State<ServerState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Order>>> {
    Ok(Json(state.orders.list_orders(query.status)?))
}

/// GET /api/orders/{id}
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Order>> {
    Ok(Json(state.orders.get_order(id)?))
}

/// POST /api/orders - 录入 (状态 NEW，不动库存)
pub async fn create(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Json(payload): Json<OrderCreate>,
) -> AppResult<Json<Order>> {
    validate(&payload)?;
    Ok(Json(state.orders.create_order(payload, current_user.id)?))
}

/// POST /api/orders/{id}/transition
///
/// 所需权限由目标状态决定 (呼叫 / 配送管理 / 配送结果)
pub async fn transition(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<TransitionRequest>,
) -> AppResult<Json<Order>> {
    let permission = state_machine::required_permission(payload.to);
    if !current_user.has_permission(permission) {
        security_log!(
            "WARN",
            "permission_denied",
            user_id = current_user.id,
            order_id = id,
            target = payload.to.as_str(),
            required_permission = permission
        );
        return Err(AppError::forbidden(format!(
            "Permission denied: {}",
            permission
        )));
    }

    Ok(Json(state.orders.transition(id, payload, current_user.id)?))
}

/// POST /api/orders/{id}/callback
pub async fn schedule_callback(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<CallbackRequest>,
) -> AppResult<Json<Order>> {
    Ok(Json(
        state
            .orders
            .schedule_callback(id, payload.at, current_user.id)?,
    ))
}

/// GET /api/orders/call-queue - 待呼叫 (无回拨或回拨已到期)，最早优先
pub async fn call_queue(
    State(state): State<ServerState>,
    Query(query): Query<CallQueueQuery>,
) -> AppResult<Json<Vec<Order>>> {
    let now = query.now.unwrap_or_else(now_millis);
    Ok(Json(state.orders.call_queue(now)?))
}

/// PUT /api/orders/{id}/quantity
pub async fn update_quantity(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<QuantityUpdate>,
) -> AppResult<Json<Order>> {
    validate(&payload)?;
    Ok(Json(
        state
            .orders
            .update_quantity(id, payload.quantity, current_user.id)?,
    ))
}

/// POST /api/orders/bulk-delete - 删除并写入补偿流水 (单事务)
pub async fn bulk_delete(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Json(payload): Json<BulkDeleteRequest>,
) -> AppResult<Json<BulkDeleteResult>> {
    Ok(Json(state.orders.bulk_delete(
        &payload.order_ids,
        &payload.reason,
        current_user.id,
    )?))
}
