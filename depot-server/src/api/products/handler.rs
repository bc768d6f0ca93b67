//! Product API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use shared::models::{MovementOutcome, Product, ProductCreate, RestockRequest, StockMovement};

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::utils::AppResult;
use crate::utils::validation::validate;

/// GET /api/products - 获取所有商品 (含三个库存桶)
pub async fn list(State(state): State<ServerState>) -> AppResult<Json<Vec<Product>>> {
    Ok(Json(state.stock.list_products()?))
}

/// GET /api/products/{id}
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Product>> {
    Ok(Json(state.stock.get_product(id)?))
}

/// POST /api/products - 创建商品，初始库存记为 RESTOCK
pub async fn create(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Json(payload): Json<ProductCreate>,
) -> AppResult<Json<Product>> {
    validate(&payload)?;
    let product = state.stock.create_product(payload, current_user.id)?;
    Ok(Json(product))
}

/// POST /api/products/{id}/restock
pub async fn restock(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<RestockRequest>,
) -> AppResult<Json<MovementOutcome>> {
    validate(&payload)?;
    let outcome = state
        .stock
        .restock(id, payload.quantity, current_user.id, payload.reason)?;
    Ok(Json(outcome))
}

/// GET /api/products/{id}/movements - 流水 (创建顺序)
pub async fn movements(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<StockMovement>>> {
    Ok(Json(state.stock.movements(id)?))
}
