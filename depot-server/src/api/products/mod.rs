//! Product API 模块
//!
//! 商品录入、补货与流水查询。库存桶只通过流水变化，没有直接写入接口。

mod handler;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::permissions::STOCK_MANAGE;
use crate::auth::require_permission;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/products", routes())
}

fn routes() -> Router<ServerState> {
    let read_routes = Router::new()
        .route("/", get(handler::list))
        .route("/{id}", get(handler::get_by_id))
        .route("/{id}/movements", get(handler::movements));

    let write_routes = Router::new()
        .route("/", post(handler::create))
        .route("/{id}/restock", post(handler::restock))
        .layer(middleware::from_fn(require_permission(STOCK_MANAGE)));

    read_routes.merge(write_routes)
}
