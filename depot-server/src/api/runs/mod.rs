//! Courier run API 模块
//!
//! 读取登录即可；创建、交接确认与回库确认需要 `delivery:manage`。

mod handler;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::permissions::DELIVERY_MANAGE;
use crate::auth::require_permission;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/runs", routes())
}

fn routes() -> Router<ServerState> {
    let read_routes = Router::new()
        .route("/", get(handler::list))
        .route("/{id}", get(handler::get_by_id));

    let write_routes = Router::new()
        .route("/", post(handler::create))
        .route("/{id}/handoff", post(handler::confirm_handoff))
        .route("/{id}/return", post(handler::confirm_return))
        .layer(middleware::from_fn(require_permission(DELIVERY_MANAGE)));

    read_routes.merge(write_routes)
}
