//! Order API 模块
//!
//! 订单录入、状态流转、回拨队列、数量修改与批量删除。
//! 状态流转的权限取决于目标状态，在 handler 内检查。

mod handler;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use crate::auth::permissions::{ORDERS_CALL, ORDERS_DELETE, ORDERS_EDIT};
use crate::auth::require_permission;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/orders", routes())
}

fn routes() -> Router<ServerState> {
    let base_routes = Router::new()
        .route("/", get(handler::list).post(handler::create))
        .route("/call-queue", get(handler::call_queue))
        .route("/{id}", get(handler::get_by_id))
        .route("/{id}/transition", post(handler::transition));

    let call_routes = Router::new()
        .route("/{id}/callback", post(handler::schedule_callback))
        .layer(middleware::from_fn(require_permission(ORDERS_CALL)));

    let edit_routes = Router::new()
        .route("/{id}/quantity", put(handler::update_quantity))
        .layer(middleware::from_fn(require_permission(ORDERS_EDIT)));

    let delete_routes = Router::new()
        .route("/bulk-delete", post(handler::bulk_delete))
        .layer(middleware::from_fn(require_permission(ORDERS_DELETE)));

    base_routes
        .merge(call_routes)
        .merge(edit_routes)
        .merge(delete_routes)
}
