//! Account directory API 模块 (管理员)
//!
//! 令牌由外部身份服务签发；这里只维护目录中的角色和启用状态。

mod handler;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use crate::auth::require_admin;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/accounts", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(handler::list))
        .route("/{id}", put(handler::upsert))
        .route("/{id}/active", post(handler::set_active))
        .layer(middleware::from_fn(require_admin))
}
