//! Stock API 模块
//!
//! # 路由列表
//!
//! | 路径 | 方法 | 权限 |
//! |------|------|------|
//! | /api/stock/low | GET | 登录 |
//! | /api/stock/audit | GET | stock:audit |
//! | /api/stock/audit/{id} | GET | stock:audit |
//! | /api/stock/audit/{id}/ledger | GET | stock:audit |
//! | /api/stock/negative | GET | stock:audit |
//! | /api/stock/{id}/corrections | POST | stock:correct |

mod handler;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::permissions::{STOCK_AUDIT, STOCK_CORRECT};
use crate::auth::require_permission;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/stock", routes())
}

fn routes() -> Router<ServerState> {
    let read_routes = Router::new().route("/low", get(handler::low_stock));

    let audit_routes = Router::new()
        .route("/audit", get(handler::audit_all))
        .route("/audit/{id}", get(handler::compute_expected))
        .route("/audit/{id}/ledger", get(handler::verify_ledger))
        .route("/negative", get(handler::negative_buckets))
        .layer(middleware::from_fn(require_permission(STOCK_AUDIT)));

    let correction_routes = Router::new()
        .route("/{id}/corrections", post(handler::apply_correction))
        .layer(middleware::from_fn(require_permission(STOCK_CORRECT)));

    read_routes.merge(audit_routes).merge(correction_routes)
}
