//! Chat API 模块
//!
//! 会话列表、历史、成员管理与搜索。实时收发走 `/ws/chat`，这里的成员变更
//! 和已读回执会同步到在线连接。
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/chat/conversations | GET / POST | 列表 / 创建 |
//! | /api/chat/conversations/{id} | GET | 详情 (成员) |
//! | /api/chat/conversations/{id}/messages | GET | 历史 |
//! | /api/chat/conversations/{id}/participants | POST | 添加成员 |
//! | /api/chat/conversations/{id}/participants/{user_id} | DELETE | 移除成员 |
//! | /api/chat/conversations/{id}/read | POST | 标记已读 |
//! | /api/chat/messages/{id}/reactions | GET | 反应列表 |
//! | /api/chat/search | GET | 搜索 |
//! | /api/chat/admin/* | GET | 管理员视图 |

mod handler;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::auth::require_admin;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/chat", routes())
}

fn routes() -> Router<ServerState> {
    let user_routes = Router::new()
        .route(
            "/conversations",
            get(handler::list_conversations).post(handler::create_conversation),
        )
        .route("/conversations/{id}", get(handler::get_conversation))
        .route("/conversations/{id}/messages", get(handler::messages))
        .route(
            "/conversations/{id}/participants",
            post(handler::add_participants),
        )
        .route(
            "/conversations/{id}/participants/{user_id}",
            delete(handler::remove_participant),
        )
        .route("/conversations/{id}/read", post(handler::mark_read))
        .route("/messages/{id}/reactions", get(handler::reactions))
        .route("/search", get(handler::search));

    let admin_routes = Router::new()
        .route("/admin/stats", get(handler::admin_stats))
        .route("/admin/conversations", get(handler::admin_conversations))
        .route("/admin/messages", get(handler::admin_messages))
        .layer(middleware::from_fn(require_admin));

    user_routes.merge(admin_routes)
}
