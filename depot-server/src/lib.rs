//! Depot Server - 订单履约后台
//!
//! # 架构概述
//!
//! - **库存** (`inventory`): 三桶库存 (可售 / 本地预留 / 快递预留) + 追加式流水
//! - **订单** (`orders`): 状态机、配送批次、交接与回库
//! - **对账** (`inventory::reconcile`): 预期预留 vs 实际，只读巡检 + 人工修正
//! - **会话** (`chat`): 会话注册表、实时 Hub、WebSocket 传输
//! - **认证** (`auth`): JWT + 账号目录
//! - **HTTP API** (`api`): RESTful 接口
//!
//! # 模块结构
//!
//! ```text
//! depot-server/src/
//! ├── core/          # 配置、状态、错误、后台任务
//! ├── auth/          # JWT、账号目录、权限
//! ├── inventory/     # redb 存储、库存桶、流水、对账
//! ├── orders/        # 状态机、定价、订单管理器
//! ├── chat/          # 会话、消息、实时 Hub
//! ├── api/           # HTTP 路由和处理器
//! └── utils/         # 日志、错误、校验
//! ```

pub mod api;
pub mod auth;
pub mod chat;
pub mod core;
pub mod inventory;
pub mod orders;
pub mod utils;

// Re-export 公共类型
pub use auth::{CurrentUser, JwtService};
pub use chat::{ChatHub, ConversationRegistry};
pub use core::{Config, Server, ServerState};
pub use inventory::{Reconciler, StockManager};
pub use orders::OrdersManager;
pub use utils::{AppError, AppResult};

// Re-export unified error types from shared
pub use utils::{ApiResponse, ErrorCategory, ErrorCode};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

// Security logging macro - 支持 tracing 格式说明符
#[macro_export]
macro_rules! security_log {
    ($level:expr, $event:expr, $($key:ident = $value:expr),*) => {
        tracing::info!(
            target: "security",
            level = $level,
            event = $event,
            $($key = $value),*
        );
    };
}
