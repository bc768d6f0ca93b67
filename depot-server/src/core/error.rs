//! 启动 / 运行期服务器错误

use thiserror::Error;

use crate::auth::accounts::AccountError;
use crate::chat::ChatError;
use crate::inventory::StorageError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("存储初始化失败: {0}")]
    Storage(#[from] StorageError),

    #[error("会话存储初始化失败: {0}")]
    Chat(#[from] ChatError),

    #[error("账号目录初始化失败: {0}")]
    Accounts(#[from] AccountError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("内部服务器错误")]
    Internal(#[from] anyhow::Error),
}

/// 服务器启动 Result 类型别名
pub type Result<T> = std::result::Result<T, ServerError>;
