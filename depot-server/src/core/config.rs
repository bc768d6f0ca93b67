use std::path::PathBuf;

use crate::auth::JwtConfig;

/// 默认软删除占位文本
pub const DEFAULT_TOMBSTONE: &str = "This message was deleted";

/// 服务器配置
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | ./data | 工作目录 (redb 文件) |
/// | HTTP_PORT | 3000 | HTTP + WebSocket 端口 |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_DIR | (未设置) | 启用滚动文件日志 |
/// | JWT_SECRET | 开发环境自动生成 | HS256 密钥 (≥ 32 字符) |
/// | JWT_ISSUER | depot-auth | 令牌签发者 |
/// | JWT_AUDIENCE | depot-clients | 令牌受众 |
/// | MESSAGE_TOMBSTONE | This message was deleted | 软删除占位文本 |
/// | RECONCILE_INTERVAL_SECS | 0 (禁用) | 只读对账巡检周期 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/depot HTTP_PORT=8080 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存储 redb 数据库
    pub work_dir: String,
    /// HTTP API 服务端口
    pub http_port: u16,
    /// JWT 认证配置
    pub jwt: JwtConfig,
    /// 运行环境: development | production
    pub environment: String,
    /// 日志级别
    pub log_level: String,
    /// 日志目录 (None = stdout)
    pub log_dir: Option<String>,
    /// 消息软删除后的占位内容
    pub message_tombstone: String,
    /// 对账巡检周期 (秒), 0 = 禁用
    pub reconcile_interval_secs: u64,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "./data".into()),
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            jwt: JwtConfig::default(),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_dir: std::env::var("LOG_DIR").ok().filter(|d| !d.is_empty()),
            message_tombstone: std::env::var("MESSAGE_TOMBSTONE")
                .ok()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TOMBSTONE.into()),
            reconcile_interval_secs: std::env::var("RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, http_port: u16) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.http_port = http_port;
        config
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 是否开发环境
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// 库存 / 订单 / 配送 数据库
    pub fn inventory_db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("inventory.redb")
    }

    /// 会话 / 消息 数据库
    pub fn chat_db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("chat.redb")
    }

    /// 账号目录
    pub fn accounts_db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("accounts.redb")
    }

    /// 确保工作目录存在
    pub fn ensure_work_dir_structure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.work_dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_live_under_work_dir() {
        let config = Config::with_overrides("/tmp/depot-test", 4000);
        assert_eq!(config.http_port, 4000);
        assert_eq!(
            config.inventory_db_path(),
            PathBuf::from("/tmp/depot-test/inventory.redb")
        );
        assert_eq!(
            config.chat_db_path(),
            PathBuf::from("/tmp/depot-test/chat.redb")
        );
    }
}
