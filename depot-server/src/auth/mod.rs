//! 认证授权模块
//!
//! 提供 JWT 凭证解析、权限管理和中间件：
//! - [`JwtService`] - JWT 令牌验证
//! - [`AccountDirectory`] - 账号目录 (角色 / 启用状态)
//! - [`CredentialResolver`] - 凭证 → 当前用户 (HTTP 与 WebSocket 共用)
//! - [`require_auth`] - 认证中间件
//! - [`require_permission`] - 权限检查中间件

pub mod accounts;
pub mod extractor;
pub mod jwt;
pub mod middleware;
pub mod permissions;

pub use accounts::{
    AccountDirectory, AccountError, CredentialError, CredentialResolver, JwtCredentialResolver,
};
pub use jwt::{Claims, CurrentUser, JwtConfig, JwtError, JwtService};
pub use middleware::{CurrentUserExt, require_admin, require_auth, require_permission};
