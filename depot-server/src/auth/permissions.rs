//! Permission Definitions
//!
//! 角色 → 权限 的静态映射。
//!
//! ## 设计原则
//! - 读取类接口 (商品、订单、会话) 登录即可使用
//! - 库存写入、对账、修正按功能模块授权
//! - 修正 (`stock:correct`) 与批量删除 (`orders:delete`) 属于高风险操作
//! - admin 角色拥有全部权限

use shared::models::Role;

pub const STOCK_MANAGE: &str = "stock:manage";
pub const STOCK_AUDIT: &str = "stock:audit";
pub const STOCK_CORRECT: &str = "stock:correct";
pub const ORDERS_CALL: &str = "orders:call";
pub const ORDERS_DELIVER: &str = "orders:deliver";
pub const ORDERS_EDIT: &str = "orders:edit";
pub const ORDERS_DELETE: &str = "orders:delete";
pub const DELIVERY_MANAGE: &str = "delivery:manage";
pub const CHAT_MODERATE: &str = "chat:moderate";

/// 可配置权限列表（9 项）
pub const ALL_PERMISSIONS: &[&str] = &[
    // === 模块化权限 ===
    STOCK_MANAGE,    // 商品入库 / 补货
    STOCK_AUDIT,     // 对账报告
    ORDERS_CALL,     // 呼叫中心流转
    ORDERS_DELIVER,  // 配送结果
    ORDERS_EDIT,     // 修改数量
    DELIVERY_MANAGE, // 配送批次 交接/回库
    CHAT_MODERATE,   // 删除他人消息、广播发言

    // === 敏感操作 ===
    STOCK_CORRECT, // 库存修正
    ORDERS_DELETE, // 批量删除订单
];

pub const DEFAULT_MANAGER_PERMISSIONS: &[&str] = &[
    STOCK_MANAGE,
    STOCK_AUDIT,
    ORDERS_CALL,
    ORDERS_DELIVER,
    ORDERS_EDIT,
    DELIVERY_MANAGE,
    CHAT_MODERATE,
];

pub const DEFAULT_STOCK_KEEPER_PERMISSIONS: &[&str] =
    &[STOCK_MANAGE, STOCK_AUDIT, DELIVERY_MANAGE];

pub const DEFAULT_CALLER_PERMISSIONS: &[&str] = &[ORDERS_CALL, ORDERS_EDIT];

pub const DEFAULT_DELIVERER_PERMISSIONS: &[&str] = &[ORDERS_DELIVER];

/// Get permissions for a role
pub fn permissions_for(role: Role) -> Vec<String> {
    let perms: &[&str] = match role {
        Role::Admin => ALL_PERMISSIONS,
        Role::Manager => DEFAULT_MANAGER_PERMISSIONS,
        Role::StockKeeper => DEFAULT_STOCK_KEEPER_PERMISSIONS,
        Role::Caller => DEFAULT_CALLER_PERMISSIONS,
        Role::Deliverer => DEFAULT_DELIVERER_PERMISSIONS,
    };
    perms.iter().map(|s| s.to_string()).collect()
}

/// Validate if a permission string is valid
pub fn is_valid_permission(permission: &str) -> bool {
    ALL_PERMISSIONS.contains(&permission) || permission.ends_with(":*")
}
