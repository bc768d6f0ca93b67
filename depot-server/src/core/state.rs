use std::sync::Arc;

use crate::auth::{AccountDirectory, CredentialResolver, JwtCredentialResolver, JwtService};
use crate::chat::{
    ChatHub, ChatStorage, ConversationRegistry, LocalPresence, LocalRooms,
};
use crate::core::{Config, Result};
use crate::inventory::{InventoryStorage, Reconciler, StockManager};
use crate::orders::OrdersManager;

/// 服务器状态 - 持有所有服务的单例引用
///
/// 使用 Arc / 内部共享句柄实现浅拷贝，每个请求克隆一次。
///
/// # 服务组件
///
/// | 字段 | 类型 | 说明 |
/// |------|------|------|
/// | config | Config | 配置项 (不可变) |
/// | jwt_service | Arc<JwtService> | JWT 验证 |
/// | accounts | AccountDirectory | 账号目录 |
/// | credentials | Arc<dyn CredentialResolver> | 凭证 → 当前用户 |
/// | stock | StockManager | 三桶库存 + 流水 |
/// | orders | Arc<OrdersManager> | 订单状态机 + 配送批次 |
/// | reconciler | Reconciler | 对账 / 修正 |
/// | chat | ConversationRegistry | 会话持久化 |
/// | chat_hub | Arc<ChatHub> | 实时连接 |
#[derive(Clone)]
pub struct ServerState {
    /// 服务器配置
    pub config: Config,
    /// JWT 认证服务 (Arc 共享所有权)
    pub jwt_service: Arc<JwtService>,
    pub accounts: AccountDirectory,
    pub credentials: Arc<dyn CredentialResolver>,
    pub stock: StockManager,
    pub orders: Arc<OrdersManager>,
    pub reconciler: Reconciler,
    pub chat: ConversationRegistry,
    pub chat_hub: Arc<ChatHub>,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("work_dir", &self.config.work_dir)
            .field("chat_hub", &self.chat_hub)
            .finish_non_exhaustive()
    }
}

impl ServerState {
    /// 由已打开的存储组装状态
    pub fn new(
        config: Config,
        jwt_service: Arc<JwtService>,
        accounts: AccountDirectory,
        inventory: InventoryStorage,
        chat_storage: ChatStorage,
    ) -> Self {
        let credentials: Arc<dyn CredentialResolver> = Arc::new(JwtCredentialResolver::new(
            jwt_service.clone(),
            accounts.clone(),
        ));

        let stock = StockManager::new(inventory);
        let orders = Arc::new(OrdersManager::new(stock.clone()));
        let reconciler = Reconciler::new(stock.clone());

        let chat = ConversationRegistry::new(
            chat_storage,
            accounts.clone(),
            config.message_tombstone.clone(),
        );
        let chat_hub = Arc::new(ChatHub::new(
            chat.clone(),
            credentials.clone(),
            Arc::new(LocalPresence::new()),
            Arc::new(LocalRooms::new()),
        ));

        Self {
            config,
            jwt_service,
            accounts,
            credentials,
            stock,
            orders,
            reconciler,
            chat,
            chat_hub,
        }
    }

    /// 初始化服务器状态
    ///
    /// 按顺序初始化：
    /// 1. 工作目录
    /// 2. redb 数据库 (inventory / chat / accounts)
    /// 3. 各服务 (JWT, 库存, 订单, 会话, Hub)
    pub fn initialize(config: &Config) -> Result<Self> {
        config.ensure_work_dir_structure()?;

        let inventory = InventoryStorage::open(config.inventory_db_path())?;
        let chat_storage = ChatStorage::open(config.chat_db_path())?;
        let accounts = AccountDirectory::open(config.accounts_db_path())?;
        let jwt_service = Arc::new(JwtService::with_config(config.jwt.clone()));

        tracing::info!(work_dir = %config.work_dir, "Storage opened");
        Ok(Self::new(
            config.clone(),
            jwt_service,
            accounts,
            inventory,
            chat_storage,
        ))
    }

    /// 全内存状态 (测试)
    #[cfg(test)]
    pub fn in_memory(config: Config) -> Self {
        let jwt_service = Arc::new(JwtService::with_config(config.jwt.clone()));
        Self::new(
            config,
            jwt_service,
            AccountDirectory::open_in_memory().expect("in-memory accounts"),
            InventoryStorage::open_in_memory().expect("in-memory inventory"),
            ChatStorage::open_in_memory().expect("in-memory chat"),
        )
    }
}
