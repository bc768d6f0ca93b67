use depot_server::{Config, Server, ServerState, init_logger_with_file};
use shared::models::{Account, Role};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 环境变量 (.env 可选)
    dotenv::dotenv().ok();

    // 2. 加载配置 + 日志
    let config = Config::from_env();
    init_logger_with_file(Some(&config.log_level), config.log_dir.as_deref());
    shared::error::redact_system_errors(config.is_production());

    tracing::info!(environment = %config.environment, "Depot server starting...");

    // 3. 初始化服务器状态
    let state = ServerState::initialize(&config)?;
    bootstrap_admin(&state)?;

    // 4. 启动 HTTP 服务器
    let server = Server::with_state(config, state);
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

/// `BOOTSTRAP_ADMIN=<id>:<username>` 在目录为空时写入第一个管理员
fn bootstrap_admin(state: &ServerState) -> Result<(), Box<dyn std::error::Error>> {
    let Ok(raw) = std::env::var("BOOTSTRAP_ADMIN") else {
        return Ok(());
    };
    if !state.accounts.list()?.is_empty() {
        return Ok(());
    }

    let (id, username) = raw
        .split_once(':')
        .ok_or("BOOTSTRAP_ADMIN must look like <id>:<username>")?;
    let id: i64 = id.trim().parse()?;
    let username = username.trim().to_string();

    state.accounts.upsert(&Account {
        id,
        display_name: username.clone(),
        username,
        role: Role::Admin,
        is_active: true,
        created_at: shared::util::now_millis(),
    })?;
    tracing::warn!(account_id = id, "Bootstrap admin account created");
    Ok(())
}
