//! Account directory API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use shared::models::{Account, Role};
use shared::util::now_millis;
use validator::Validate;

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::security_log;
use crate::utils::validation::validate;
use crate::utils::{AppError, AppResult};

#[derive(Debug, Deserialize, Validate)]
pub struct AccountPayload {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    #[validate(length(min = 1, max = 120))]
    pub display_name: String,
    pub role: Role,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ActivePayload {
    pub is_active: bool,
}

/// GET /api/accounts
pub async fn list(State(state): State<ServerState>) -> AppResult<Json<Vec<Account>>> {
    Ok(Json(state.accounts.list()?))
}

/// PUT /api/accounts/{id} - 创建或更新目录条目
pub async fn upsert(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<AccountPayload>,
) -> AppResult<Json<Account>> {
    validate(&payload)?;
    if id <= 0 {
        return Err(AppError::validation("account id must be positive"));
    }

    let created_at = state
        .accounts
        .get(id)?
        .map(|a| a.created_at)
        .unwrap_or_else(now_millis);
    let account = Account {
        id,
        username: payload.username.trim().to_string(),
        display_name: payload.display_name.trim().to_string(),
        role: payload.role,
        is_active: payload.is_active,
        created_at,
    };
    state.accounts.upsert(&account)?;

    security_log!(
        "INFO",
        "account_upsert",
        actor_id = current_user.id,
        account_id = id,
        role = account.role.as_str(),
        is_active = account.is_active
    );
    Ok(Json(account))
}

/// POST /api/accounts/{id}/active - 停用后既有令牌立即失效
pub async fn set_active(
    State(state): State<ServerState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<ActivePayload>,
) -> AppResult<Json<Account>> {
    let account = state
        .accounts
        .set_active(id, payload.is_active)?
        .ok_or_else(|| AppError::not_found(format!("Account {}", id)))?;

    security_log!(
        "WARN",
        "account_active_changed",
        actor_id = current_user.id,
        account_id = id,
        is_active = payload.is_active
    );
    Ok(Json(account))
}
