//! 账号目录与凭证解析
//!
//! 令牌只携带用户 ID；角色与启用状态以账号目录为准。
//!
//! # Tables
//!
//! | Table | Key | Value |
//! |-------|-----|-------|
//! | `accounts` | `account_id` | JSON `Account` |
//! | `usernames` | `username` | `account_id` |

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use shared::models::Account;
use shared::{AppError, ErrorCode};
use thiserror::Error;

use super::jwt::{CurrentUser, JwtError, JwtService};

const ACCOUNTS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("accounts");
const USERNAMES_TABLE: TableDefinition<&str, i64> = TableDefinition::new("usernames");

/// 账号目录错误
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Username already taken: {0}")]
    UsernameTaken(String),
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::UsernameTaken(name) => {
                AppError::with_message(ErrorCode::AlreadyExists, format!("Username '{}' already taken", name))
            }
            other => AppError::database(other.to_string()),
        }
    }
}

pub type AccountResult<T> = Result<T, AccountError>;

/// 账号目录 (redb)
#[derive(Clone)]
pub struct AccountDirectory {
    db: Arc<Database>,
}

impl AccountDirectory {
    pub fn open(path: impl AsRef<Path>) -> AccountResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> AccountResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> AccountResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACCOUNTS_TABLE)?;
            let _ = write_txn.open_table(USERNAMES_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// 新增或覆盖账号 (由身份服务同步)
    pub fn upsert(&self, account: &Account) -> AccountResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut accounts = txn.open_table(ACCOUNTS_TABLE)?;
            let mut usernames = txn.open_table(USERNAMES_TABLE)?;

            if let Some(owner) = usernames.get(account.username.as_str())?.map(|g| g.value())
                && owner != account.id
            {
                return Err(AccountError::UsernameTaken(account.username.clone()));
            }

            // 改名时释放旧用户名
            let previous: Option<Account> = match accounts.get(account.id)? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };
            if let Some(prev) = previous
                && prev.username != account.username
            {
                usernames.remove(prev.username.as_str())?;
            }

            let value = serde_json::to_vec(account)?;
            accounts.insert(account.id, value.as_slice())?;
            usernames.insert(account.username.as_str(), account.id)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: i64) -> AccountResult<Option<Account>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS_TABLE)?;
        match table.get(id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn find_by_username(&self, username: &str) -> AccountResult<Option<Account>> {
        let id = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(USERNAMES_TABLE)?;
            table.get(username)?.map(|g| g.value())
        };
        match id {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> AccountResult<Vec<Account>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS_TABLE)?;
        let mut accounts = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            accounts.push(serde_json::from_slice(value.value())?);
        }
        Ok(accounts)
    }

    /// 启用 / 停用账号，返回更新后的账号
    pub fn set_active(&self, id: i64, active: bool) -> AccountResult<Option<Account>> {
        let Some(mut account) = self.get(id)? else {
            return Ok(None);
        };
        account.is_active = active;
        self.upsert(&account)?;
        Ok(Some(account))
    }

    /// 显示名 (用于私聊会话名称)
    pub fn display_name(&self, id: i64) -> AccountResult<Option<String>> {
        Ok(self.get(id)?.map(|a| a.display_name))
    }
}

/// 凭证解析失败原因
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential missing")]
    Missing,

    #[error(transparent)]
    Token(#[from] JwtError),

    #[error("unknown account: {0}")]
    UnknownAccount(i64),

    #[error("account disabled: {0}")]
    Disabled(i64),

    #[error(transparent)]
    Directory(#[from] AccountError),
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Missing => AppError::unauthorized(),
            CredentialError::Token(JwtError::ExpiredToken) => AppError::token_expired(),
            CredentialError::Token(_) => AppError::invalid_token("Invalid token"),
            CredentialError::UnknownAccount(_) => AppError::invalid_token("Unknown account"),
            CredentialError::Disabled(_) => AppError::new(ErrorCode::AccountDisabled),
            CredentialError::Directory(e) => e.into(),
        }
    }
}

/// 把不透明凭证解析为 `{userId, role, active}`
///
/// HTTP 中间件与 WebSocket 握手共用。
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<CurrentUser, CredentialError>;
}

/// JWT + 账号目录
pub struct JwtCredentialResolver {
    jwt: Arc<JwtService>,
    accounts: AccountDirectory,
}

impl JwtCredentialResolver {
    pub fn new(jwt: Arc<JwtService>, accounts: AccountDirectory) -> Self {
        Self { jwt, accounts }
    }
}

#[async_trait]
impl CredentialResolver for JwtCredentialResolver {
    async fn resolve(&self, token: &str) -> Result<CurrentUser, CredentialError> {
        if token.is_empty() {
            return Err(CredentialError::Missing);
        }
        let claims = self.jwt.validate_token(token)?;
        let token_user = CurrentUser::try_from(claims)?;

        let account = self
            .accounts
            .get(token_user.id)?
            .ok_or(CredentialError::UnknownAccount(token_user.id))?;
        if !account.is_active {
            return Err(CredentialError::Disabled(account.id));
        }

        // 目录中的角色优先于令牌中的角色
        Ok(CurrentUser::new(account.id, account.username, account.role))
    }
}
