//! Postgres-backed token and user stores.
//!
//! Every call is bounded by a 3 second deadline; the pool is shared and
//! safe to clone across tasks.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;

use versenotes_core::UserId;

use crate::token::{Scope, Token};
use crate::AuthIdentity;

const DB_CALL_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("database call timed out")]
    Timeout,

    #[error("a user with this email address already exists")]
    DuplicateEmail,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::DuplicateEmail;
            }
        }
        StoreError::Database(err.to_string())
    }
}

async fn bounded<T>(
    fut: impl Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(DB_CALL_TIMEOUT, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout),
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: &Token) -> Result<(), StoreError>;

    /// Look up a non-expired authentication token by its stored hash and
    /// return the identity it names.
    async fn lookup_authentication(
        &self,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<AuthIdentity>, StoreError>;

    /// Find the owner of a non-expired token in the given scope.
    async fn find_user_for_token(
        &self,
        scope: Scope,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>, StoreError>;

    async fn delete_all_for_user(&self, scope: Scope, user_id: UserId) -> Result<(), StoreError>;

    /// Remove expired rows; returns how many went away.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, token: &Token) -> Result<(), StoreError> {
        bounded(
            sqlx::query(
                r#"
                INSERT INTO tokens (hash, user_id, expiry, scope)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&token.hash)
            .bind(token.user_id.get())
            .bind(token.expiry)
            .bind(token.scope.as_str())
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn lookup_authentication(
        &self,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<AuthIdentity>, StoreError> {
        let row = bounded(
            sqlx::query(
                r#"
                SELECT users.id, users.activated
                FROM tokens
                INNER JOIN users ON users.id = tokens.user_id
                WHERE tokens.hash = $1
                  AND tokens.scope = $2
                  AND tokens.expiry > $3
                "#,
            )
            .bind(hash)
            .bind(Scope::Authentication.as_str())
            .bind(now)
            .fetch_optional(&self.pool),
        )
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let id: i64 = row.try_get("id").map_err(StoreError::from)?;
                let activated: bool = row.try_get("activated").map_err(StoreError::from)?;
                Ok(Some(AuthIdentity {
                    user_id: UserId::new(id),
                    activated,
                }))
            }
        }
    }

    async fn find_user_for_token(
        &self,
        scope: Scope,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<UserId>, StoreError> {
        let row = bounded(
            sqlx::query(
                r#"
                SELECT user_id
                FROM tokens
                WHERE hash = $1
                  AND scope = $2
                  AND expiry > $3
                "#,
            )
            .bind(hash)
            .bind(scope.as_str())
            .bind(now)
            .fetch_optional(&self.pool),
        )
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let id: i64 = row.try_get("user_id").map_err(StoreError::from)?;
                Ok(Some(UserId::new(id)))
            }
        }
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: UserId) -> Result<(), StoreError> {
        bounded(
            sqlx::query(
                r#"
                DELETE FROM tokens
                WHERE scope = $1
                  AND user_id = $2
                "#,
            )
            .bind(scope.as_str())
            .bind(user_id.get())
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = bounded(
            sqlx::query("DELETE FROM tokens WHERE expiry < $1")
                .bind(now)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }
}

/// A user row as the auth flows need it.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub activated: bool,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<UserRecord, StoreError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn get(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

    async fn set_activated(&self, id: UserId) -> Result<(), StoreError>;

    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> Result<(), StoreError>;
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: PgRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        id: UserId::new(row.try_get("id")?),
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        activated: row.try_get("activated")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<UserRecord, StoreError> {
        let row = bounded(
            sqlx::query(
                r#"
                INSERT INTO users (username, email, password_hash, activated, created_at)
                VALUES ($1, $2, $3, false, $4)
                RETURNING id, username, email, password_hash, activated, created_at
                "#,
            )
            .bind(username)
            .bind(email)
            .bind(password_hash)
            .bind(now)
            .fetch_one(&self.pool),
        )
        .await?;

        row_to_user(row).map_err(StoreError::from)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = bounded(
            sqlx::query(
                r#"
                SELECT id, username, email, password_hash, activated, created_at
                FROM users
                WHERE email = $1
                "#,
            )
            .bind(email)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.map(row_to_user).transpose().map_err(StoreError::from)
    }

    async fn get(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let row = bounded(
            sqlx::query(
                r#"
                SELECT id, username, email, password_hash, activated, created_at
                FROM users
                WHERE id = $1
                "#,
            )
            .bind(id.get())
            .fetch_optional(&self.pool),
        )
        .await?;

        row.map(row_to_user).transpose().map_err(StoreError::from)
    }

    async fn set_activated(&self, id: UserId) -> Result<(), StoreError> {
        bounded(
            sqlx::query("UPDATE users SET activated = true WHERE id = $1")
                .bind(id.get())
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> Result<(), StoreError> {
        bounded(
            sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
                .bind(password_hash)
                .bind(id.get())
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}
