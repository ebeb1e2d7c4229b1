//! Redis token cache.
//!
//! Fronts the database lookup on every authenticated request. Entries are
//! plain `GET`/`SET EX`/`DEL` with a human-readable value encoding
//! `id:<int64>,activated:<bool>`. The cache may be stale up to its TTL;
//! the database stays authoritative on revocation.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

use versenotes_core::UserId;

use crate::AuthIdentity;

const CACHE_CALL_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache error: {0}")]
    Backend(String),

    #[error("cache call timed out")]
    Timeout,

    #[error("malformed cache entry: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait TokenCache: Send + Sync {
    /// `Ok(None)` is a miss; errors mean the cache could not answer.
    async fn get(&self, token: &str) -> Result<Option<AuthIdentity>, CacheError>;

    async fn set(
        &self,
        token: &str,
        identity: AuthIdentity,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Deleting an absent key is a no-op.
    async fn delete(&self, token: &str) -> Result<(), CacheError>;
}

pub struct RedisTokenCache {
    conn: ConnectionManager,
}

impl RedisTokenCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(token: &str) -> String {
        format!("token:{token}")
    }
}

#[async_trait]
impl TokenCache for RedisTokenCache {
    async fn get(&self, token: &str) -> Result<Option<AuthIdentity>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> =
            tokio::time::timeout(CACHE_CALL_TIMEOUT, conn.get(Self::key(token)))
                .await
                .map_err(|_| CacheError::Timeout)?
                .map_err(|e| CacheError::Backend(e.to_string()))?;

        match raw {
            None => Ok(None),
            Some(raw) => decode(&raw).map(Some),
        }
    }

    async fn set(
        &self,
        token: &str,
        identity: AuthIdentity,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        tokio::time::timeout(
            CACHE_CALL_TIMEOUT,
            conn.set_ex::<_, _, ()>(Self::key(token), encode(identity), ttl.as_secs()),
        )
        .await
        .map_err(|_| CacheError::Timeout)?
        .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete(&self, token: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        tokio::time::timeout(CACHE_CALL_TIMEOUT, conn.del::<_, ()>(Self::key(token)))
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}

fn encode(identity: AuthIdentity) -> String {
    format!(
        "id:{},activated:{}",
        identity.user_id.get(),
        identity.activated
    )
}

/// Fields are accepted in the documented order only.
fn decode(raw: &str) -> Result<AuthIdentity, CacheError> {
    let malformed = || CacheError::Malformed(raw.to_string());

    let (id_part, activated_part) = raw.split_once(',').ok_or_else(malformed)?;
    let user_id = id_part
        .strip_prefix("id:")
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(malformed)?;
    let activated = activated_part
        .strip_prefix("activated:")
        .and_then(|v| v.parse::<bool>().ok())
        .ok_or_else(malformed)?;

    Ok(AuthIdentity {
        user_id: UserId::new(user_id),
        activated,
    })
}
