//! Authentication: opaque bearer tokens, the write-through token cache,
//! and the Postgres-backed token and user stores.
//!
//! The hot path is [`TokenResolver::resolve`]: shape-check the token, try
//! the cache, fall back to the database, backfill opportunistically. The
//! database stores only SHA-256 hashes; plaintext never touches persistent
//! storage.

pub mod cache;
pub mod password;
pub mod resolver;
pub mod store;
pub mod token;

use thiserror::Error;

use versenotes_core::UserId;

pub use cache::{CacheError, RedisTokenCache, TokenCache};
pub use resolver::TokenResolver;
pub use store::{PgTokenStore, PgUserStore, StoreError, TokenStore, UserRecord, UserStore};
pub use token::{Scope, Token, TOKEN_LENGTH};

/// Identity facts attached to an authenticated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthIdentity {
    pub user_id: UserId,
    pub activated: bool,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// The token is malformed, expired, or matches no row.
    #[error("invalid or expired authentication token")]
    InvalidToken,

    /// The backing store could not answer; the result is unknown.
    #[error("transient auth backend failure: {0}")]
    Transient(String),

    #[error("auth internal error: {0}")]
    Internal(String),
}
