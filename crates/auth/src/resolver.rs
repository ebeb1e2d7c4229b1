//! Token resolution: cache front, database truth.
//!
//! Resolution order on every authenticated request: shape-check the token,
//! consult the cache, fall back to a hashed database lookup, and backfill
//! the cache opportunistically. A cache outage degrades to read-through;
//! only a database failure surfaces as transient.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use versenotes_core::{Clock, UserId};

use crate::cache::TokenCache;
use crate::store::TokenStore;
use crate::token;
use crate::{AuthError, AuthIdentity};

pub struct TokenResolver {
    cache: Arc<dyn TokenCache>,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
}

impl TokenResolver {
    pub fn new(
        cache: Arc<dyn TokenCache>,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            clock,
            cache_ttl,
        }
    }

    /// Resolve a bearer token to the identity it names.
    pub async fn resolve(&self, plaintext: &str) -> Result<AuthIdentity, AuthError> {
        if !token::is_well_formed(plaintext) {
            return Err(AuthError::InvalidToken);
        }

        match self.cache.get(plaintext).await {
            Ok(Some(identity)) => return Ok(identity),
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "token cache read failed; falling through to database");
            }
        }

        let hash = token::hash_token(plaintext);
        let identity = self
            .store
            .lookup_authentication(&hash, self.clock.now())
            .await
            .map_err(|e| AuthError::Transient(e.to_string()))?
            .ok_or(AuthError::InvalidToken)?;

        // Opportunistic backfill; a failure here never fails the resolution.
        if let Err(err) = self.cache.set(plaintext, identity, self.cache_ttl).await {
            warn!(error = %err, "token cache backfill failed");
        }

        Ok(identity)
    }

    /// Record a freshly minted login token in the cache.
    ///
    /// Call only after the database insert committed, so a surviving cache
    /// entry always reflects a once-committed row. The write itself is
    /// backgrounded; a slow cache cannot stall the login path.
    pub fn bind(&self, plaintext: &str, user_id: UserId, activated: bool) {
        let cache = Arc::clone(&self.cache);
        let plaintext = plaintext.to_string();
        let ttl = self.cache_ttl;
        tokio::spawn(async move {
            let identity = AuthIdentity { user_id, activated };
            if let Err(err) = cache.set(&plaintext, identity, ttl).await {
                warn!(error = %err, "token cache bind failed");
            }
        });
    }

    /// Drop the cache entry at logout. The database rows are the caller's
    /// problem; revocation there propagates within the cache TTL anyway.
    pub async fn invalidate(&self, plaintext: &str) -> Result<(), AuthError> {
        self.cache
            .delete(plaintext)
            .await
            .map_err(|e| AuthError::Transient(e.to_string()))
    }
}
