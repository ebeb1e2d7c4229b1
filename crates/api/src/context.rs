//! Per-request principal context.

use versenotes_auth::AuthIdentity;

/// The caller identity attached by the authentication middleware.
///
/// Requests without an Authorization header pass through as anonymous;
/// routes that need an account use the activated-user guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    User(AuthIdentity),
}

impl Principal {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    pub fn identity(&self) -> Option<AuthIdentity> {
        match self {
            Principal::Anonymous => None,
            Principal::User(identity) => Some(*identity),
        }
    }
}

/// The raw bearer token for the current request, kept around so logout can
/// invalidate the cache entry it belongs to.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);
