//! Sliding-window rate limiting.
//!
//! Admission decisions are per `(action, subject)` over a rolling window,
//! with a retry-after hint for denied callers. The Redis-script
//! implementation is the one that scales across processes;
//! [`MemoryLimiter`] is retained as an offline/test fallback behind the
//! same trait.

pub mod memory;
pub mod sliding_window;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

pub use memory::MemoryLimiter;
pub use sliding_window::SlidingWindowLimiter;

/// Route classes with their own budgets and failure policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Ip,
    Note,
    Auth,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Ip => "ip",
            Action::Note => "note",
            Action::Auth => "auth",
        }
    }

    /// What to do when the limiter store is unreachable. Unreachable state
    /// must never open the auth door.
    pub fn fails_open(&self) -> bool {
        !matches!(self, Action::Auth)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Milliseconds until the oldest windowed entry expires; 0 when admitted.
    pub retry_after_ms: u64,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_ms: 0,
        }
    }

    pub fn deny(retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            retry_after_ms,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate-limit store error: {0}")]
    Store(String),
}

/// Admission check for one action class.
#[async_trait]
pub trait Limiter: Send + Sync {
    async fn allow(&self, subject: &str) -> Result<Decision, RateLimitError>;
}

/// Per-action limiter bundle.
///
/// Applies the global enabled flag, bounds every store call with a deadline,
/// and resolves store failures per action: `auth` denies, `ip` and `note`
/// admit.
pub struct Limiters {
    enabled: bool,
    call_timeout: Duration,
    ip: Arc<dyn Limiter>,
    note: Arc<dyn Limiter>,
    auth: Arc<dyn Limiter>,
}

impl Limiters {
    pub fn new(
        enabled: bool,
        ip: Arc<dyn Limiter>,
        note: Arc<dyn Limiter>,
        auth: Arc<dyn Limiter>,
    ) -> Self {
        Self {
            enabled,
            call_timeout: Duration::from_secs(5),
            ip,
            note,
            auth,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Decide admission for `subject` under `action`.
    pub async fn check(&self, action: Action, subject: &str) -> Decision {
        if !self.enabled {
            return Decision::allow();
        }

        let limiter = match action {
            Action::Ip => &self.ip,
            Action::Note => &self.note,
            Action::Auth => &self.auth,
        };

        match tokio::time::timeout(self.call_timeout, limiter.allow(subject)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(err)) => {
                warn!(action = %action, error = %err, "rate limiter unavailable");
                self.fallback(action)
            }
            Err(_) => {
                warn!(action = %action, "rate limiter call timed out");
                self.fallback(action)
            }
        }
    }

    fn fallback(&self, action: Action) -> Decision {
        if action.fails_open() {
            Decision::allow()
        } else {
            Decision::deny(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysAllow;

    #[async_trait]
    impl Limiter for AlwaysAllow {
        async fn allow(&self, _subject: &str) -> Result<Decision, RateLimitError> {
            Ok(Decision::allow())
        }
    }

    struct AlwaysFail;

    #[async_trait]
    impl Limiter for AlwaysFail {
        async fn allow(&self, _subject: &str) -> Result<Decision, RateLimitError> {
            Err(RateLimitError::Store("connection refused".into()))
        }
    }

    struct Hangs;

    #[async_trait]
    impl Limiter for Hangs {
        async fn allow(&self, _subject: &str) -> Result<Decision, RateLimitError> {
            std::future::pending().await
        }
    }

    fn bundle_of(limiter: Arc<dyn Limiter>, enabled: bool) -> Limiters {
        Limiters::new(enabled, limiter.clone(), limiter.clone(), limiter)
            .with_call_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn disabled_bundle_admits_everything() {
        let limiters = bundle_of(Arc::new(AlwaysFail), false);
        for action in [Action::Ip, Action::Note, Action::Auth] {
            assert!(limiters.check(action, "10.0.0.1").await.allowed);
        }
    }

    #[tokio::test]
    async fn store_errors_fail_open_except_auth() {
        let limiters = bundle_of(Arc::new(AlwaysFail), true);
        assert!(limiters.check(Action::Ip, "10.0.0.1").await.allowed);
        assert!(limiters.check(Action::Note, "10.0.0.1").await.allowed);
        assert!(!limiters.check(Action::Auth, "10.0.0.1").await.allowed);
    }

    #[tokio::test]
    async fn timeouts_follow_the_same_policy() {
        let limiters = bundle_of(Arc::new(Hangs), true);
        assert!(limiters.check(Action::Ip, "10.0.0.1").await.allowed);
        assert!(!limiters.check(Action::Auth, "10.0.0.1").await.allowed);
    }

    #[tokio::test]
    async fn healthy_store_decisions_pass_through() {
        let limiters = bundle_of(Arc::new(AlwaysAllow), true);
        let decision = limiters.check(Action::Auth, "10.0.0.1").await;
        assert!(decision.allowed);
        assert_eq!(decision.retry_after_ms, 0);
    }
}
