//! In-memory sliding-window fallback.
//!
//! Same admission semantics as the Redis script, but single-process and
//! driven by the injected clock. Used for offline runs and deterministic
//! tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use versenotes_core::Clock;

use crate::{Decision, Limiter, RateLimitError};

pub struct MemoryLimiter {
    limit: u32,
    window_ms: i64,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl MemoryLimiter {
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window_ms: window.as_millis() as i64,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Limiter for MemoryLimiter {
    async fn allow(&self, subject: &str) -> Result<Decision, RateLimitError> {
        let now_ms = self.clock.now_ms();
        let cutoff = now_ms - self.window_ms;

        let mut windows = self.windows.lock().unwrap();
        let entries = windows.entry(subject.to_string()).or_default();

        while entries.front().map_or(false, |&t| t <= cutoff) {
            entries.pop_front();
        }

        if entries.len() >= self.limit as usize {
            let retry_after = entries
                .front()
                .map(|&oldest| (self.window_ms - (now_ms - oldest)).max(0))
                .unwrap_or(self.window_ms);
            return Ok(Decision::deny(retry_after as u64));
        }

        entries.push_back(now_ms);
        Ok(Decision::allow())
    }
}
