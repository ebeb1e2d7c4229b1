//! Redis-script sliding-window limiter.
//!
//! Eviction, the cardinality check, the oldest-entry read, the sequence
//! bump and the insert all run as one atomic script under the key, so two
//! concurrent calls for the same key are serialized and exactly one of them
//! can cross the threshold. The clock is the Redis server's own (`TIME`),
//! so concurrent callers agree on "now".

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::{Action, Decision, Limiter, RateLimitError};

static SLIDING_WINDOW: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local key = KEYS[1]
        local seq_key = KEYS[2]
        local limit = tonumber(ARGV[1])
        local window_ms = tonumber(ARGV[2])

        redis.replicate_commands()

        local time = redis.call('TIME')
        local now_ms = time[1] * 1000 + math.floor(time[2] / 1000)
        local cutoff = now_ms - window_ms

        redis.call('ZREMRANGEBYSCORE', key, 0, cutoff)

        local count = redis.call('ZCARD', key)
        if count >= limit then
            local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
            local retry_after = window_ms
            if oldest[2] then
                retry_after = window_ms - (now_ms - tonumber(oldest[2]))
                if retry_after < 0 then
                    retry_after = 0
                end
            end
            return {0, retry_after}
        end

        -- The sequence counter disambiguates same-millisecond arrivals.
        local seq = redis.call('INCR', seq_key)
        redis.call('ZADD', key, now_ms, now_ms .. '-' .. seq)
        redis.call('PEXPIRE', key, window_ms)
        redis.call('PEXPIRE', seq_key, window_ms)
        return {1, 0}
    "#,
    )
});

pub struct SlidingWindowLimiter {
    conn: ConnectionManager,
    action: Action,
    limit: u32,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(conn: ConnectionManager, action: Action, limit: u32, window: Duration) -> Self {
        Self {
            conn,
            action,
            limit,
            window,
        }
    }

    fn key(&self, subject: &str) -> String {
        limiter_key(self.action, subject)
    }
}

fn limiter_key(action: Action, subject: &str) -> String {
    format!("rl:{}:{}", action.as_str(), subject)
}

#[async_trait]
impl Limiter for SlidingWindowLimiter {
    async fn allow(&self, subject: &str) -> Result<Decision, RateLimitError> {
        let key = self.key(subject);
        let seq_key = format!("{key}:seq");
        let mut conn = self.conn.clone();

        let (admitted, retry_after_ms): (i64, i64) = SLIDING_WINDOW
            .key(key)
            .key(seq_key)
            .arg(self.limit)
            .arg(self.window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Store(e.to_string()))?;

        if admitted == 1 {
            Ok(Decision::allow())
        } else {
            Ok(Decision::deny(retry_after_ms.max(0) as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_action_and_subject() {
        assert_eq!(limiter_key(Action::Ip, "10.0.0.1"), "rl:ip:10.0.0.1");
        assert_eq!(limiter_key(Action::Auth, "10.0.0.1"), "rl:auth:10.0.0.1");
        assert_eq!(limiter_key(Action::Note, "2001:db8::1"), "rl:note:2001:db8::1");
    }
}
