//! Sliding-window, per-user operation limiter.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::{SandboxError, SandboxResult};
use crate::clock::Clock;

/// Window policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Operations allowed inside one window.
    pub max: usize,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max: 10,
            window_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.window_ms).unwrap_or(i64::MAX))
    }
}

/// Keeps, per key, the timestamps that fall inside the trailing window.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    hits: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn purge(window: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
        while window.front().is_some_and(|t| *t <= cutoff) {
            window.pop_front();
        }
    }

    /// Admit one operation for `key`, or refuse with `RATE_LIMIT_EXCEEDED`.
    pub fn check(&self, key: &str) -> SandboxResult<()> {
        let now = self.clock.now();
        let cutoff = now - self.config.window();
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        // Forget keys whose whole window has expired.
        hits.retain(|_, window| {
            Self::purge(window, cutoff);
            !window.is_empty()
        });
        let window = hits.entry(key.to_string()).or_default();

        if window.len() >= self.config.max {
            let retry_after_ms = window
                .front()
                .map(|oldest| (*oldest + self.config.window() - now).num_milliseconds().max(0))
                .unwrap_or(0) as u64;
            return Err(SandboxError::RateLimitExceeded {
                user_id: key.to_string(),
                max: self.config.max,
                window_ms: self.config.window_ms,
                retry_after_ms,
            });
        }

        window.push_back(now);
        Ok(())
    }

    /// Unused budget for `key` in the current window. Records nothing.
    pub fn remaining(&self, key: &str) -> usize {
        let cutoff = self.clock.now() - self.config.window();
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(window) = hits.get_mut(key) else {
            return self.config.max;
        };
        Self::purge(window, cutoff);
        let used = window.len();
        if used == 0 {
            hits.remove(key);
        }
        self.config.max.saturating_sub(used)
    }

    pub fn reset(&self, key: &str) {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sandbox::error::ErrorCode;

    fn limiter(max: usize, window_ms: u64) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let limiter = RateLimiter::new(RateLimitConfig { max, window_ms }, clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_five_per_minute_then_refuse_then_recover() {
        let (clock, limiter) = limiter(5, 60_000);
        for _ in 0..5 {
            limiter.check("alice").unwrap();
            clock.advance(Duration::seconds(1));
        }
        let err = limiter.check("alice").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::RateLimitExceeded));

        clock.advance(Duration::milliseconds(60_001));
        limiter.check("alice").unwrap();
    }

    #[test]
    fn test_window_slides_rather_than_resets() {
        let (clock, limiter) = limiter(2, 10_000);
        limiter.check("u").unwrap(); // t=0
        clock.advance(Duration::seconds(6));
        limiter.check("u").unwrap(); // t=6
        clock.advance(Duration::seconds(5));
        // t=11: the t=0 hit expired, the t=6 hit has not.
        limiter.check("u").unwrap();
        assert!(limiter.check("u").is_err());
    }

    #[test]
    fn test_keys_are_independent() {
        let (_clock, limiter) = limiter(1, 60_000);
        limiter.check("alice").unwrap();
        assert!(limiter.check("alice").is_err());
        limiter.check("bob").unwrap();
    }

    #[test]
    fn test_retry_after_points_at_oldest_expiry() {
        let (clock, limiter) = limiter(1, 1_000);
        limiter.check("u").unwrap();
        clock.advance(Duration::milliseconds(400));
        match limiter.check("u").unwrap_err() {
            SandboxError::RateLimitExceeded { retry_after_ms, .. } => {
                assert_eq!(retry_after_ms, 600)
            }
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_remaining_and_reset() {
        let (_clock, limiter) = limiter(3, 60_000);
        assert_eq!(limiter.remaining("u"), 3);
        limiter.check("u").unwrap();
        assert_eq!(limiter.remaining("u"), 2);
        limiter.reset("u");
        assert_eq!(limiter.remaining("u"), 3);
    }

    #[test]
    fn test_expired_keys_are_forgotten() {
        let (clock, limiter) = limiter(2, 1_000);
        for user in ["a", "b", "c"] {
            limiter.check(user).unwrap();
        }
        assert_eq!(limiter.hits.lock().unwrap().len(), 3);

        clock.advance(Duration::seconds(2));
        assert_eq!(limiter.remaining("a"), 2);
        assert_eq!(limiter.hits.lock().unwrap().len(), 2);

        limiter.check("d").unwrap();
        let hits = limiter.hits.lock().unwrap();
        assert_eq!(hits.keys().collect::<Vec<_>>(), vec!["d"]);
    }
}
