use crate::error::{Error, Result};
use crate::gateway::route::RateClass;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Requests allowed per window, per rate class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub auth: u32,
    pub read: u32,
    pub write: u32,
    pub admin: u32,
}

impl RateLimits {
    fn limit_for(&self, class: RateClass) -> u32 {
        match class {
            RateClass::Auth => self.auth,
            RateClass::Read => self.read,
            RateClass::Write => self.write,
            RateClass::Admin => self.admin,
        }
    }
}

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window rate limiter keyed by (class, caller).
///
/// Windows reset lazily on the first request after expiry; counts are
/// per-process, matching the per-entry-point throttling the gateway replaces.
pub struct RateLimiter {
    window: Duration,
    limits: RateLimits,
    buckets: Mutex<HashMap<(RateClass, String), Window>>,
}

impl RateLimiter {
    pub fn new(window: Duration, limits: RateLimits) -> Self {
        Self {
            window,
            limits,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one request for `caller` in `class`, rejecting with
    /// `RateLimited` once the window's budget is spent.
    pub async fn check(&self, class: RateClass, caller: &str) -> Result<()> {
        let limit = self.limits.limit_for(class);
        let now = Instant::now();

        let mut buckets = self.buckets.lock().await;
        let window = buckets
            .entry((class, caller.to_string()))
            .or_insert(Window {
                started: now,
                count: 0,
            });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= limit {
            let remaining = self.window.saturating_sub(now.duration_since(window.started));
            return Err(Error::RateLimited {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }

        window.count += 1;
        Ok(())
    }
}
