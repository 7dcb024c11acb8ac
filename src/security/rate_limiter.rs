//! Per-caller sliding-window rate limiter.
//!
//! Each caller identity keeps the timestamps of its admitted requests within the
//! current window. A request is admitted while fewer than `limit.requests` timestamps
//! remain inside the window.

use crate::config::RateLimit;
use crate::error::{SecurityError, SecurityResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on tracked caller identities before idle ones are evicted.
const DEFAULT_MAX_CALLERS: usize = 10_000;

/// Sliding-window rate limiter keyed by caller identity.
pub struct RateLimiter {
    limit: RateLimit,
    callers: Mutex<HashMap<String, VecDeque<Instant>>>,
    max_callers: usize,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            callers: Mutex::new(HashMap::new()),
            max_callers: DEFAULT_MAX_CALLERS,
        }
    }

    pub fn with_max_callers(mut self, max_callers: usize) -> Self {
        self.max_callers = max_callers.max(1);
        self
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Admit or reject one request from `caller`.
    pub fn check(&self, caller: &str) -> SecurityResult<()> {
        self.check_at(caller, Instant::now())
    }

    pub(crate) fn check_at(&self, caller: &str, now: Instant) -> SecurityResult<()> {
        let window = self.limit.window;
        let mut callers = self.callers.lock();

        let admitted = callers.entry(caller.to_string()).or_default();
        prune(admitted, now, window);

        if admitted.len() >= self.limit.requests as usize {
            warn!(
                "Rate limit exceeded for {}: {} requests per {:?}",
                caller, self.limit.requests, window
            );
            return Err(SecurityError::RateLimited);
        }
        admitted.push_back(now);
        let remaining = self.limit.requests as usize - admitted.len();

        if callers.len() > self.max_callers {
            evict(&mut callers, now, window, self.max_callers, caller);
        }

        debug!("Rate limit permit for {}: {} remaining", caller, remaining);
        Ok(())
    }

    /// Requests `caller` may still make in the current window.
    pub fn remaining(&self, caller: &str) -> u32 {
        self.remaining_at(caller, Instant::now())
    }

    pub(crate) fn remaining_at(&self, caller: &str, now: Instant) -> u32 {
        let mut callers = self.callers.lock();
        let used = match callers.get_mut(caller) {
            Some(admitted) => {
                prune(admitted, now, self.limit.window);
                admitted.len() as u32
            }
            None => 0,
        };
        self.limit.requests.saturating_sub(used)
    }

    pub fn tracked_callers(&self) -> usize {
        self.callers.lock().len()
    }
}

fn prune(admitted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = admitted.front() {
        if now.duration_since(*front) >= window {
            admitted.pop_front();
        } else {
            break;
        }
    }
}

/// Drop callers with no requests in the window, then arbitrary others until under the cap.
/// The current caller is never evicted.
fn evict(
    callers: &mut HashMap<String, VecDeque<Instant>>,
    now: Instant,
    window: Duration,
    max_callers: usize,
    current: &str,
) {
    callers.retain(|key, admitted| {
        prune(admitted, now, window);
        key == current || !admitted.is_empty()
    });

    if callers.len() > max_callers {
        let overflow = callers.len() - max_callers;
        let victims: Vec<String> = callers
            .keys()
            .filter(|key| key.as_str() != current)
            .take(overflow)
            .cloned()
            .collect();
        for key in victims {
            callers.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(requests: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimit::new(requests, window))
    }

    #[test]
    fn test_third_request_in_window_rejected() {
        let limiter = limiter(2, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("10.0.0.1", now).is_ok());
        assert!(limiter.check_at("10.0.0.1", now).is_ok());
        assert!(matches!(
            limiter.check_at("10.0.0.1", now),
            Err(SecurityError::RateLimited)
        ));
    }

    #[test]
    fn test_request_after_window_succeeds() {
        let limiter = limiter(2, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("10.0.0.1", start).is_ok());
        assert!(limiter.check_at("10.0.0.1", start).is_ok());
        assert!(limiter.check_at("10.0.0.1", start + Duration::from_secs(30)).is_err());
        assert!(limiter.check_at("10.0.0.1", start + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(2, Duration::from_secs(10));
        let start = Instant::now();
        assert!(limiter.check_at("c", start).is_ok());
        assert!(limiter.check_at("c", start + Duration::from_secs(5)).is_ok());
        assert!(limiter.check_at("c", start + Duration::from_secs(9)).is_err());
        // first admission has aged out, second has not
        assert!(limiter.check_at("c", start + Duration::from_secs(10)).is_ok());
        assert!(limiter.check_at("c", start + Duration::from_secs(11)).is_err());
    }

    #[test]
    fn test_callers_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("a", now).is_ok());
        assert!(limiter.check_at("a", now).is_err());
        assert!(limiter.check_at("b", now).is_ok());
    }

    #[test]
    fn test_rejections_do_not_consume_quota() {
        let limiter = limiter(1, Duration::from_secs(10));
        let start = Instant::now();
        assert!(limiter.check_at("c", start).is_ok());
        for s in 1..10 {
            assert!(limiter.check_at("c", start + Duration::from_secs(s)).is_err());
        }
        assert!(limiter.check_at("c", start + Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_remaining() {
        let limiter = limiter(3, Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(limiter.remaining_at("c", now), 3);
        limiter.check_at("c", now).unwrap();
        assert_eq!(limiter.remaining_at("c", now), 2);
        assert_eq!(limiter.remaining_at("c", now + Duration::from_secs(60)), 3);
    }

    #[test]
    fn test_eviction_caps_tracked_callers() {
        let limiter = limiter(5, Duration::from_secs(60)).with_max_callers(2);
        let now = Instant::now();
        for caller in ["a", "b", "c", "d"] {
            limiter.check_at(caller, now).unwrap();
        }
        assert!(limiter.tracked_callers() <= 2);
        assert_eq!(limiter.remaining_at("d", now), 4);
    }

    #[test]
    fn test_real_clock() {
        let limiter = limiter(1, Duration::from_millis(20));
        assert!(limiter.check("c").is_ok());
        assert!(limiter.check("c").is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("c").is_ok());
    }
}
