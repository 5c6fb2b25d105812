//! Per-actor invocation ceiling over a rolling window.
//!
//! Advisory abuse protection, not a security boundary: windows live in
//! memory only and do not survive a restart.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Allowed,
    Denied { retry_after: Duration },
}

#[derive(Debug)]
struct RateLimitWindow {
    count: u32,
    window_reset_at: Instant,
}

pub struct RateLimiter {
    ceiling: u32,
    window: Duration,
    windows: Mutex<HashMap<String, RateLimitWindow>>,
}

impl RateLimiter {
    pub fn new(ceiling: u32, window: Duration) -> Self {
        Self {
            ceiling,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one invocation for `actor_id`, or deny without mutating once
    /// the ceiling is reached for the current window.
    pub fn try_acquire(&self, actor_id: &str) -> Acquire {
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match windows.get_mut(actor_id) {
            Some(window) if now < window.window_reset_at => {
                if window.count >= self.ceiling {
                    Acquire::Denied {
                        retry_after: window.window_reset_at - now,
                    }
                } else {
                    window.count += 1;
                    Acquire::Allowed
                }
            }
            _ => {
                windows.insert(
                    actor_id.to_string(),
                    RateLimitWindow {
                        count: 1,
                        window_reset_at: now + self.window,
                    },
                );
                Acquire::Allowed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_ceiling_then_denies_with_retry_after() {
        let limiter = RateLimiter::new(3, Duration::from_secs(3600));
        for _ in 0..3 {
            assert_eq!(limiter.try_acquire("alice"), Acquire::Allowed);
        }
        match limiter.try_acquire("alice") {
            Acquire::Denied { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(3600));
            }
            Acquire::Allowed => panic!("fourth acquire should be denied"),
        }
        // Denial does not consume the window; a different actor is
        // unaffected.
        assert_eq!(limiter.try_acquire("bob"), Acquire::Allowed);
    }

    #[test]
    fn window_expiry_resets_the_count() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert_eq!(limiter.try_acquire("alice"), Acquire::Allowed);
        assert!(matches!(
            limiter.try_acquire("alice"),
            Acquire::Denied { .. }
        ));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(limiter.try_acquire("alice"), Acquire::Allowed);
    }
}
