//! Sliding-window rate limiting, keyed per IP (data plane) or per
//! `(ip, operation)` (admin plane). Each key owns its own lock so unrelated
//! traffic never contends on a single global mutex.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::clock::Clock;

/// Snapshot of a single key's window, for the admin inspection surface.
#[derive(Debug, Clone, Copy)]
pub struct WindowStats {
    pub count: usize,
    pub oldest_age: Option<Duration>,
    pub blocked_until: Option<Instant>,
}

struct Window {
    timestamps: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl Window {
    fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
            blocked_until: None,
        }
    }

    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) > window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// A sliding-window limiter keyed by an arbitrary hashable key (`IpAddr` for
/// the data plane, `(IpAddr, String)` for the admin plane).
pub struct SlidingWindowLimiter<K> {
    windows: DashMap<K, Mutex<Window>>,
    clock: Arc<dyn Clock>,
}

/// Outcome of an admission check: either the request is let through, or the
/// caller should wait the returned duration before retrying.
pub enum Admission {
    Allowed,
    Denied { retry_after: Duration },
}

impl<K> SlidingWindowLimiter<K>
where
    K: std::hash::Hash + Eq + Clone,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Attempts to admit one request for `key` under `max_requests` per
    /// `window`. Recovers from a poisoned lock rather than propagating the
    /// panic, matching the corpus's lock-recovery convention for shared maps.
    pub fn admit(&self, key: K, window: Duration, max_requests: u32) -> Admission {
        self.admit_inner(key, window, max_requests, None)
    }

    /// Like `admit`, but on saturation enters the blocked state for
    /// `block_duration` instead of merely waiting out the sliding window —
    /// used by the admin limiter so a sustained attacker can't keep probing
    /// at exactly the window's edge.
    pub fn admit_with_block(
        &self,
        key: K,
        window: Duration,
        max_requests: u32,
        block_duration: Duration,
    ) -> Admission {
        self.admit_inner(key, window, max_requests, Some(block_duration))
    }

    fn admit_inner(
        &self,
        key: K,
        window: Duration,
        max_requests: u32,
        block_duration: Option<Duration>,
    ) -> Admission {
        let now = self.clock.now_monotonic();
        let entry = self.windows.entry(key).or_insert_with(|| Mutex::new(Window::new()));
        let mut guard = match entry.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(blocked_until) = guard.blocked_until {
            if now < blocked_until {
                return Admission::Denied {
                    retry_after: blocked_until - now,
                };
            }
            guard.blocked_until = None;
        }

        guard.evict(now, window);

        if guard.timestamps.len() >= max_requests as usize {
            if let Some(block) = block_duration {
                guard.blocked_until = Some(now + block);
                return Admission::Denied { retry_after: block };
            }
            let retry_after = guard
                .timestamps
                .front()
                .map(|&oldest| window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(window);
            return Admission::Denied { retry_after };
        }

        guard.timestamps.push_back(now);
        Admission::Allowed
    }

    /// Administratively blocks a key until `now + duration`, independent of
    /// its request count — used by the admin control plane to hard-stop an
    /// abusive IP.
    pub fn block(&self, key: K, duration: Duration) {
        let now = self.clock.now_monotonic();
        let entry = self.windows.entry(key).or_insert_with(|| Mutex::new(Window::new()));
        let mut guard = match entry.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.blocked_until = Some(now + duration);
    }

    pub fn clear(&self, key: &K) {
        self.windows.remove(key);
    }

    pub fn stats(&self, key: &K, window: Duration) -> Option<WindowStats> {
        let entry = self.windows.get(key)?;
        let mut guard = match entry.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = self.clock.now_monotonic();
        guard.evict(now, window);
        Some(WindowStats {
            count: guard.timestamps.len(),
            oldest_age: guard.timestamps.front().map(|&t| now.duration_since(t)),
            blocked_until: guard.blocked_until,
        })
    }

    /// Drops entries that have been empty and unblocked for a while, so the
    /// map doesn't grow without bound under a churn of distinct IPs.
    pub fn evict_stale(&self, window: Duration) {
        let now = self.clock.now_monotonic();
        self.windows.retain(|_, slot| {
            let mut guard = match slot.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.evict(now, window);
            !guard.timestamps.is_empty() || guard.blocked_until.map(|b| b > now).unwrap_or(false)
        });
    }
}

pub type DataPlaneLimiter = SlidingWindowLimiter<IpAddr>;
pub type AdminLimiter = SlidingWindowLimiter<(IpAddr, String)>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::fake::FakeClock;
    use std::net::Ipv4Addr;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn admits_up_to_the_limit_then_denies() {
        let clock = Arc::new(FakeClock::new());
        let limiter: DataPlaneLimiter = SlidingWindowLimiter::new(clock.clone());
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            assert!(matches!(limiter.admit(ip(), window, 3), Admission::Allowed));
        }
        assert!(matches!(
            limiter.admit(ip(), window, 3),
            Admission::Denied { .. }
        ));
    }

    #[test]
    fn window_slides_forward_with_the_clock() {
        let clock = Arc::new(FakeClock::new());
        let limiter: DataPlaneLimiter = SlidingWindowLimiter::new(clock.clone());
        let window = Duration::from_secs(10);

        for _ in 0..2 {
            assert!(matches!(limiter.admit(ip(), window, 2), Admission::Allowed));
        }
        assert!(matches!(
            limiter.admit(ip(), window, 2),
            Admission::Denied { .. }
        ));

        clock.advance(Duration::from_secs(11));
        assert!(matches!(limiter.admit(ip(), window, 2), Admission::Allowed));
    }

    #[test]
    fn clear_resets_a_key() {
        let clock = Arc::new(FakeClock::new());
        let limiter: DataPlaneLimiter = SlidingWindowLimiter::new(clock);
        let window = Duration::from_secs(60);
        limiter.admit(ip(), window, 1);
        assert!(matches!(
            limiter.admit(ip(), window, 1),
            Admission::Denied { .. }
        ));
        limiter.clear(&ip());
        assert!(matches!(limiter.admit(ip(), window, 1), Admission::Allowed));
    }

    #[test]
    fn admit_with_block_enters_blocked_state_on_saturation() {
        let clock = Arc::new(FakeClock::new());
        let limiter: AdminLimiter = SlidingWindowLimiter::new(clock.clone());
        let key = (ip(), "/auth/login".to_string());
        let window = Duration::from_secs(60);
        let block = Duration::from_secs(120);

        for _ in 0..3 {
            assert!(matches!(
                limiter.admit_with_block(key.clone(), window, 3, block),
                Admission::Allowed
            ));
        }

        match limiter.admit_with_block(key.clone(), window, 3, block) {
            Admission::Denied { retry_after } => assert_eq!(retry_after, block),
            Admission::Allowed => panic!("expected the 4th attempt to be blocked"),
        }

        // Still blocked well before the block duration elapses, independent
        // of the window having since slid clear.
        clock.advance(Duration::from_secs(61));
        assert!(matches!(
            limiter.admit_with_block(key.clone(), window, 3, block),
            Admission::Denied { .. }
        ));

        clock.advance(Duration::from_secs(60));
        assert!(matches!(
            limiter.admit_with_block(key, window, 3, block),
            Admission::Allowed
        ));
    }

    #[test]
    fn admin_block_denies_regardless_of_count() {
        let clock = Arc::new(FakeClock::new());
        let limiter: DataPlaneLimiter = SlidingWindowLimiter::new(clock.clone());
        limiter.block(ip(), Duration::from_secs(30));
        assert!(matches!(
            limiter.admit(ip(), Duration::from_secs(60), 1000),
            Admission::Denied { .. }
        ));
        clock.advance(Duration::from_secs(31));
        assert!(matches!(
            limiter.admit(ip(), Duration::from_secs(60), 1000),
            Admission::Allowed
        ));
    }
}
