//! Time source abstraction so rate limiting and audit timestamps can be
//! driven deterministically from tests.

use std::time::Instant;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync + 'static {
    fn now_monotonic(&self) -> Instant;
    fn now_wall(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }

    fn now_wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// A clock that starts at process startup and only advances when told to.
    pub struct FakeClock {
        origin: Instant,
        offset: Mutex<Duration>,
        wall_origin: DateTime<Utc>,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
                wall_origin: Utc::now(),
            }
        }

        pub fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for FakeClock {
        fn now_monotonic(&self) -> Instant {
            self.origin + *self.offset.lock().unwrap()
        }

        fn now_wall(&self) -> DateTime<Utc> {
            self.wall_origin
                + chrono::Duration::from_std(*self.offset.lock().unwrap()).unwrap()
        }
    }
}
