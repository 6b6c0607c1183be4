use std::time::Duration;

/// A bounded retry loop: at most `attempts` checks, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub attempts: u32,
    pub interval: Duration,
}

impl Poll {
    /// Wait for a freshly launched instance to start listening.
    pub const START_CONFIRM: Poll = Poll {
        attempts: 30,
        interval: Duration::from_millis(100),
    };

    /// Wait for a terminated instance to leave the process table.
    pub const STOP_CONFIRM: Poll = Poll {
        attempts: 30,
        interval: Duration::from_millis(100),
    };

    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Run `check` until it yields a value or the attempts run out. There is
    /// no sleep after the final attempt.
    pub async fn until<T>(&self, mut check: impl FnMut() -> Option<T>) -> Option<T> {
        for attempt in 0..self.attempts {
            if let Some(value) = check() {
                return Some(value);
            }
            if attempt + 1 < self.attempts && !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
        }
        None
    }
}
