//! Bounded polling for state the kernel materializes asynchronously.

use std::time::Duration;

/// Blocking delay source, injectable so tests do not have to wait.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Fixed-delay retry policy: at most `max_attempts` tries, `delay` between consecutive tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Call `attempt` (with a 1-based attempt number) until `done` accepts its result or the
    /// attempts run out, and return the last result. There is always at least one attempt.
    pub fn poll_until<T>(
        &self,
        sleeper: &dyn Sleeper,
        mut attempt: impl FnMut(u32) -> T,
        done: impl Fn(&T) -> bool,
    ) -> T {
        let attempts = self.max_attempts.max(1);
        let mut n = 1;
        loop {
            let result = attempt(n);
            if done(&result) || n >= attempts {
                return result;
            }
            sleeper.sleep(self.delay);
            n += 1;
        }
    }
}
