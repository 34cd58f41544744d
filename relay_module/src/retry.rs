//! Exponential backoff around a single outbound call.

use std::time::Duration;

use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// What the wrapped operation wants the policy to do next.
#[derive(Debug)]
pub enum RetryDecision<T, E> {
    Done(T),
    /// Transient failure; back off and try again.
    Retry(E),
    /// Terminal failure; give up immediately.
    Fail(E),
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::fmt::Display> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("{0}")]
    Failed(E),
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread. Only the request being retried waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the zero-based `attempt`: base, 2x base, 4x base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// Every `Retry` is followed by a backoff sleep, including the last one,
    /// so a fully rate-limited run waits 1+2+4+8+16 base units in total.
    pub fn run<T, E, F>(&self, sleeper: &dyn Sleeper, mut op: F) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> RetryDecision<T, E>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                RetryDecision::Done(value) => return Ok(value),
                RetryDecision::Fail(err) => return Err(RetryError::Failed(err)),
                RetryDecision::Retry(err) => {
                    let delay = self.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        "transient failure: {}; retrying in {:?} (retry {}/{})",
                        err, delay, attempt, self.max_attempts
                    );
                    sleeper.sleep(delay);
                    if attempt >= self.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                }
            }
        }
    }
}
