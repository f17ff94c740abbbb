//! Wait-until-ready primitive with an injectable delay.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Blocks the current run between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Shared flag used to abort a run from another thread.
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Attempt budget and fixed delay for [`wait_until_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5))
    }
}

#[derive(Debug)]
pub enum WaitError<E> {
    /// Every attempt failed. `last` is the final probe error, if any probe ran.
    Exhausted { attempts: u32, last: Option<E> },
    Cancelled,
}

/// Call `probe` until it succeeds or the attempt budget runs out, sleeping
/// `policy.delay` between failed attempts.
///
/// The probe receives the 1-based attempt number.
pub fn wait_until_ready<T, E, F>(
    mut probe: F,
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
    cancel: Option<&CancelToken>,
) -> Result<T, WaitError<E>>
where
    F: FnMut(u32) -> Result<T, E>,
{
    let cancelled = || cancel.is_some_and(CancelToken::is_cancelled);
    let mut last = None;

    for attempt in 1..=policy.attempts {
        if cancelled() {
            return Err(WaitError::Cancelled);
        }
        match probe(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => last = Some(err),
        }
        if attempt < policy.attempts {
            sleeper.sleep(policy.delay);
        }
    }

    if cancelled() {
        return Err(WaitError::Cancelled);
    }
    Err(WaitError::Exhausted {
        attempts: policy.attempts,
        last,
    })
}
