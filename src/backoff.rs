//! Retry backoff policies.
//!
//! A policy is a pure function from the attempt number to a delay. Policies
//! are plain values passed into scheduler configuration; there are no shared
//! default instances.

use std::time::Duration;

/// Maps a retry attempt number (1-based) to the delay before that attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Constant delay regardless of attempt.
    Fixed { delay: Duration },
    /// `step * attempt`, clamped to `max`.
    Linear { step: Duration, max: Duration },
    /// `step * fib(attempt)`, clamped to `max`. Saturates instead of
    /// wrapping when the multiplication overflows.
    Fibonacci { step: Duration, max: Duration },
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration) -> Self {
        BackoffPolicy::Fixed { delay }
    }

    pub fn linear(step: Duration, max: Duration) -> Self {
        BackoffPolicy::Linear { step, max }
    }

    pub fn fibonacci(step: Duration, max: Duration) -> Self {
        BackoffPolicy::Fibonacci { step, max }
    }

    /// Delay before the given attempt. Attempts are counted from 1.
    pub fn next(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed { delay } => delay,
            BackoffPolicy::Linear { step, max } => step.saturating_mul(attempt).min(max),
            BackoffPolicy::Fibonacci { step, max } => {
                if attempt < 2 {
                    return step.min(max);
                }
                let factor = fib(attempt);
                let millis = (step.as_millis()).saturating_mul(factor as u128);
                if millis >= max.as_millis() {
                    max
                } else {
                    Duration::from_millis(millis as u64)
                }
            }
        }
    }
}

/// Iterative Fibonacci, saturating at u64::MAX. `fib(2) == 2`, `fib(3) == 3`,
/// `fib(4) == 5`, matching the attempt-to-factor mapping of the retry path.
fn fib(attempt: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    let mut c = 1u64;
    for _ in 1..attempt {
        c = a.saturating_add(b);
        a = b;
        b = c;
    }
    c
}
