//! Retry classification and exponential backoff
//!
//! Failed transfers are never retried by sleeping inside a worker. Instead the
//! engine records the attempt count on the task and asks [`next_step`] when the
//! task may be picked up again; a later drain pass does the actual retry.
//!
//! # Example
//!
//! ```
//! use podkeep::config::RetryConfig;
//! use podkeep::retry::{next_step, RetryDecision};
//! use std::time::Duration;
//!
//! let config = RetryConfig {
//!     max_attempts: 3,
//!     initial_delay: Duration::from_secs(10),
//!     jitter: false,
//!     ..RetryConfig::default()
//! };
//!
//! assert_eq!(next_step(&config, 1), RetryDecision::RetryAfter(Duration::from_secs(10)));
//! assert_eq!(next_step(&config, 2), RetryDecision::RetryAfter(Duration::from_secs(20)));
//! assert_eq!(next_step(&config, 3), RetryDecision::GiveUp);
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, TransferError};
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network errors, timeouts, bad status, mid-transfer disk full)
/// return `true`. Cancellation and pre-transfer space shortfalls return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::Network(_) => true,
            TransferError::Timeout(_) => true,
            TransferError::BadStatus(_) => true,
            // Space may have been freed by the next pass (cleanup job, user)
            TransferError::StorageFull { .. } => true,
            TransferError::Io(_) => true,
            TransferError::Cancelled => false,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transfer(e) => e.is_retryable(),
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Detected before any bytes were written: needs user action
            Error::InsufficientSpace { .. } => false,
            Error::Cancelled | Error::ShuttingDown => false,
            _ => false,
        }
    }
}

/// What to do after an attempt failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the task back in the queue, eligible after the delay
    RetryAfter(Duration),
    /// Attempts exhausted, mark the task failed
    GiveUp,
}

/// Decide the next step for a task that has now failed `attempts` times
pub fn next_step(config: &RetryConfig, attempts: u32) -> RetryDecision {
    if attempts >= config.max_attempts {
        return RetryDecision::GiveUp;
    }

    let delay = backoff_delay(config, attempts);
    let delay = if config.jitter {
        add_jitter(delay).min(config.max_delay)
    } else {
        delay
    };
    RetryDecision::RetryAfter(delay)
}

/// Delay after the n-th failure: `initial_delay * multiplier^(n-1)`, capped at `max_delay`
pub fn backoff_delay(config: &RetryConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(63) as i32;
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    if !secs.is_finite() || secs >= config.max_delay.as_secs_f64() {
        return config.max_delay;
    }
    Duration::from_secs_f64(secs)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
