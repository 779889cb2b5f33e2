//! Per-link retry state machine with randomized delays
//!
//! Every link walks through the same states:
//!
//! ```text
//! Pending -> Delaying -> Attempting -> Succeeded
//!                ^            |------> Failed
//!                |            v
//!                +----- RetryScheduled
//! ```
//!
//! The first attempt is preceded by a short random delay (throttling the host
//! even when everything succeeds); each retry by a longer one. A link gets at
//! most `max_retries + 1` attempts.
//!
//! # Example
//!
//! ```no_run
//! use sharelink_dl::config::RetryConfig;
//! use sharelink_dl::retry::{IsRetryable, RetryPolicy, run_with_policy};
//!
//! #[derive(Debug)]
//! struct Flaky;
//!
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "flaky")
//!     }
//! }
//!
//! impl IsRetryable for Flaky {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn example() {
//! let policy = RetryPolicy::new(&RetryConfig::default());
//! let report = run_with_policy(&policy, "https://host/f", |attempt| async move {
//!     if attempt < 2 { Err(Flaky) } else { Ok(attempt) }
//! })
//! .await;
//! assert_eq!(report.attempts, 2);
//! # }
//! ```

use crate::config::{DelayRange, RetryConfig};
use crate::error::{AttemptError, EngineError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if another attempt could plausibly succeed
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for EngineError {
    fn is_retryable(&self) -> bool {
        match self {
            // Page flow failures are transient from the host's point of view;
            // a wrong extraction password also lands here and consumes a retry.
            EngineError::Navigation(_)
            | EngineError::FrameNotFound(_)
            | EngineError::TriggerNotFound(_)
            | EngineError::NoDownloadEvent(_)
            | EngineError::Timeout { .. } => true,
            // A page that could not be opened may open on the next attempt
            EngineError::Launch(_) => true,
            EngineError::Other(_) => true,
        }
    }
}

impl IsRetryable for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Engine(e) => e.is_retryable(),
            AttemptError::Timeout { .. } => true,
            // Disk trouble may clear up; exhaustion turns it terminal
            AttemptError::Persist { .. } => true,
        }
    }
}

/// State of one link's retry cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Not started yet
    Pending,
    /// Waiting before attempt number `attempt` (1-based)
    Delaying {
        /// Attempt about to be made
        attempt: u32,
    },
    /// Attempt number `attempt` is running
    Attempting {
        /// Attempt in flight
        attempt: u32,
    },
    /// Attempt number `attempt` failed and another one will follow
    RetryScheduled {
        /// Attempt that just failed
        attempt: u32,
    },
    /// Terminal: the link was downloaded
    Succeeded {
        /// Attempts consumed
        attempts: u32,
    },
    /// Terminal: budget exhausted or non-retryable failure
    Failed {
        /// Attempts consumed
        attempts: u32,
    },
}

impl AttemptState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded { .. } | AttemptState::Failed { .. }
        )
    }
}

/// Input that drives [`RetryPolicy::advance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Leave `Pending` or `RetryScheduled` and start the next delay
    Begin,
    /// The delay finished
    DelayElapsed,
    /// The running attempt succeeded
    AttemptSucceeded,
    /// The running attempt failed
    AttemptFailed {
        /// Whether the failure is worth another attempt
        retryable: bool,
    },
}

/// Retry budget and delay ranges for a link
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay_first: DelayRange,
    delay_retry: DelayRange,
}

impl RetryPolicy {
    /// Build a policy from configuration
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries.saturating_add(1),
            delay_first: config.delay_first,
            delay_retry: config.delay_retry,
        }
    }

    /// Total attempts allowed, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Compute the next state
    ///
    /// Signals that make no sense in the current state leave it unchanged;
    /// terminal states never change.
    #[must_use]
    pub fn advance(&self, state: AttemptState, signal: Signal) -> AttemptState {
        match (state, signal) {
            (AttemptState::Pending, Signal::Begin) => AttemptState::Delaying { attempt: 1 },
            (AttemptState::RetryScheduled { attempt }, Signal::Begin) => AttemptState::Delaying {
                attempt: attempt + 1,
            },
            (AttemptState::Delaying { attempt }, Signal::DelayElapsed) => {
                AttemptState::Attempting { attempt }
            }
            (AttemptState::Attempting { attempt }, Signal::AttemptSucceeded) => {
                AttemptState::Succeeded { attempts: attempt }
            }
            (AttemptState::Attempting { attempt }, Signal::AttemptFailed { retryable }) => {
                if retryable && attempt < self.max_attempts {
                    AttemptState::RetryScheduled { attempt }
                } else {
                    AttemptState::Failed { attempts: attempt }
                }
            }
            (state, _) => state,
        }
    }

    /// Draw the delay that precedes attempt number `attempt` (1-based)
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            sample(&self.delay_first)
        } else {
            sample(&self.delay_retry)
        }
    }
}

/// Uniform sample from an inclusive range
fn sample(range: &DelayRange) -> Duration {
    if range.min >= range.max {
        return range.min;
    }
    let mut rng = rand::thread_rng();
    let secs = rng.gen_range(range.min.as_secs_f64()..=range.max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Final result of a retry cycle
#[derive(Debug)]
pub struct RetryReport<T, E> {
    /// Value of the successful attempt, or the error of the last one
    pub result: Result<T, E>,
    /// Attempts consumed
    pub attempts: u32,
}

/// Drive `operation` through the retry state machine until a terminal state
///
/// `operation` receives the 1-based attempt number.
pub async fn run_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    url: &str,
    mut operation: F,
) -> RetryReport<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut state = policy.advance(AttemptState::Pending, Signal::Begin);
    let mut attempt = 1;

    loop {
        let delay = policy.delay_before(attempt);
        tracing::debug!(
            url,
            attempt,
            max_attempts = policy.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "waiting before attempt"
        );
        tokio::time::sleep(delay).await;
        state = policy.advance(state, Signal::DelayElapsed);

        match operation(attempt).await {
            Ok(value) => {
                state = policy.advance(state, Signal::AttemptSucceeded);
                if attempt > 1 {
                    tracing::info!(url, attempts = attempt, "link succeeded after retry");
                }
                debug_assert!(matches!(state, AttemptState::Succeeded { .. }));
                return RetryReport {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) => {
                let retryable = e.is_retryable();
                state = policy.advance(state, Signal::AttemptFailed { retryable });

                match state {
                    AttemptState::RetryScheduled { .. } => {
                        tracing::warn!(
                            url,
                            error = %e,
                            attempt,
                            max_attempts = policy.max_attempts(),
                            "attempt failed, retrying"
                        );
                        state = policy.advance(state, Signal::Begin);
                        attempt += 1;
                    }
                    _ => {
                        if retryable {
                            tracing::error!(
                                url,
                                error = %e,
                                attempts = attempt,
                                "link failed after all attempts exhausted"
                            );
                        } else {
                            tracing::error!(url, error = %e, "link failed with non-retryable error");
                        }
                        return RetryReport {
                            result: Err(e),
                            attempts: attempt,
                        };
                    }
                }
            }
        }
    }
}
