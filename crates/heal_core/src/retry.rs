//! Bounded retry with exponential backoff and cooperative cancellation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clients::Transient;

/// Run-level cancellation flag, checked at iteration and retry boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    #[serde(with = "millis")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            ..Self::default()
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt` (1-based). The first attempt never waits.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 2).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, last: E },
    /// A non-transient error stopped retrying immediately.
    Permanent { attempts: u32, error: E },
    /// The run was cancelled at a retry boundary.
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::Permanent { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run `op` until it succeeds, hits a permanent error, exhausts the policy,
/// or the run is cancelled. `op` receives the 1-based attempt number.
pub async fn retry_transient<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationFlag,
    operation: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Transient + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            debug!(operation, attempts = attempt, "Cancelled before next attempt");
            return Err(RetryError::Cancelled { attempts: attempt });
        }

        let delay = policy.backoff_for(attempt + 1);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
            if cancel.is_cancelled() {
                debug!(operation, attempts = attempt, "Cancelled during backoff");
                return Err(RetryError::Cancelled { attempts: attempt });
            }
        }

        attempt += 1;

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => {
                return Err(RetryError::Permanent {
                    attempts: attempt,
                    error: e,
                });
            }
            Err(e) => {
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    "Transient failure: {}",
                    e
                );
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
            }
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
