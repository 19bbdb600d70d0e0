//! Bounded retry for remote calls.
//!
//! A call is retried on transport failure and on a well-formed response
//! that carries nothing usable. Attempt `n` that fails is followed by a
//! `backoff_base^n` second sleep, with no jitter.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{EnrichError, Result};

pub const DEFAULT_BACKOFF_BASE: u64 = 2;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Outcome of a single remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCallResult<T> {
    Success(T),
    TransportError(String),
    /// The provider answered but the content is blank or empty.
    EmptyPayload,
}

/// Payloads that can be well-formed yet useless.
pub trait Payload {
    fn is_blank(&self) -> bool;
}

impl Payload for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl<T> Payload for Vec<T> {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl<T: Payload> RemoteCallResult<T> {
    /// Classify a raw call result, demoting blank payloads to `EmptyPayload`.
    pub fn classify<E: std::fmt::Display>(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(payload) if payload.is_blank() => RemoteCallResult::EmptyPayload,
            Ok(payload) => RemoteCallResult::Success(payload),
            Err(e) => RemoteCallResult::TransportError(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 1-based number of the next attempt.
    pub current_attempt: u32,
    pub max_attempts: u32,
    pub backoff_base: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            current_attempt: 1,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Result<Self> {
        let policy = Self {
            max_attempts,
            ..Self::default()
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(EnrichError::InvalidArgument(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.current_attempt == 0 || self.current_attempt > self.max_attempts {
            return Err(EnrichError::InvalidArgument(format!(
                "current_attempt {} outside 1..={}",
                self.current_attempt, self.max_attempts
            )));
        }
        if self.backoff_base < 2 {
            return Err(EnrichError::InvalidArgument(
                "backoff_base must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Sleep that follows failed attempt `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.backoff_base.saturating_pow(attempt))
    }
}

/// Run `operation` until it succeeds or the attempt budget is spent.
///
/// `operation` receives the 1-based attempt number. A blank `Success` counts as
/// an empty payload. Only the terminal failure reaches the caller.
pub async fn execute_with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    T: Payload,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RemoteCallResult<T>>,
{
    policy.validate()?;

    let mut attempt = policy.current_attempt;
    loop {
        let failure = match operation(attempt).await {
            RemoteCallResult::Success(payload) if !payload.is_blank() => {
                debug!(attempt, "Remote call succeeded");
                return Ok(payload);
            }
            RemoteCallResult::TransportError(reason) => reason,
            RemoteCallResult::Success(_) | RemoteCallResult::EmptyPayload => {
                "response contained no usable content".to_string()
            }
        };

        if attempt >= policy.max_attempts {
            return Err(if policy.max_attempts == 1 {
                EnrichError::SingleAttemptFailed { last: failure }
            } else {
                EnrichError::RetryExhausted {
                    attempts: policy.max_attempts,
                    last: failure,
                }
            });
        }

        let delay = policy.backoff_for(attempt);
        warn!(
            "Remote call failed (attempt {}/{}): {}. Retrying in {:?}",
            attempt, policy.max_attempts, failure, delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn backoff_is_power_of_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(32));
    }

    #[test]
    fn classify_demotes_blank_payloads() {
        let blank: RemoteCallResult<String> = RemoteCallResult::classify(Ok::<_, String>("  \n".into()));
        assert_eq!(blank, RemoteCallResult::EmptyPayload);
        let empty: RemoteCallResult<Vec<f32>> = RemoteCallResult::classify(Ok::<_, String>(vec![]));
        assert_eq!(empty, RemoteCallResult::EmptyPayload);
        let failed: RemoteCallResult<String> = RemoteCallResult::classify(Err::<String, _>("boom"));
        assert_eq!(failed, RemoteCallResult::TransportError("boom".into()));
    }

    #[test]
    fn zero_attempts_is_invalid() {
        assert!(matches!(
            RetryPolicy::new(0),
            Err(EnrichError::InvalidArgument(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt_does_not_sleep() {
        let start = Instant::now();
        let value = execute_with_retry(&RetryPolicy::default(), |_| async {
            RemoteCallResult::Success("topic".to_string())
        })
        .await
        .unwrap();
        assert_eq!(value, "topic");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_failure_has_distinct_error() {
        let policy = RetryPolicy::new(1).unwrap();
        let err = execute_with_retry(&policy, |_| async {
            RemoteCallResult::<String>::TransportError("connection reset".into())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, EnrichError::SingleAttemptFailed { .. }));
        assert!(!err.to_string().contains("Giving up"));
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_from_current_attempt() {
        let policy = RetryPolicy {
            current_attempt: 3,
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let err = execute_with_retry(&policy, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(attempt, 3);
            async { RemoteCallResult::<String>::EmptyPayload }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, EnrichError::RetryExhausted { attempts: 3, .. }));
    }
}
