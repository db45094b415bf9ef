//! Bounded retry with configurable backoff for oracle calls.
//!
//! The wrapper knows nothing about stages or error types: a classifier decides
//! whether a failure is worth another attempt, and every attempt is recorded.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use mediascreen_types::{FailureClass, ScreeningError};

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay after a given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = (base.as_millis() as u64)
                    .saturating_mul(2u64.saturating_pow(attempt as u32));
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }

    /// Longest sleep this policy allows, provider hints included.
    pub fn max_delay(&self) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { max, .. } => *max,
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(8),
        }
    }
}

/// Total attempt budget plus the delay schedule between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// What the classifier says about one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: FailureClass,
    /// Lower bound on the next delay, e.g. from a `Retry-After` header.
    /// Never raises the delay past the policy's cap.
    pub retry_after: Option<Duration>,
}

impl From<FailureClass> for Classification {
    fn from(class: FailureClass) -> Self {
        Self {
            class,
            retry_after: None,
        }
    }
}

/// Classifier for [`ScreeningError`]: transient errors retry, provider hints respected.
pub fn classify_screening_error(err: &ScreeningError) -> Classification {
    Classification {
        class: err.failure_class(),
        retry_after: err.retry_after_ms().map(Duration::from_millis),
    }
}

/// One attempt as seen by the retry wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt: usize,
    pub succeeded: bool,
    pub class: Option<FailureClass>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    /// Sleep before the next attempt; zero when none followed.
    pub delay_ms: u64,
}

/// Result of [`execute_with_retry`] together with the attempt log.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: Vec<AttemptRecord>,
}

/// Run `f` until it succeeds, the failure is non-transient, or the attempt
/// budget is spent. The last error is returned on exhaustion.
pub async fn execute_with_retry<T, E, F, Fut, C>(
    f: F,
    policy: &RetryPolicy,
    label: &str,
    classify: C,
) -> RetryOutcome<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    C: Fn(&E) -> Classification,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = Vec::with_capacity(max_attempts);

    let mut attempt = 0;
    loop {
        let started = Instant::now();
        let result = f().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let err = match result {
            Ok(value) => {
                attempts.push(AttemptRecord {
                    attempt: attempt + 1,
                    succeeded: true,
                    class: None,
                    error: None,
                    elapsed_ms,
                    delay_ms: 0,
                });
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(e) => e,
        };

        let classification = classify(&err);
        let last = attempt + 1 == max_attempts;
        let retry = classification.class == FailureClass::Transient && !last;
        let delay = if retry {
            let backoff = policy.backoff.delay_for_attempt(attempt);
            classification
                .retry_after
                .map_or(backoff, |hint| hint.max(backoff).min(policy.backoff.max_delay()))
        } else {
            Duration::ZERO
        };

        attempts.push(AttemptRecord {
            attempt: attempt + 1,
            succeeded: false,
            class: Some(classification.class),
            error: Some(err.to_string()),
            elapsed_ms,
            delay_ms: delay.as_millis() as u64,
        });

        if !retry {
            if classification.class == FailureClass::NonTransient {
                tracing::warn!(label = %label, attempt = attempt + 1, error = %err, "Non-transient failure, not retrying");
            } else {
                tracing::warn!(label = %label, attempts = max_attempts, error = %err, "Retries exhausted");
            }
            return RetryOutcome {
                result: Err(err),
                attempts,
            };
        }

        tracing::warn!(
            label = %label,
            attempt = attempt + 1,
            delay_ms = %delay.as_millis(),
            error = %err,
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn no_backoff(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: BackoffPolicy::None,
        }
    }

    fn timeout_err() -> ScreeningError {
        ScreeningError::RequestTimeout {
            provider: "test".into(),
            timeout_ms: 100,
        }
    }

    // 1. No retries needed — success on first try
    #[tokio::test]
    async fn success_on_first_try() {
        let outcome = execute_with_retry(
            || async { Ok::<_, ScreeningError>("done") },
            &no_backoff(3),
            "name_presence",
            classify_screening_error,
        )
        .await;

        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.attempts[0].succeeded);
    }

    // 2. Retry on transient error succeeds on second try
    #[tokio::test]
    async fn retry_on_transient_error_succeeds() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let outcome = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    let n = cc.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(ScreeningError::UnparseableVerdict {
                            stage: "age_verification".into(),
                            message: "not json".into(),
                            usage: mediascreen_types::TokenUsage::default(),
                        })
                    } else {
                        Ok("recovered")
                    }
                }
            },
            &no_backoff(3),
            "age_verification",
            classify_screening_error,
        )
        .await;

        assert_eq!(outcome.result.unwrap(), "recovered");
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].class, Some(FailureClass::Transient));
        assert!(outcome.attempts[0].error.as_deref().unwrap().contains("not json"));
        assert!(outcome.attempts[1].succeeded);
    }

    // 3. Attempts exhausted returns the last error
    #[tokio::test]
    async fn max_attempts_exhausted() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let outcome: RetryOutcome<(), _> = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(timeout_err())
                }
            },
            &no_backoff(3),
            "age_verification",
            classify_screening_error,
        )
        .await;

        assert!(matches!(
            outcome.result,
            Err(ScreeningError::RequestTimeout { .. })
        ));
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.attempts.len(), 3);
        assert!(outcome.attempts.iter().all(|a| !a.succeeded));
        assert_eq!(outcome.attempts[2].delay_ms, 0);
    }

    // 4. Non-transient error is returned immediately without retrying
    #[tokio::test]
    async fn non_transient_error_no_retry() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let outcome: RetryOutcome<(), _> = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(ScreeningError::AuthError {
                        provider: "test".into(),
                    })
                }
            },
            &no_backoff(5),
            "detail_verification",
            classify_screening_error,
        )
        .await;

        assert!(matches!(
            outcome.result,
            Err(ScreeningError::AuthError { .. })
        ));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts[0].class, Some(FailureClass::NonTransient));
    }

    // 5. Classifier is a plain closure, independent of the error type
    #[tokio::test]
    async fn custom_classifier_controls_retries() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let cc = call_count.clone();

        let outcome: RetryOutcome<(), String> = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    let n = cc.fetch_add(1, Ordering::SeqCst);
                    Err(if n == 0 { "flaky".to_string() } else { "fatal".to_string() })
                }
            },
            &no_backoff(5),
            "custom",
            |e: &String| {
                if e == "flaky" {
                    FailureClass::Transient.into()
                } else {
                    FailureClass::NonTransient.into()
                }
            },
        )
        .await;

        assert_eq!(outcome.result.unwrap_err(), "fatal");
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    // 6. Backoff delays are slept between attempts and honour retry-after hints
    #[tokio::test(start_paused = true)]
    async fn backoff_delays_and_retry_after_hint() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: BackoffPolicy::Exponential {
                base: Duration::from_millis(100),
                max: Duration::from_secs(10),
            },
        };
        let started = tokio::time::Instant::now();

        let outcome: RetryOutcome<(), _> = execute_with_retry(
            || async {
                Err(ScreeningError::RateLimited {
                    provider: "test".into(),
                    retry_after_ms: 1_000,
                })
            },
            &policy,
            "sentiment_assessment",
            classify_screening_error,
        )
        .await;

        assert!(outcome.result.is_err());
        let delays: Vec<u64> = outcome.attempts.iter().map(|a| a.delay_ms).collect();
        assert_eq!(delays, vec![1_000, 1_000, 0]);
        assert!(started.elapsed() >= Duration::from_millis(2_000));
    }

    // 7. A huge retry-after hint is clamped to the backoff cap
    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_clamped_to_backoff_max() {
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff: BackoffPolicy::Exponential {
                base: Duration::from_millis(500),
                max: Duration::from_secs(8),
            },
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let started = tokio::time::Instant::now();

        let counter = calls.clone();
        let outcome = execute_with_retry(
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ScreeningError::RateLimited {
                            provider: "test".into(),
                            retry_after_ms: 3_600_000,
                        })
                    } else {
                        Ok("clear")
                    }
                }
            },
            &policy,
            "age_verification",
            classify_screening_error,
        )
        .await;

        assert_eq!(outcome.result.unwrap(), "clear");
        assert_eq!(outcome.attempts[0].delay_ms, 8_000);
        assert!(started.elapsed() < Duration::from_secs(9));
    }

    #[test]
    fn max_delay_per_policy() {
        let exp = BackoffPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(3),
        };
        assert_eq!(exp.max_delay(), Duration::from_secs(3));
        assert_eq!(BackoffPolicy::Fixed(Duration::from_millis(250)).max_delay(), Duration::from_millis(250));
        assert_eq!(BackoffPolicy::None.max_delay(), Duration::ZERO);
    }

    // 8. Zero attempt budget still runs once
    #[tokio::test]
    async fn zero_budget_runs_once() {
        let outcome = execute_with_retry(
            || async { Ok::<_, ScreeningError>(7) },
            &no_backoff(0),
            "x",
            classify_screening_error,
        )
        .await;
        assert_eq!(outcome.result.unwrap(), 7);
    }

    #[test]
    fn fixed_backoff_constant_delay() {
        let policy = BackoffPolicy::Fixed(Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(100), Duration::from_millis(200));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_millis(500));
    }

    #[test]
    fn none_backoff_zero_delay() {
        assert_eq!(BackoffPolicy::None.delay_for_attempt(99), Duration::ZERO);
    }

    #[test]
    fn classifier_reads_rate_limit_hint() {
        let c = classify_screening_error(&ScreeningError::RateLimited {
            provider: "p".into(),
            retry_after_ms: 2_500,
        });
        assert_eq!(c.class, FailureClass::Transient);
        assert_eq!(c.retry_after, Some(Duration::from_millis(2_500)));
    }
}
