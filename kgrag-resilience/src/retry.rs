//! Exponential backoff with jitter, as a free function usable around any
//! fallible async operation (storage calls, LLM/embedding/rerank calls).

use kgrag_core::error::{ErrorKind, KgError};
use kgrag_observability::EventContext;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Backoff shape. Only `Exponential` is used by the default
/// configuration, but the strategy is pluggable.
#[derive(Debug, Clone, Copy)]
pub enum BackoffStrategy {
    Fixed(Duration),
    Linear { base: Duration, increment: Duration },
    Exponential {
        base: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl BackoffStrategy {
    fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(d) => d,
            Self::Linear { base, increment } => base + increment * attempt,
            Self::Exponential {
                base,
                multiplier,
                max,
            } => {
                let scaled = base.as_secs_f64() * multiplier.powi(attempt as i32);
                Duration::from_secs_f64(scaled.min(max.as_secs_f64()))
            }
        }
    }
}

/// Jitter applied on top of the base delay: a uniform `U(0, jitterMs)`
/// addition rather than a scaling factor on the base delay.
#[derive(Debug, Clone, Copy)]
pub enum JitterStrategy {
    None,
    Uniform(Duration),
}

impl JitterStrategy {
    fn apply(&self, base: Duration) -> Duration {
        match *self {
            Self::None => base,
            Self::Uniform(max_jitter) => {
                if max_jitter.is_zero() {
                    return base;
                }
                let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter.as_millis() as u64);
                base + Duration::from_millis(jitter_ms)
            }
        }
    }
}

/// Retry configuration (§4.1).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub jitter: JitterStrategy,
    pub max_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                base: Duration::from_millis(500),
                multiplier: 2.0,
                max: Duration::from_secs(30),
            },
            jitter: JitterStrategy::Uniform(Duration::from_millis(100)),
            max_duration: Duration::from_millis(30_000),
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.backoff.delay_for(attempt))
    }
}

/// Outcome metadata returned alongside a successful retried call, useful
/// for the `retry.success`/`retry.exhausted` observability events.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOutcome {
    pub attempts: u32,
    pub total_delay: Duration,
}

/// Runs `op` with retry. `op` is called with the 0-based attempt number so
/// it can log/tag the attempt; it must return a `KgError` on failure so
/// this wrapper can classify transient vs permanent via
/// [`KgError::kind`].
///
/// Delay schedule: `d_n = min(initialDelay * multiplier^n, maxDelay) +
/// U(0, jitter)`. Total wall time is bounded by `max_duration`; once
/// exceeded, the last error is surfaced immediately rather than waiting
/// out another delay.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut op: F,
) -> Result<(T, RetryOutcome), KgError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, KgError>>,
{
    let started = Instant::now();
    let mut total_delay = Duration::ZERO;
    let mut attempt = 0u32;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    kgrag_observability::retry_success(
                        &EventContext::new(operation).with_attempt(attempt),
                        attempt + 1,
                    );
                }
                return Ok((
                    value,
                    RetryOutcome {
                        attempts: attempt + 1,
                        total_delay,
                    },
                ));
            }
            Err(err) => {
                let retryable = err.kind().is_retryable();
                attempt += 1;
                let exhausted = attempt >= config.max_attempts;
                let over_budget = started.elapsed() >= config.max_duration;

                if !retryable || exhausted || over_budget {
                    kgrag_observability::retry_exhausted(
                        &EventContext::new(operation).with_attempt(attempt),
                        attempt,
                        &err.to_string(),
                    );
                    return Err(err);
                }

                let delay = config.delay_for(attempt - 1);
                total_delay += delay;
                kgrag_observability::retry_attempt(&EventContext::new(operation).with_attempt(attempt));
                debug!(operation, attempt, ?delay, "retrying after transient failure");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Convenience helper for callers that only have an [`ErrorKind`] in hand
/// (not a full `KgError`).
#[must_use]
pub fn is_retryable_kind(kind: ErrorKind) -> bool {
    kind.is_retryable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_attempts: 5,
            backoff: BackoffStrategy::Fixed(Duration::from_millis(1)),
            jitter: JitterStrategy::None,
            ..RetryConfig::default()
        };

        let calls_clone = calls.clone();
        let (value, outcome) = with_retry(&config, "test.op", move |_attempt| {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(KgError::storage(ErrorKind::TransientStorage, "not yet"))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let config = RetryConfig {
            max_attempts: 3,
            backoff: BackoffStrategy::Fixed(Duration::from_millis(1)),
            jitter: JitterStrategy::None,
            ..RetryConfig::default()
        };

        let result: Result<((), RetryOutcome), KgError> =
            with_retry(&config, "test.op", |_attempt| async {
                Err(KgError::storage(ErrorKind::TransientStorage, "always fails"))
            })
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig::default();
        let calls_clone = calls.clone();

        let result: Result<((), RetryOutcome), KgError> =
            with_retry(&config, "test.op", move |_attempt| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(KgError::storage(ErrorKind::PermanentStorage, "bad syntax"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
