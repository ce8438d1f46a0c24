//! Circuit breaker around external rerank/LLM providers (§4.1). Trips on
//! a failure-ratio-over-window condition (`>= 0.5` over a request-volume
//! window of 4) rather than a raw failure count, so a handful of errors
//! in an otherwise-healthy stream doesn't open the circuit.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure ratio over `window_size` recent calls that trips the
    /// breaker open.
    pub failure_ratio_threshold: f64,
    /// Number of recent calls the ratio is computed over.
    pub window_size: usize,
    /// How long the breaker stays open before allowing a half-open probe.
    pub open_duration: Duration,
    /// Consecutive successes required in half-open to close.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio_threshold: 0.5,
            window_size: 4,
            open_duration: Duration::from_secs(10),
            success_threshold: 2,
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    state_changed_at: Instant,
    recent: VecDeque<bool>, // true = success
    half_open_successes: u32,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                state_changed_at: Instant::now(),
                recent: VecDeque::new(),
                half_open_successes: 0,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }

    /// Whether a call is currently allowed through. Transitions
    /// Open -> HalfOpen once `open_duration` has elapsed.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                if inner.state_changed_at.elapsed() >= self.config.open_duration {
                    inner.state = BreakerState::HalfOpen;
                    inner.state_changed_at = Instant::now();
                    inner.half_open_successes = 0;
                    info!(breaker = %self.name, "circuit half-open, probing");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        push_bounded(&mut inner.recent, true, self.config.window_size);

        match inner.state {
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.state_changed_at = Instant::now();
                    inner.recent.clear();
                    info!(breaker = %self.name, "circuit closed after recovery");
                }
            }
            BreakerState::Closed => {}
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.write();

        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Open;
            inner.state_changed_at = Instant::now();
            inner.recent.clear();
            info!(breaker = %self.name, "circuit re-opened after half-open failure");
            return;
        }

        push_bounded(&mut inner.recent, false, self.config.window_size);

        if inner.state == BreakerState::Closed && inner.recent.len() >= self.config.window_size {
            let failures = inner.recent.iter().filter(|ok| !**ok).count();
            let ratio = failures as f64 / inner.recent.len() as f64;
            if ratio >= self.config.failure_ratio_threshold {
                inner.state = BreakerState::Open;
                inner.state_changed_at = Instant::now();
                info!(breaker = %self.name, ratio, "circuit opened on failure ratio");
            }
        }
    }
}

fn push_bounded(buf: &mut VecDeque<bool>, value: bool, cap: usize) {
    buf.push_back(value);
    while buf.len() > cap {
        buf.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_failure_ratio_over_window() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_success();
        breaker.record_failure();
        // window = [fail, fail, success, fail] -> 3/4 failures >= 0.5
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn half_open_closes_after_consecutive_successes() {
        let config = CircuitBreakerConfig {
            open_duration: Duration::from_millis(1),
            ..CircuitBreakerConfig::default()
        };
        let breaker = CircuitBreaker::new("test", config);
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let config = CircuitBreakerConfig {
            open_duration: Duration::from_millis(1),
            ..CircuitBreakerConfig::default()
        };
        let breaker = CircuitBreaker::new("test", config);
        for _ in 0..4 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
