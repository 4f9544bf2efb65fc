//! Circuit breaker policy
//!
//! Monitors operation failures and fails fast once a threshold is reached:
//! while the circuit is open no inner call is attempted at all. After the
//! break duration elapses the circuit transitions to half-open and admits a
//! bounded number of probe calls; enough successes close it again, any
//! failure re-opens it immediately.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::invalid_config;
use crate::clock::{Clock, SystemClock};
use crate::error::{PipelineError, PipelineResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Allowing requests
    Closed,
    /// Rejecting requests without attempting them
    Open,
    /// Admitting a bounded number of probe requests
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u64,
    /// Probe successes needed to close the circuit from half-open
    pub success_threshold: u64,
    /// How long the circuit stays open before probing
    pub break_duration: Duration,
    /// Maximum concurrent probe calls admitted while half-open
    pub half_open_max_calls: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            break_duration: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> PipelineResult<()> {
        if self.failure_threshold == 0 {
            return Err(invalid_config("failure_threshold must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(invalid_config("success_threshold must be greater than 0"));
        }
        if self.half_open_max_calls == 0 {
            return Err(invalid_config("half_open_max_calls must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u64) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn break_duration(mut self, duration: Duration) -> Self {
        self.config.break_duration = duration;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u64) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn build(self) -> PipelineResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time breaker metrics
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub total_calls: u64,
    pub rejected_calls: u64,
}

/// Executable circuit breaker
///
/// Clones share state: the same breaker instance can guard a whole group of
/// callers against one downstream target.
pub struct CircuitBreakerPolicy<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    failure_count: Arc<AtomicU64>,
    success_count: Arc<AtomicU64>,
    half_open_calls: Arc<AtomicU64>,
    total_calls: Arc<AtomicU64>,
    rejected_calls: Arc<AtomicU64>,
    opened_at: Arc<RwLock<Option<Instant>>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreakerPolicy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerPolicy")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Acquire))
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreakerPolicy<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            failure_count: Arc::clone(&self.failure_count),
            success_count: Arc::clone(&self.success_count),
            half_open_calls: Arc::clone(&self.half_open_calls),
            total_calls: Arc::clone(&self.total_calls),
            rejected_calls: Arc::clone(&self.rejected_calls),
            opened_at: Arc::clone(&self.opened_at),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreakerPolicy<SystemClock> {
    /// Create a breaker with the given configuration and the system clock
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreakerPolicy<C> {
    /// Create a breaker with a custom clock (deterministic tests)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_count: Arc::new(AtomicU64::new(0)),
            success_count: Arc::new(AtomicU64::new(0)),
            half_open_calls: Arc::new(AtomicU64::new(0)),
            total_calls: Arc::new(AtomicU64::new(0)),
            rejected_calls: Arc::new(AtomicU64::new(0)),
            opened_at: Arc::new(RwLock::new(None)),
            clock: Arc::new(clock),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run an operation under breaker protection
    ///
    /// When the circuit is open the inner call is not attempted at all: the
    /// error is [`PipelineError::CircuitOpen`] and no side effects occur.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> PipelineResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = PipelineResult<T>> + Send,
        T: Send,
    {
        if !self.admit() {
            return Err(PipelineError::CircuitOpen);
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) if error.is_cancellation() => {
                // Caller cancellation says nothing about downstream health.
                Err(error)
            }
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }

    /// Synchronous counterpart of [`CircuitBreakerPolicy::execute`]
    pub fn call<T, F>(&self, operation: F) -> PipelineResult<T>
    where
        F: Fn() -> PipelineResult<T>,
    {
        if !self.admit() {
            return Err(PipelineError::CircuitOpen);
        }

        match operation() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) if error.is_cancellation() => Err(error),
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }

    /// Check admission, transitioning open -> half-open when the break
    /// duration has elapsed
    fn admit(&self) -> bool {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .read()
                    .ok()
                    .and_then(|guard| *guard)
                    .map(|opened| self.clock.now().duration_since(opened));

                if matches!(elapsed, Some(e) if e >= self.config.break_duration) {
                    self.transition_to(CircuitState::HalfOpen);
                    self.half_open_calls.store(1, Ordering::Release);
                    self.success_count.store(0, Ordering::Release);
                    debug!("circuit half-open, admitting probe call");
                    true
                } else {
                    self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
            CircuitState::HalfOpen => {
                let admitted = self.half_open_calls.fetch_add(1, Ordering::AcqRel);
                if admitted < self.config.half_open_max_calls {
                    true
                } else {
                    self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    self.transition_to(CircuitState::Closed);
                    self.failure_count.store(0, Ordering::Release);
                    info!(successes, "circuit closed after successful probes");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match self.state() {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    self.open_circuit();
                    warn!(failures, "circuit opened after consecutive failures");
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure re-opens immediately.
                self.open_circuit();
                warn!("circuit re-opened by probe failure");
            }
            CircuitState::Open => {}
        }
    }

    fn open_circuit(&self) {
        self.transition_to(CircuitState::Open);
        if let Ok(mut opened_at) = self.opened_at.write() {
            *opened_at = Some(self.clock.now());
        }
    }

    fn transition_to(&self, next: CircuitState) {
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Current circuit state
    pub fn state(&self) -> CircuitState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("circuit state lock poisoned");
                *poisoned.into_inner()
            }
        }
    }

    /// Point-in-time metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Acquire),
            total_calls: self.total_calls.load(Ordering::Acquire),
            rejected_calls: self.rejected_calls.load(Ordering::Acquire),
        }
    }

    /// Force the breaker back to closed with zeroed counters
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        self.half_open_calls.store(0, Ordering::Release);
        if let Ok(mut opened_at) = self.opened_at.write() {
            *opened_at = None;
        }
        self.transition_to(CircuitState::Closed);
        info!("circuit breaker manually reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn failing_breaker(clock: MockClock) -> CircuitBreakerPolicy<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .success_threshold(1)
            .break_duration(Duration::from_secs(10))
            .build()
            .expect("valid config");
        CircuitBreakerPolicy::with_clock(config, clock)
    }

    async fn fail(breaker: &CircuitBreakerPolicy<MockClock>) {
        let _: PipelineResult<()> =
            breaker.execute(|| async { Err(PipelineError::transport("boom")) }).await;
    }

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let breaker = failing_breaker(MockClock::new());
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Open circuit rejects without attempting the call.
        let result = breaker.execute(|| async { Ok::<_, PipelineError>(1) }).await;
        assert!(matches!(result, Err(PipelineError::CircuitOpen)));
        assert!(breaker.metrics().rejected_calls > 0);
    }

    #[tokio::test]
    async fn half_open_probe_closes_circuit() {
        let clock = MockClock::new();
        let breaker = failing_breaker(clock.clone());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(11));

        let result = breaker.execute(|| async { Ok::<_, PipelineError>(42) }).await;
        assert_eq!(result.expect("probe should pass"), 42);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn probe_failure_reopens_circuit() {
        let clock = MockClock::new();
        let breaker = failing_breaker(clock.clone());
        fail(&breaker).await;
        fail(&breaker).await;

        clock.advance(Duration::from_secs(11));
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_streak_when_closed() {
        let breaker = failing_breaker(MockClock::new());
        fail(&breaker).await;
        let _ = breaker.execute(|| async { Ok::<_, PipelineError>(()) }).await;
        fail(&breaker).await;
        // Streak was broken, so one more failure is still below threshold.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn cancellation_is_not_a_downstream_failure() {
        let breaker = failing_breaker(MockClock::new());
        for _ in 0..5 {
            let _: PipelineResult<()> =
                breaker.execute(|| async { Err(PipelineError::Cancelled) }).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn sync_call_counts_failures_too() {
        let breaker = failing_breaker(MockClock::new());
        for _ in 0..2 {
            let _: PipelineResult<()> = breaker.call(|| Err(PipelineError::transport("down")));
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        let result: PipelineResult<()> = breaker.call(|| Ok(()));
        assert!(matches!(result, Err(PipelineError::CircuitOpen)));
    }

    #[test]
    fn config_validation_rejects_zero_thresholds() {
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().success_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().half_open_max_calls(0).build().is_err());
    }

    #[test]
    fn reset_returns_to_closed() {
        let breaker = failing_breaker(MockClock::new());
        let _: PipelineResult<()> = breaker.call(|| Err(PipelineError::transport("x")));
        let _: PipelineResult<()> = breaker.call(|| Err(PipelineError::transport("x")));
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_count, 0);
    }
}
