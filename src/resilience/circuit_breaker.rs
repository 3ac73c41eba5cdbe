//! # Circuit Breaker Implementation
//!
//! Count-based sliding window circuit breaker with three states: Closed
//! (calls pass, outcomes recorded), Open (calls rejected without touching the
//! dependency) and Half-Open (a bounded number of trial calls).
//!
//! State and counters are atomics. The sliding windows sit behind short
//! `parking_lot` locks that are only held while an outcome is pushed; the
//! protected call itself always runs outside any lock.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Lock-free counters covering the whole life of the breaker
#[derive(Debug)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    slow_call_count: AtomicU64,
    not_permitted_count: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            slow_call_count: AtomicU64::new(0),
            not_permitted_count: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record(&self, outcome: CallOutcome, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if outcome.failed {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.slow {
            self.slow_call_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_not_permitted(&self) -> u64 {
        self.not_permitted_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self, state: CircuitState, window: WindowSnapshot) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let total_duration_nanos = self.total_duration_nanos.load(Ordering::Relaxed);

        let average_duration = if total_calls > 0 {
            Duration::from_nanos(total_duration_nanos / total_calls)
        } else {
            Duration::ZERO
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            slow_call_count: self.slow_call_count.load(Ordering::Relaxed),
            not_permitted_count: self.not_permitted_count.load(Ordering::Relaxed),
            buffered_calls: window.buffered_calls,
            failure_rate: window.failure_rate(),
            slow_call_rate: window.slow_call_rate(),
            total_duration: Duration::from_nanos(total_duration_nanos),
            average_duration,
            current_state: state,
        }
    }
}

/// Get current epoch nanos from SystemTime
#[inline]
fn epoch_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - limited calls allowed to test system health
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("CLOSED"),
            CircuitState::Open => f.write_str("OPEN"),
            CircuitState::HalfOpen => f.write_str("HALF_OPEN"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit does not permit the call
    #[error("Circuit breaker is {state} for {component}")]
    CircuitOpen {
        component: String,
        state: CircuitState,
    },

    /// Operation ran, failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

#[derive(Debug, Clone, Copy)]
struct CallOutcome {
    failed: bool,
    slow: bool,
}

/// Counts over the buffered calls of one window
#[derive(Debug, Clone, Copy, Default)]
struct WindowSnapshot {
    buffered_calls: u32,
    failed_calls: u32,
    slow_calls: u32,
}

impl WindowSnapshot {
    /// Failure percentage of the buffered calls
    fn failure_rate(&self) -> f64 {
        percentage(self.failed_calls, self.buffered_calls)
    }

    /// Slow-call percentage of the buffered calls
    fn slow_call_rate(&self) -> f64 {
        percentage(self.slow_calls, self.buffered_calls)
    }

    fn exceeds(&self, config: &CircuitBreakerConfig) -> bool {
        self.failure_rate() >= config.failure_rate_threshold
            || self.slow_call_rate() >= config.slow_call_rate_threshold
    }
}

fn percentage(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        f64::from(part) * 100.0 / f64::from(whole)
    }
}

/// Ring buffer of the last `capacity` call outcomes with running totals
#[derive(Debug)]
struct SlidingWindow {
    capacity: usize,
    outcomes: VecDeque<CallOutcome>,
    failed_calls: u32,
    slow_calls: u32,
}

impl SlidingWindow {
    fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1) as usize;
        Self {
            capacity,
            outcomes: VecDeque::with_capacity(capacity),
            failed_calls: 0,
            slow_calls: 0,
        }
    }

    fn record(&mut self, outcome: CallOutcome) -> WindowSnapshot {
        if self.outcomes.len() == self.capacity {
            if let Some(evicted) = self.outcomes.pop_front() {
                self.failed_calls -= u32::from(evicted.failed);
                self.slow_calls -= u32::from(evicted.slow);
            }
        }
        self.failed_calls += u32::from(outcome.failed);
        self.slow_calls += u32::from(outcome.slow);
        self.outcomes.push_back(outcome);
        self.snapshot()
    }

    fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            buffered_calls: self.outcomes.len() as u32,
            failed_calls: self.failed_calls,
            slow_calls: self.slow_calls,
        }
    }

    fn clear(&mut self) {
        self.outcomes.clear();
        self.failed_calls = 0;
        self.slow_calls = 0;
    }
}

/// Trial slots of the current half-open period
///
/// `period` changes whenever the slots are reset, so a slot can only be
/// handed back to the period that issued it.
#[derive(Debug, Default)]
struct HalfOpenSlots {
    inner: Mutex<SlotCounter>,
}

#[derive(Debug, Default)]
struct SlotCounter {
    period: u64,
    used: u32,
}

impl HalfOpenSlots {
    /// Take a slot if fewer than `limit` are in use; returns the issuing period
    fn try_take(&self, limit: u32) -> Option<u64> {
        let mut counter = self.inner.lock();
        if counter.used >= limit {
            return None;
        }
        counter.used += 1;
        Some(counter.period)
    }

    fn give_back(&self, period: u64) -> bool {
        let mut counter = self.inner.lock();
        if counter.period != period || counter.used == 0 {
            return false;
        }
        counter.used -= 1;
        true
    }

    fn used(&self) -> u32 {
        self.inner.lock().used
    }

    fn reset(&self) {
        let mut counter = self.inner.lock();
        counter.period = counter.period.wrapping_add(1);
        counter.used = 0;
    }
}

/// Half-open slot held by an unfinished trial call
#[derive(Debug)]
struct SlotLease {
    slots: Arc<HalfOpenSlots>,
    period: u64,
}

/// Permission to make one protected call
///
/// Hand it back through `on_success`/`on_error` once the call finished. A
/// permit issued before a state transition is ignored when recorded. A
/// half-open permit dropped without an outcome (cancelled call, timeout)
/// frees its trial slot again.
#[derive(Debug)]
#[must_use = "a permit must be returned through on_success or on_error"]
pub struct CallPermit {
    generation: u64,
    state: CircuitState,
    started_at: Instant,
    lease: Option<SlotLease>,
}

impl CallPermit {
    /// State in which the permit was issued
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            if lease.slots.give_back(lease.period) {
                debug!("Abandoned half-open trial call released its slot");
            }
        }
    }
}

/// Core circuit breaker implementation with atomic state management
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Logical name shared by every call site on the same dependency
    name: String,

    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,

    config: CircuitBreakerConfig,

    /// Bumped on every transition so late outcomes can be told apart
    generation: AtomicU64,

    /// Epoch nanos when circuit was opened (0 = not open)
    opened_at_epoch_nanos: AtomicU64,

    /// Trial permits handed out in the current half-open period
    half_open_slots: Arc<HalfOpenSlots>,

    closed_window: Mutex<SlidingWindow>,
    half_open_window: Mutex<SlidingWindow>,

    metrics: AtomicCircuitBreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_rate_threshold = config.failure_rate_threshold,
            slow_call_rate_threshold = config.slow_call_rate_threshold,
            sliding_window_size = config.sliding_window_size,
            minimum_number_of_calls = config.minimum_number_of_calls,
            wait_duration_ms = config.wait_duration_in_open_state.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            closed_window: Mutex::new(SlidingWindow::new(config.sliding_window_size)),
            half_open_window: Mutex::new(SlidingWindow::new(
                config.permitted_number_of_calls_in_half_open_state,
            )),
            config,
            generation: AtomicU64::new(0),
            opened_at_epoch_nanos: AtomicU64::new(0),
            half_open_slots: Arc::new(HalfOpenSlots::default()),
            metrics: AtomicCircuitBreakerMetrics::new(),
        }
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, applying the automatic open to half-open move when due
    pub fn state(&self) -> CircuitState {
        let state = self.load_state();
        if state == CircuitState::Open
            && self.config.automatic_transition_from_open_to_half_open_enabled
            && self.open_wait_elapsed()
        {
            self.transition(Some(CircuitState::Open), CircuitState::HalfOpen);
            return self.load_state();
        }
        state
    }

    #[inline]
    fn load_state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    fn open_wait_elapsed(&self) -> bool {
        let opened_nanos = self.opened_at_epoch_nanos.load(Ordering::Acquire);
        if opened_nanos == 0 {
            warn!(component = %self.name, "Circuit open but no timestamp recorded");
            return true;
        }
        let elapsed_nanos = epoch_nanos_now().saturating_sub(opened_nanos);
        elapsed_nanos >= self.config.wait_duration_in_open_state.as_nanos() as u64
    }

    /// Whether a call would currently be permitted, without consuming a permit
    pub fn is_call_permitted(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                self.half_open_slots.used()
                    < self.config.permitted_number_of_calls_in_half_open_state
            }
        }
    }

    /// Acquire permission for one call; `None` means the call must not be made
    pub fn try_acquire_permission(&self) -> Option<CallPermit> {
        let state = self.state();
        let generation = self.generation.load(Ordering::Acquire);

        let (permitted, lease) = match state {
            CircuitState::Closed => (true, None),
            CircuitState::Open => (false, None),
            CircuitState::HalfOpen => {
                let limit = self.config.permitted_number_of_calls_in_half_open_state;
                match self.half_open_slots.try_take(limit) {
                    Some(period) => (
                        true,
                        Some(SlotLease {
                            slots: Arc::clone(&self.half_open_slots),
                            period,
                        }),
                    ),
                    None => (false, None),
                }
            }
        };

        if !permitted {
            let rejected = self.metrics.record_not_permitted();
            debug!(
                component = %self.name,
                state = %state,
                not_permitted_calls = rejected,
                "Call not permitted"
            );
            return None;
        }

        Some(CallPermit {
            generation,
            state,
            started_at: Instant::now(),
            lease,
        })
    }

    /// Record a successful call
    pub fn on_success(&self, permit: CallPermit) {
        self.record(permit, false);
    }

    /// Record a failed call
    pub fn on_error(&self, permit: CallPermit) {
        self.record(permit, true);
    }

    fn record(&self, mut permit: CallPermit, failed: bool) {
        // A finished trial call keeps its slot until the period ends
        permit.lease = None;
        let duration = permit.elapsed();
        let outcome = CallOutcome {
            failed,
            slow: duration > self.config.slow_call_duration_threshold,
        };
        self.metrics.record(outcome, duration);

        if failed {
            debug!(
                component = %self.name,
                duration_ms = duration.as_millis() as u64,
                "Operation failed"
            );
        }

        if !self.is_current(&permit) {
            debug!(
                component = %self.name,
                issued_in = %permit.state,
                "Ignoring outcome of a call permitted before the last state transition"
            );
            return;
        }

        match self.load_state() {
            CircuitState::Closed => {
                let window = {
                    let mut window = self.closed_window.lock();
                    if !self.is_current(&permit) {
                        return;
                    }
                    window.record(outcome)
                };
                if window.buffered_calls >= self.config.effective_minimum_calls()
                    && window.exceeds(&self.config)
                    && self.transition(Some(CircuitState::Closed), CircuitState::Open)
                {
                    error!(
                        component = %self.name,
                        failure_rate = window.failure_rate(),
                        slow_call_rate = window.slow_call_rate(),
                        buffered_calls = window.buffered_calls,
                        "Circuit breaker opened (failing fast)"
                    );
                }
            }
            CircuitState::HalfOpen => {
                let window = {
                    let mut window = self.half_open_window.lock();
                    if !self.is_current(&permit) {
                        return;
                    }
                    window.record(outcome)
                };
                if window.buffered_calls < self.config.permitted_number_of_calls_in_half_open_state
                {
                    return;
                }
                if window.exceeds(&self.config) {
                    if self.transition(Some(CircuitState::HalfOpen), CircuitState::Open) {
                        error!(
                            component = %self.name,
                            failure_rate = window.failure_rate(),
                            slow_call_rate = window.slow_call_rate(),
                            "Circuit breaker reopened after trial calls"
                        );
                    }
                } else if self.transition(Some(CircuitState::HalfOpen), CircuitState::Closed) {
                    info!(
                        component = %self.name,
                        trial_calls = window.buffered_calls,
                        "Circuit breaker closed (recovered)"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Transitions bump the generation before clearing a window, so checking
    /// this under the window lock keeps stale outcomes out of a fresh window
    fn is_current(&self, permit: &CallPermit) -> bool {
        permit.generation == self.generation.load(Ordering::Acquire)
    }

    /// Move to `to`, optionally only from `expected`; returns whether this call made the move
    fn transition(&self, expected: Option<CircuitState>, to: CircuitState) -> bool {
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match expected {
                    Some(expected) if expected as u8 != current => None,
                    _ => Some(to as u8),
                }
            });
        let Ok(previous) = previous else {
            return false;
        };

        self.generation.fetch_add(1, Ordering::AcqRel);
        match to {
            CircuitState::Open => {
                self.opened_at_epoch_nanos
                    .store(epoch_nanos_now(), Ordering::Release);
                self.half_open_slots.reset();
                self.closed_window.lock().clear();
                self.half_open_window.lock().clear();
            }
            CircuitState::HalfOpen => {
                self.half_open_slots.reset();
                self.half_open_window.lock().clear();
            }
            CircuitState::Closed => {
                self.opened_at_epoch_nanos.store(0, Ordering::Release);
                self.closed_window.lock().clear();
            }
        }

        info!(
            component = %self.name,
            from = %CircuitState::from(previous),
            to = %to,
            "Circuit breaker state transition"
        );
        true
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.try_acquire_permission() else {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
                state: self.load_state(),
            });
        };

        let result = operation().await;

        match &result {
            Ok(_) => self.on_success(permit),
            Err(_) => self.on_error(permit),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Manually start the half-open trial period; only valid while open
    pub fn transition_to_half_open(&self) -> bool {
        self.transition(Some(CircuitState::Open), CircuitState::HalfOpen)
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        self.transition(None, CircuitState::Open);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        self.transition(None, CircuitState::Closed);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.state();
        let window = match state {
            CircuitState::HalfOpen => self.half_open_window.lock().snapshot(),
            _ => self.closed_window.lock().snapshot(),
        };
        self.metrics.snapshot(state, window)
    }

    /// Check if circuit is healthy (closed state)
    pub fn is_healthy(&self) -> bool {
        self.state() == CircuitState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn window_of_ten() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            sliding_window_size: 10,
            minimum_number_of_calls: 10,
            permitted_number_of_calls_in_half_open_state: 2,
            wait_duration_in_open_state: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn fail(circuit: &CircuitBreaker) {
        let _ = circuit.call(|| async { Err::<(), _>("error") }).await;
    }

    async fn succeed(circuit: &CircuitBreaker) {
        let _ = circuit.call(|| async { Ok::<_, String>(()) }).await;
    }

    #[tokio::test]
    async fn test_circuit_breaker_normal_operation() {
        let circuit = CircuitBreaker::new("test", window_of_ten());

        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.buffered_calls, 1);
    }

    #[tokio::test]
    async fn test_no_evaluation_below_minimum_calls() {
        let circuit = CircuitBreaker::new("test", window_of_ten());

        for _ in 0..9 {
            fail(&circuit).await;
        }
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_on_tenth_call_at_sixty_percent_failures() {
        let circuit = CircuitBreaker::new("test", window_of_ten());

        for _ in 0..4 {
            succeed(&circuit).await;
        }
        for _ in 0..5 {
            fail(&circuit).await;
        }
        assert_eq!(circuit.state(), CircuitState::Closed);

        fail(&circuit).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        let result = circuit
            .call(|| async { Ok::<_, String>("should not execute") })
            .await;
        assert!(matches!(
            result,
            Err(CircuitBreakerError::CircuitOpen {
                state: CircuitState::Open,
                ..
            })
        ));
        assert_eq!(circuit.metrics().not_permitted_count, 1);
    }

    #[tokio::test]
    async fn test_sliding_window_evicts_old_outcomes() {
        let circuit = CircuitBreaker::new("test", window_of_ten());

        for _ in 0..4 {
            fail(&circuit).await;
        }
        for _ in 0..12 {
            succeed(&circuit).await;
        }
        let metrics = circuit.metrics();
        assert_eq!(metrics.buffered_calls, 10);
        assert_eq!(metrics.failure_rate, 0.0);
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_slow_calls_open_the_circuit() {
        let config = CircuitBreakerConfig {
            slow_call_rate_threshold: 50.0,
            slow_call_duration_threshold: Duration::from_millis(5),
            sliding_window_size: 2,
            minimum_number_of_calls: 2,
            ..window_of_ten()
        };
        let circuit = CircuitBreaker::new("slow", config);

        for _ in 0..2 {
            let _ = circuit
                .call(|| async {
                    sleep(Duration::from_millis(15)).await;
                    Ok::<_, String>(())
                })
                .await;
        }

        assert_eq!(circuit.state(), CircuitState::Open);
        assert_eq!(circuit.metrics().slow_call_count, 2);
    }

    #[tokio::test]
    async fn test_half_open_permits_are_bounded() {
        let circuit = CircuitBreaker::new("test", window_of_ten());
        circuit.force_open();

        sleep(Duration::from_millis(60)).await;

        let first = circuit.try_acquire_permission();
        let second = circuit.try_acquire_permission();
        let third = circuit.try_acquire_permission();
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(third.is_none());

        if let Some(permit) = first {
            circuit.on_success(permit);
        }
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        if let Some(permit) = second {
            circuit.on_success(permit);
        }
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_trial_permit_frees_its_slot() {
        let circuit = CircuitBreaker::new("test", window_of_ten());
        circuit.force_open();
        sleep(Duration::from_millis(60)).await;

        let abandoned = circuit.try_acquire_permission();
        let kept = circuit.try_acquire_permission();
        assert!(abandoned.is_some() && kept.is_some());
        assert!(!circuit.is_call_permitted());

        drop(abandoned);
        assert!(circuit.is_call_permitted());

        if let Some(permit) = kept {
            circuit.on_success(permit);
        }
        succeed(&circuit).await;
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_permit_from_previous_period_does_not_free_a_slot() {
        let circuit = CircuitBreaker::new("test", window_of_ten());
        circuit.force_open();
        sleep(Duration::from_millis(60)).await;

        let old = circuit.try_acquire_permission();
        circuit.force_open();
        sleep(Duration::from_millis(60)).await;
        let first = circuit.try_acquire_permission();
        let second = circuit.try_acquire_permission();
        assert!(first.is_some() && second.is_some());

        drop(old);
        assert!(!circuit.is_call_permitted());
    }

    #[tokio::test]
    async fn test_failed_trial_calls_reopen() {
        let circuit = CircuitBreaker::new("test", window_of_ten());
        circuit.force_open();
        sleep(Duration::from_millis(60)).await;

        fail(&circuit).await;
        fail(&circuit).await;
        assert_eq!(circuit.load_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_manual_half_open_when_automatic_disabled() {
        let config = CircuitBreakerConfig {
            automatic_transition_from_open_to_half_open_enabled: false,
            ..window_of_ten()
        };
        let circuit = CircuitBreaker::new("manual", config);
        circuit.force_open();

        sleep(Duration::from_millis(60)).await;
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.try_acquire_permission().is_none());

        assert!(circuit.transition_to_half_open());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        assert!(!circuit.transition_to_half_open());
    }

    #[tokio::test]
    async fn test_stale_permit_is_ignored() {
        let circuit = CircuitBreaker::new("test", window_of_ten());
        let stale = circuit.try_acquire_permission();
        circuit.force_open();
        circuit.force_closed();

        if let Some(permit) = stale {
            circuit.on_error(permit);
        }
        assert_eq!(circuit.metrics().buffered_calls, 0);
        assert_eq!(circuit.metrics().failure_count, 1);
    }

    #[tokio::test]
    async fn test_force_operations() {
        let circuit = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        circuit.force_open();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.is_call_permitted());

        circuit.force_closed();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.is_healthy());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(CircuitState::from(9), CircuitState::Open);
    }
}
