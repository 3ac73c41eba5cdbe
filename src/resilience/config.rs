//! # Circuit Breaker Configuration
//!
//! Per-breaker settings for the count-based sliding window breaker. The
//! system-wide YAML section lives in `crate::config::CircuitBreakerSettings`
//! and converts into this struct with `to_resilience_config()`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure percentage (0, 100] at or above which the breaker opens
    pub failure_rate_threshold: f64,

    /// Slow-call percentage (0, 100] at or above which the breaker opens
    pub slow_call_rate_threshold: f64,

    /// Calls taking longer than this count as slow, whatever their outcome
    pub slow_call_duration_threshold: Duration,

    /// Number of most recent calls evaluated while closed
    pub sliding_window_size: u32,

    /// Calls required in the window before rates are evaluated
    pub minimum_number_of_calls: u32,

    /// Trial calls allowed while half-open
    pub permitted_number_of_calls_in_half_open_state: u32,

    /// Time spent open before trial calls are allowed
    pub wait_duration_in_open_state: Duration,

    /// Move from open to half-open on its own once the wait has elapsed
    pub automatic_transition_from_open_to_half_open_enabled: bool,
}

impl CircuitBreakerConfig {
    /// Configuration for broker delivery
    pub fn for_broker() -> Self {
        Self::default()
    }

    /// Configuration for short-lived test and local setups
    pub fn for_testing() -> Self {
        Self {
            sliding_window_size: 10,
            minimum_number_of_calls: 10,
            permitted_number_of_calls_in_half_open_state: 2,
            wait_duration_in_open_state: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Smallest number of buffered calls that triggers an evaluation
    pub fn effective_minimum_calls(&self) -> u32 {
        self.minimum_number_of_calls.min(self.sliding_window_size)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0) {
            return Err("failure_rate_threshold must be in (0, 100]".to_string());
        }

        if !(self.slow_call_rate_threshold > 0.0 && self.slow_call_rate_threshold <= 100.0) {
            return Err("slow_call_rate_threshold must be in (0, 100]".to_string());
        }

        if self.slow_call_duration_threshold.is_zero() {
            return Err("slow_call_duration_threshold must be greater than 0".to_string());
        }

        if self.sliding_window_size == 0 {
            return Err("sliding_window_size must be greater than 0".to_string());
        }

        if self.minimum_number_of_calls == 0 {
            return Err("minimum_number_of_calls must be greater than 0".to_string());
        }

        if self.permitted_number_of_calls_in_half_open_state == 0 {
            return Err(
                "permitted_number_of_calls_in_half_open_state must be greater than 0".to_string(),
            );
        }

        if self.wait_duration_in_open_state.is_zero() {
            return Err("wait_duration_in_open_state must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(60),
            sliding_window_size: 100,
            minimum_number_of_calls: 10,
            permitted_number_of_calls_in_half_open_state: 10,
            wait_duration_in_open_state: Duration::from_secs(60),
            automatic_transition_from_open_to_half_open_enabled: true,
        }
    }
}
