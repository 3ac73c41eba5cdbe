//! # Circuit Breaker Metrics
//!
//! Snapshots of circuit breaker behavior for monitoring and health reporting.
//! Rates are percentages over the breaker's current window; counts cover the
//! whole life of the breaker.

use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls recorded
    pub total_calls: u64,

    pub success_count: u64,

    pub failure_count: u64,

    /// Calls slower than the configured threshold, successful or not
    pub slow_call_count: u64,

    /// Calls rejected without reaching the dependency
    pub not_permitted_count: u64,

    /// Calls currently held in the evaluation window
    pub buffered_calls: u32,

    /// Failure percentage of the buffered calls (0.0 to 100.0)
    pub failure_rate: f64,

    /// Slow-call percentage of the buffered calls (0.0 to 100.0)
    pub slow_call_rate: f64,

    pub total_duration: Duration,

    pub average_duration: Duration,

    pub current_state: CircuitState,
}

impl CircuitBreakerMetrics {
    /// Create new metrics instance with zero values
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            slow_call_count: 0,
            not_permitted_count: 0,
            buffered_calls: 0,
            failure_rate: 0.0,
            slow_call_rate: 0.0,
            total_duration: Duration::ZERO,
            average_duration: Duration::ZERO,
            current_state: CircuitState::Closed,
        }
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 10.0,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true, // Half-open is attempting recovery
        }
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing system health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Failure rate: {:.1}% | Slow rate: {:.1}% | Rejected: {} | Avg Duration: {}ms",
            self.state_description(),
            self.total_calls,
            self.failure_rate,
            self.slow_call_rate,
            self.not_permitted_count,
            self.average_duration.as_millis()
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// System-wide circuit breaker metrics aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    /// Metrics for individual circuit breakers by name
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,

    /// Timestamp of last metrics collection
    pub collected_at: std::time::SystemTime,
}

impl SystemCircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: std::time::SystemTime::now(),
        }
    }

    /// Add metrics for a circuit breaker
    pub fn add_circuit_breaker(&mut self, name: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(name, metrics);
        self.collected_at = std::time::SystemTime::now();
    }

    /// Get count of circuit breakers by state
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();

        for metrics in self.circuit_breakers.values() {
            *counts.entry(metrics.current_state).or_insert(0) += 1;
        }

        counts
    }

    /// Names of the breakers that are not healthy, sorted
    pub fn unhealthy_circuits(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .circuit_breakers
            .iter()
            .filter(|(_, metrics)| !metrics.is_healthy())
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Calculate system-wide health score (0.0 to 1.0)
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }

        let healthy_count = self
            .circuit_breakers
            .values()
            .filter(|metrics| metrics.is_healthy())
            .count();

        healthy_count as f64 / self.circuit_breakers.len() as f64
    }

    pub fn total_calls(&self) -> u64 {
        self.circuit_breakers
            .values()
            .map(|metrics| metrics.total_calls)
            .sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.circuit_breakers
            .values()
            .map(|metrics| metrics.failure_count)
            .sum()
    }

    /// Get system-wide failure rate (0.0 to 1.0)
    pub fn system_failure_rate(&self) -> f64 {
        let total_calls = self.total_calls();
        if total_calls == 0 {
            return 0.0;
        }

        self.total_failures() as f64 / total_calls as f64
    }

    /// Format summary for logging
    pub fn format_summary(&self) -> String {
        let state_counts = self.count_by_state();
        format!(
            "Circuit breakers: {} | Closed: {} | Open: {} | Half-open: {} | Health: {:.0}%",
            self.circuit_breakers.len(),
            state_counts.get(&CircuitState::Closed).unwrap_or(&0),
            state_counts.get(&CircuitState::Open).unwrap_or(&0),
            state_counts.get(&CircuitState::HalfOpen).unwrap_or(&0),
            self.health_score() * 100.0
        )
    }
}

impl Default for SystemCircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_in(state: CircuitState, total: u64, failures: u64) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: total,
            failure_count: failures,
            success_count: total - failures,
            current_state: state,
            ..CircuitBreakerMetrics::new()
        }
    }

    #[test]
    fn test_metrics_health() {
        assert!(CircuitBreakerMetrics::new().is_healthy());
        assert!(!metrics_in(CircuitState::Open, 10, 10).is_healthy());
        assert!(metrics_in(CircuitState::HalfOpen, 0, 0).is_healthy());
    }

    #[test]
    fn test_system_metrics_aggregation() {
        let mut system = SystemCircuitBreakerMetrics::new();
        assert_eq!(system.health_score(), 1.0);

        system.add_circuit_breaker("broker-kafka".to_string(), metrics_in(CircuitState::Closed, 10, 1));
        system.add_circuit_breaker("broker-rabbitmq".to_string(), metrics_in(CircuitState::Open, 10, 9));

        assert_eq!(system.total_calls(), 20);
        assert_eq!(system.total_failures(), 10);
        assert_eq!(system.system_failure_rate(), 0.5);
        assert_eq!(system.health_score(), 0.5);
        assert_eq!(system.unhealthy_circuits(), vec!["broker-rabbitmq"]);

        let counts = system.count_by_state();
        assert_eq!(counts.get(&CircuitState::Open), Some(&1));
        assert!(system.format_summary().contains("Open: 1"));
    }
}
