//! # Stepflow Configuration
//!
//! Typed configuration for retry policy, dead-letter routing, circuit breakers,
//! step timeouts and consumer concurrency. Every section has working defaults,
//! so an empty YAML document yields a valid configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stepflow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected)
//! let manager = ConfigManager::load()?;
//!
//! let retry = &manager.config().retry;
//! let breaker = manager.config().circuit_breaker.to_resilience_config();
//! # let _ = (retry, breaker);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{destinations::DEFAULT_DLQ_SUFFIX, error_classes};
use crate::resilience::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepflowConfig {
    /// Stamped onto envelopes built by the workflow starter
    pub service_name: Option<String>,
    pub retry: RetrySettings,
    pub dlq: DlqSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub timeout: TimeoutSettings,
    pub consumer: ConsumerSettings,
}

impl StepflowConfig {
    /// Validate every section
    pub fn validate(&self) -> ConfigResult<()> {
        self.retry.validate()?;
        self.dlq.validate()?;
        self.circuit_breaker.validate()?;
        self.timeout.validate()?;
        self.consumer.validate()?;
        Ok(())
    }
}

/// Retry policy for failed steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Error classes that go straight to the dead-letter channel
    pub non_retryable_errors: Vec<String>,
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                "0",
                "must be at least 1",
            ));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "retry.multiplier",
                self.multiplier.to_string(),
                "must be a finite number >= 1.0",
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.initial_delay_ms",
                self.initial_delay_ms.to_string(),
                format!("must not exceed retry.max_delay_ms ({})", self.max_delay_ms),
            ));
        }
        Ok(())
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 300_000,
            multiplier: 2.0,
            non_retryable_errors: vec![
                error_classes::INVALID_ARGUMENT.to_string(),
                error_classes::PAYLOAD_DESERIALIZATION.to_string(),
            ],
        }
    }
}

/// Dead-letter routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DlqSettings {
    /// When false, terminal failures produce no dead-letter message
    pub enabled: bool,
    pub suffix: String,
}

impl DlqSettings {
    fn validate(&self) -> ConfigResult<()> {
        if self.suffix.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "dlq.suffix",
                "",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

impl Default for DlqSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            suffix: DEFAULT_DLQ_SUFFIX.to_string(),
        }
    }
}

/// Circuit breaker section, applied to every broker breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// When false, protected brokers pass every call straight through
    pub enabled: bool,
    pub failure_rate_threshold: f64,
    pub slow_call_rate_threshold: f64,
    pub slow_call_duration_threshold_ms: u64,
    pub sliding_window_size: u32,
    pub minimum_number_of_calls: u32,
    pub permitted_number_of_calls_in_half_open_state: u32,
    pub wait_duration_in_open_state_ms: u64,
    pub automatic_transition_from_open_to_half_open_enabled: bool,
}

impl CircuitBreakerSettings {
    /// Convert to resilience module's format
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: self.failure_rate_threshold,
            slow_call_rate_threshold: self.slow_call_rate_threshold,
            slow_call_duration_threshold: Duration::from_millis(
                self.slow_call_duration_threshold_ms,
            ),
            sliding_window_size: self.sliding_window_size,
            minimum_number_of_calls: self.minimum_number_of_calls,
            permitted_number_of_calls_in_half_open_state: self
                .permitted_number_of_calls_in_half_open_state,
            wait_duration_in_open_state: Duration::from_millis(self.wait_duration_in_open_state_ms),
            automatic_transition_from_open_to_half_open_enabled: self
                .automatic_transition_from_open_to_half_open_enabled,
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        self.to_resilience_config().validate().map_err(|reason| {
            ConfigurationError::validation_error(format!("circuit_breaker: {reason}"))
        })
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            enabled: true,
            failure_rate_threshold: defaults.failure_rate_threshold,
            slow_call_rate_threshold: defaults.slow_call_rate_threshold,
            slow_call_duration_threshold_ms: defaults.slow_call_duration_threshold.as_millis()
                as u64,
            sliding_window_size: defaults.sliding_window_size,
            minimum_number_of_calls: defaults.minimum_number_of_calls,
            permitted_number_of_calls_in_half_open_state: defaults
                .permitted_number_of_calls_in_half_open_state,
            wait_duration_in_open_state_ms: defaults.wait_duration_in_open_state.as_millis()
                as u64,
            automatic_transition_from_open_to_half_open_enabled: defaults
                .automatic_transition_from_open_to_half_open_enabled,
        }
    }
}

/// Step execution timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Apply `default_step_timeout_ms` to steps without their own timeout
    pub enabled: bool,
    pub default_step_timeout_ms: u64,
}

impl TimeoutSettings {
    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.enabled && self.default_step_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "timeout.default_step_timeout_ms",
                "0",
                "must be greater than 0 when timeouts are enabled",
            ));
        }
        Ok(())
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            default_step_timeout_ms: 300_000,
        }
    }
}

/// Inbound consumer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Messages processed in parallel per listener
    pub concurrency: usize,
}

impl ConsumerSettings {
    fn validate(&self) -> ConfigResult<()> {
        if self.concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "consumer.concurrency",
                "0",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StepflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.retry.max_delay(), Duration::from_secs(300));
        assert_eq!(config.dlq.suffix, ".dlq");
        assert!(!config.timeout.enabled);
        assert_eq!(config.consumer.concurrency, 1);
    }

    #[test]
    fn test_circuit_breaker_settings_conversion() {
        let settings = CircuitBreakerSettings {
            wait_duration_in_open_state_ms: 1_500,
            ..Default::default()
        };
        let config = settings.to_resilience_config();
        assert_eq!(config.wait_duration_in_open_state, Duration::from_millis(1_500));
        assert_eq!(config.sliding_window_size, 100);
        assert_eq!(config.minimum_number_of_calls, 10);
        assert_eq!(config.failure_rate_threshold, 50.0);
    }

    #[test]
    fn test_validation_rejects_nonsense() {
        let mut config = StepflowConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = StepflowConfig::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = StepflowConfig::default();
        config.dlq.suffix = String::new();
        assert!(config.validate().is_err());

        let mut config = StepflowConfig::default();
        config.circuit_breaker.failure_rate_threshold = 150.0;
        assert!(config.validate().is_err());

        let mut config = StepflowConfig::default();
        config.consumer.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: StepflowConfig =
            serde_yaml::from_str("retry:\n  max_attempts: 5\ndlq:\n  enabled: false\n").unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.multiplier, 2.0);
        assert!(!config.dlq.enabled);
        assert_eq!(config.dlq.suffix, ".dlq");
    }
}
