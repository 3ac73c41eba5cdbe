//! # Resilience Module
//!
//! Circuit breaker protection for unreliable dependencies, chiefly the message
//! broker. A breaker evaluates the most recent calls in a count-based sliding
//! window and trips when the failure rate or slow-call rate reaches its
//! threshold.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stepflow_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let circuit_breaker = CircuitBreaker::new("broker-kafka", CircuitBreakerConfig::default());
//!
//! let result = circuit_breaker.call(|| async {
//!     Ok::<&str, std::io::Error>("sent")
//! }).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
