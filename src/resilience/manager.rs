//! # Circuit Breaker Manager
//!
//! Explicitly owned registry of circuit breakers keyed by logical name. Every
//! call site that protects the same dependency asks the manager for the breaker
//! by name and therefore shares its state.

use crate::config::CircuitBreakerSettings;
use crate::constants::circuit_breakers::DEFAULT_CIRCUIT_BREAKERS;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
    SystemCircuitBreakerMetrics,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Manager for multiple circuit breakers across system components
#[derive(Debug, Clone)]
pub struct CircuitBreakerManager {
    /// Collection of circuit breakers by component name
    circuit_breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,

    /// Configuration applied to breakers created on demand
    default_config: CircuitBreakerConfig,

    /// When false, protected callers pass straight through
    enabled: bool,
}

impl CircuitBreakerManager {
    /// Create an empty, enabled manager
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            circuit_breakers: Arc::new(RwLock::new(HashMap::new())),
            default_config,
            enabled: true,
        }
    }

    /// Create a manager from the configuration section and pre-register the default breakers
    pub fn from_settings(settings: &CircuitBreakerSettings) -> Self {
        info!(
            enabled = settings.enabled,
            "Initializing circuit breaker manager from configuration"
        );

        let default_config = settings.to_resilience_config();
        let breakers = DEFAULT_CIRCUIT_BREAKERS
            .iter()
            .map(|name| {
                (
                    (*name).to_string(),
                    Arc::new(CircuitBreaker::new(*name, default_config.clone())),
                )
            })
            .collect();

        Self {
            circuit_breakers: Arc::new(RwLock::new(breakers)),
            default_config,
            enabled: settings.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Get or create circuit breaker for a component
    pub async fn get_circuit_breaker(&self, component_name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.circuit_breakers.read().await;
            if let Some(breaker) = breakers.get(component_name) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.circuit_breakers.write().await;

        // Double-check pattern (another task might have created it)
        if let Some(breaker) = breakers.get(component_name) {
            return Arc::clone(breaker);
        }

        let breaker = Arc::new(CircuitBreaker::new(
            component_name,
            self.default_config.clone(),
        ));
        breakers.insert(component_name.to_string(), Arc::clone(&breaker));

        info!(
            component = component_name,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    /// Register a breaker with its own configuration, replacing any existing one
    pub async fn register(
        &self,
        component_name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(component_name, config));
        let mut breakers = self.circuit_breakers.write().await;
        if breakers
            .insert(component_name.to_string(), Arc::clone(&breaker))
            .is_some()
        {
            warn!(
                component = component_name,
                "Replaced existing circuit breaker"
            );
        }
        breaker
    }

    /// Get all circuit breaker names, sorted
    pub async fn list_components(&self) -> Vec<String> {
        let breakers = self.circuit_breakers.read().await;
        let mut names: Vec<String> = breakers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get metrics for a specific circuit breaker
    pub async fn get_component_metrics(
        &self,
        component_name: &str,
    ) -> Option<CircuitBreakerMetrics> {
        let breakers = self.circuit_breakers.read().await;
        breakers.get(component_name).map(|breaker| breaker.metrics())
    }

    /// Get system-wide circuit breaker metrics
    pub async fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();

        let breakers = self.circuit_breakers.read().await;
        for (name, breaker) in breakers.iter() {
            system_metrics.add_circuit_breaker(name.clone(), breaker.metrics());
        }

        system_metrics
    }

    /// Force open all circuit breakers (emergency stop)
    pub async fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open (emergency stop)");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub async fn force_close_all(&self) {
        warn!("Forcing all circuit breakers closed (emergency recovery)");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_closed();
        }
    }

    /// Remove circuit breaker for a component
    pub async fn remove_circuit_breaker(&self, component_name: &str) -> bool {
        let mut breakers = self.circuit_breakers.write().await;
        if breakers.remove(component_name).is_some() {
            info!(
                component = component_name,
                remaining_count = breakers.len(),
                "Removed circuit breaker"
            );
            true
        } else {
            false
        }
    }

    /// Get count of circuit breakers by state
    pub async fn get_state_summary(&self) -> HashMap<CircuitState, usize> {
        self.get_system_metrics().await.count_by_state()
    }

    /// Check overall system health based on circuit breaker states
    pub async fn system_health_score(&self) -> f64 {
        self.get_system_metrics().await.health_score()
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
