//! Configuration Loader
//!
//! Environment-aware configuration loading. Reads `stepflow-config.yaml`,
//! merges the section named after the active environment over the base
//! document, then deserializes and validates the result.
//!
//! ```yaml
//! retry:
//!   max_attempts: 3
//! dlq:
//!   suffix: ".dlq"
//!
//! test:
//!   retry:
//!     initial_delay_ms: 10
//! ```

use super::error::{ConfigResult, ConfigurationError};
use super::StepflowConfig;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_FILE_NAMES: [&str; 2] = ["stepflow-config.yaml", "stepflow-config.yml"];
const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];
const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB limit

/// Loaded configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: StepflowConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    ///
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = environment,
            max_attempts = config.retry.max_attempts,
            dlq_enabled = config.dlq.enabled,
            circuit_breaker_enabled = config.circuit_breaker.enabled,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (embedding and tests)
    pub fn from_config(config: StepflowConfig, environment: &str) -> ConfigResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &StepflowConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect current environment: STEPFLOW_ENV || APP_ENV || 'development'
    pub fn detect_environment() -> String {
        env::var("STEPFLOW_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// STEPFLOW_CONFIG_DIR when set, otherwise `./config`
    fn default_config_directory() -> PathBuf {
        env::var("STEPFLOW_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    /// Find the configuration file
    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for name in CONFIG_FILE_NAMES {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.exists() {
                debug!(path = %config_path.display(), "Found configuration file");
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    /// Safely read a configuration file with size and file-type checks
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "Configuration file too large ({}MB > {}MB limit)",
                    metadata.len() / (1024 * 1024),
                    MAX_CONFIG_FILE_SIZE / (1024 * 1024)
                ),
            ));
        }

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "Configuration path must point to a regular file",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    /// Load and merge configuration with environment-specific overrides
    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<StepflowConfig> {
        let config_file = Self::find_config_file(config_directory)?;
        let yaml_content = Self::read_config_file_safely(&config_file)?;

        let mut yaml_data: YamlValue = serde_yaml::from_str(&yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(config_file.display().to_string(), e))?;

        // An empty document means "all defaults"
        if yaml_data.is_null() {
            yaml_data = YamlValue::Mapping(Default::default());
        }

        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            debug!(environment = environment, "Applying environment-specific overrides");
            Self::merge_yaml_values(&mut yaml_data, env_overrides)?;
        }

        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(YamlValue::String(section.to_string()));
            }
            map.remove(YamlValue::String(environment.to_string()));
        }

        serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                config_file.display().to_string(),
                format!("Failed to deserialize configuration: {e}"),
            )
        })
    }

    /// Recursively merge YAML values (environment overrides into base config)
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) -> ConfigResult<()> {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value)?;
                    } else {
                        base_map.insert(key, value);
                    }
                }
                Ok(())
            }
            (YamlValue::Mapping(_), other) => Err(ConfigurationError::ConfigMergeError {
                error: format!("environment section must be a mapping, got {other:?}"),
            }),
            (base_ref, override_val) => {
                *base_ref = override_val;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_config_yaml() -> &'static str {
        r#"
service_name: "order-service"

retry:
  max_attempts: 5
  initial_delay_ms: 500
  max_delay_ms: 60000
  multiplier: 3.0
  non_retryable_errors:
    - "InvalidArgument"

dlq:
  enabled: true
  suffix: ".dead"

circuit_breaker:
  enabled: true
  sliding_window_size: 20
  minimum_number_of_calls: 5

consumer:
  concurrency: 4

test:
  retry:
    initial_delay_ms: 10
  circuit_breaker:
    enabled: false

production:
  consumer:
    concurrency: 16
"#
    }

    fn setup_test_config_dir(contents: &str) -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().to_path_buf();
        fs::write(config_dir.join("stepflow-config.yaml"), contents).unwrap();
        (temp_dir, config_dir)
    }

    #[test]
    fn test_basic_config_loading() {
        let (_temp_dir, config_dir) = setup_test_config_dir(create_test_config_yaml());

        let manager =
            ConfigManager::load_from_directory_with_env(Some(config_dir), "development").unwrap();
        let config = manager.config();

        assert_eq!(manager.environment(), "development");
        assert_eq!(config.service_name.as_deref(), Some("order-service"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 500);
        assert_eq!(config.dlq.suffix, ".dead");
        assert_eq!(config.circuit_breaker.sliding_window_size, 20);
        assert_eq!(config.circuit_breaker.failure_rate_threshold, 50.0);
        assert_eq!(config.consumer.concurrency, 4);
    }

    #[test]
    fn test_environment_specific_overrides() {
        let (_temp_dir, config_dir) = setup_test_config_dir(create_test_config_yaml());

        let test_manager =
            ConfigManager::load_from_directory_with_env(Some(config_dir.clone()), "test").unwrap();
        assert_eq!(test_manager.config().retry.initial_delay_ms, 10);
        assert_eq!(test_manager.config().retry.max_attempts, 5);
        assert!(!test_manager.config().circuit_breaker.enabled);
        assert_eq!(test_manager.config().circuit_breaker.sliding_window_size, 20);

        let prod_manager =
            ConfigManager::load_from_directory_with_env(Some(config_dir), "production").unwrap();
        assert_eq!(prod_manager.config().consumer.concurrency, 16);
        assert!(prod_manager.config().circuit_breaker.enabled);
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let (_temp_dir, config_dir) = setup_test_config_dir("");
        let manager = ConfigManager::load_from_directory_with_env(Some(config_dir), "test").unwrap();
        assert_eq!(manager.config(), &StepflowConfig::default());
    }

    #[test]
    fn test_config_file_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let result = ConfigManager::load_from_directory_with_env(
            Some(temp_dir.path().to_path_buf()),
            "test",
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::ConfigFileNotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let (_temp_dir, config_dir) = setup_test_config_dir("retry: [unclosed");
        let result = ConfigManager::load_from_directory_with_env(Some(config_dir), "test");
        assert!(matches!(result, Err(ConfigurationError::InvalidYaml { .. })));
    }

    #[test]
    fn test_config_validation_errors() {
        let (_temp_dir, config_dir) = setup_test_config_dir("retry:\n  max_attempts: 0\n");
        let result = ConfigManager::load_from_directory_with_env(Some(config_dir), "test");
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_non_mapping_environment_section_is_rejected() {
        let (_temp_dir, config_dir) = setup_test_config_dir("retry:\n  max_attempts: 2\ntest: 5\n");
        let result = ConfigManager::load_from_directory_with_env(Some(config_dir), "test");
        assert!(matches!(
            result,
            Err(ConfigurationError::ConfigMergeError { .. })
        ));
    }

    #[test]
    fn test_directory_is_not_a_config_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("stepflow-config.yaml")).unwrap();
        let result = ConfigManager::load_from_directory_with_env(
            Some(temp_dir.path().to_path_buf()),
            "test",
        );
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }
}
