//! Configuration management for Tokengate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{LimiterError, Result};
use crate::ratelimit::{Exclusion, DEFAULT_WINDOW_MS};
use crate::store::DEFAULT_MAX_KEYS;

/// Prefix for environment variables read by [`LimiterConfig::load`].
pub const ENV_PREFIX: &str = "TOKENGATE";

/// Limiter configuration, fixed once the limiter is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Tokens replenished per window
    pub rate: f64,

    /// Bucket capacity; defaults to `rate`
    #[serde(default)]
    pub burst: Option<f64>,

    /// Window length in milliseconds
    #[serde(default = "default_window")]
    pub window: u64,

    /// Maximum keys resident in the default in-memory table
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,

    /// Per-key replacements of rate/burst/window
    #[serde(default)]
    pub overrides: HashMap<String, Override>,

    /// How concurrent checks are serialized
    #[serde(default)]
    pub exclusion: Exclusion,
}

/// Per-key limits that replace the defaults wholesale.
///
/// Fields left unset are not filled in from the defaults: an override without
/// a `burst`, for instance, disables limiting for its key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Override {
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub burst: Option<f64>,
    #[serde(default)]
    pub window: Option<u64>,
}

impl Override {
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate: Some(rate),
            burst: Some(burst),
            window: None,
        }
    }

    pub fn with_window_ms(mut self, window: u64) -> Self {
        self.window = Some(window);
        self
    }

    /// An override with no fields set is ignored.
    pub fn is_empty(&self) -> bool {
        self.rate.is_none() && self.burst.is_none() && self.window.is_none()
    }
}

fn default_window() -> u64 {
    DEFAULT_WINDOW_MS
}

fn default_max_keys() -> usize {
    DEFAULT_MAX_KEYS
}

impl LimiterConfig {
    /// Create a configuration with the given rate and defaults elsewhere.
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            burst: None,
            window: default_window(),
            max_keys: default_max_keys(),
            overrides: HashMap::new(),
            exclusion: Exclusion::default(),
        }
    }

    pub fn with_burst(mut self, burst: f64) -> Self {
        self.burst = Some(burst);
        self
    }

    pub fn with_window_ms(mut self, window: u64) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, limits: Override) -> Self {
        self.overrides.insert(key.into(), limits);
        self
    }

    pub fn with_exclusion(mut self, exclusion: Exclusion) -> Self {
        self.exclusion = exclusion;
        self
    }

    /// Effective bucket capacity.
    pub fn burst(&self) -> f64 {
        self.burst.unwrap_or(self.rate)
    }

    /// Check the configuration for values the limiter cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(LimiterError::Config(format!(
                "rate must be a positive number, got {}",
                self.rate
            )));
        }
        if let Some(burst) = self.burst {
            check_non_negative("burst", burst)?;
        }
        if self.window == 0 {
            return Err(LimiterError::Config("window must be at least 1ms".to_string()));
        }
        if self.max_keys == 0 {
            return Err(LimiterError::Config("max_keys must be at least 1".to_string()));
        }

        for (key, limits) in &self.overrides {
            if let Some(rate) = limits.rate {
                check_non_negative(&format!("overrides.{key}.rate"), rate)?;
            }
            if let Some(burst) = limits.burst {
                check_non_negative(&format!("overrides.{key}.burst"), burst)?;
            }
            if limits.window == Some(0) {
                return Err(LimiterError::Config(format!(
                    "overrides.{key}.window must be at least 1ms"
                )));
            }
        }

        Ok(())
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LimiterConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse limiter config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LimiterConfig = serde_json::from_str(json)
            .map_err(|e| LimiterError::Config(format!("Failed to parse limiter config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional YAML file, overlaid with
    /// environment variables such as `TOKENGATE__RATE` or
    /// `TOKENGATE__WINDOW`.
    ///
    /// Overrides are taken from the file only, with their keys exactly as
    /// written there. Environment variables cannot carry a key's case, so
    /// `TOKENGATE__OVERRIDES__*` is ignored.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = config::Config::builder();
        let mut overrides = HashMap::new();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading limiter configuration");

            let contents = std::fs::read_to_string(path)?;
            let table: OverrideTable = serde_yaml::from_str(&contents).map_err(|e| {
                LimiterError::Config(format!("Failed to parse limiter config: {}", e))
            })?;
            overrides = table.overrides;

            builder = builder.add_source(config::File::from_str(
                &contents,
                config::FileFormat::Yaml,
            ));
        }

        let mut config: LimiterConfig = builder
            .add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        // The config crate lowercases map keys; keep the file's spelling.
        config.overrides = overrides;

        config.validate()?;
        Ok(config)
    }
}

/// The `overrides` section of a configuration file, keys untouched.
#[derive(Debug, Default, Deserialize)]
struct OverrideTable {
    #[serde(default)]
    overrides: HashMap<String, Override>,
}

fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(LimiterError::Config(format!(
            "{name} must be a non-negative number, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LimiterConfig::new(10.0);
        assert_eq!(config.burst(), 10.0);
        assert_eq!(config.window, 1000);
        assert_eq!(config.max_keys, 10000);
        assert_eq!(config.exclusion, Exclusion::Global);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
rate: 5
burst: 10
window: 60000
exclusion: per_key
overrides:
  vip:
    rate: 100
    burst: 200
  partial:
    rate: 1
"#;
        let config = LimiterConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rate, 5.0);
        assert_eq!(config.burst(), 10.0);
        assert_eq!(config.window, 60000);
        assert_eq!(config.exclusion, Exclusion::PerKey);
        assert_eq!(config.overrides["vip"], Override::new(100.0, 200.0));
        assert_eq!(config.overrides["partial"].burst, None);
    }

    #[test]
    fn test_parse_json() {
        let config = LimiterConfig::from_json(r#"{"rate": 2, "max_keys": 50}"#).unwrap();
        assert_eq!(config.rate, 2.0);
        assert_eq!(config.burst(), 2.0);
        assert_eq!(config.max_keys, 50);
    }

    #[test]
    fn test_missing_rate_is_config_error() {
        let err = LimiterConfig::from_yaml("burst: 5\n").unwrap_err();
        assert!(matches!(err, LimiterError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(LimiterConfig::new(0.0).validate().is_err());
        assert!(LimiterConfig::new(-1.0).validate().is_err());
        assert!(LimiterConfig::new(f64::NAN).validate().is_err());
        assert!(LimiterConfig::new(1.0).with_burst(-2.0).validate().is_err());
        assert!(LimiterConfig::new(1.0).with_window_ms(0).validate().is_err());
        assert!(LimiterConfig::new(1.0).with_max_keys(0).validate().is_err());
        assert!(LimiterConfig::new(1.0)
            .with_override("k", Override::new(1.0, 1.0).with_window_ms(0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_zero_override_is_valid() {
        let config = LimiterConfig::new(1.0).with_override("free", Override::new(0.0, 0.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_override() {
        assert!(Override::default().is_empty());
        assert!(!Override::new(1.0, 1.0).is_empty());
    }

    fn write_temp_config(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("tokengate-{}-{}.yaml", name, std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}", contents).unwrap();
        path
    }

    #[test]
    fn test_from_file() {
        let path = write_temp_config("from-file", "rate: 3\nwindow: 500\n");

        let config = LimiterConfig::from_file(&path).unwrap();
        assert_eq!(config.rate, 3.0);
        assert_eq!(config.window, 500);

        let loaded = LimiterConfig::load_with_prefix(Some(path.as_path()), "TOKENGATE_FROM_FILE").unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_keeps_override_key_case() {
        let yaml = r#"
rate: 100
overrides:
  ApiKeyABC:
    rate: 1
    burst: 1
  lower:
    rate: 2
    burst: 2
"#;
        let path = write_temp_config("key-case", yaml);

        let loaded = LimiterConfig::load_with_prefix(Some(path.as_path()), "TOKENGATE_KEY_CASE").unwrap();
        assert_eq!(loaded.overrides.len(), 2);
        assert_eq!(loaded.overrides["ApiKeyABC"], Override::new(1.0, 1.0));
        assert_eq!(loaded.overrides["lower"], Override::new(2.0, 2.0));
        assert!(!loaded.overrides.contains_key("apikeyabc"));
        assert_eq!(loaded.overrides, LimiterConfig::from_file(&path).unwrap().overrides);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_layers_environment() {
        let yaml = r#"
rate: 3
window: 500
overrides:
  MixedCase:
    rate: 1
    burst: 1
"#;
        let path = write_temp_config("env-layering", yaml);

        std::env::set_var("TOKENGATE_ENV_LAYERING__RATE", "7");
        std::env::set_var("TOKENGATE_ENV_LAYERING__BURST", "14");
        std::env::set_var("TOKENGATE_ENV_LAYERING__OVERRIDES__OTHER__RATE", "9");

        let loaded = LimiterConfig::load_with_prefix(Some(path.as_path()), "TOKENGATE_ENV_LAYERING");

        std::env::remove_var("TOKENGATE_ENV_LAYERING__RATE");
        std::env::remove_var("TOKENGATE_ENV_LAYERING__BURST");
        std::env::remove_var("TOKENGATE_ENV_LAYERING__OVERRIDES__OTHER__RATE");
        std::fs::remove_file(&path).unwrap();

        let loaded = loaded.unwrap();
        assert_eq!(loaded.rate, 7.0);
        assert_eq!(loaded.burst(), 14.0);
        assert_eq!(loaded.window, 500);

        // Overrides only come from the file, with their case intact
        assert_eq!(loaded.overrides.len(), 1);
        assert_eq!(loaded.overrides["MixedCase"], Override::new(1.0, 1.0));
    }

    #[test]
    fn test_load_from_environment_only() {
        std::env::set_var("TOKENGATE_ENV_ONLY__RATE", "4");
        let loaded = LimiterConfig::load_with_prefix(None, "TOKENGATE_ENV_ONLY");
        std::env::remove_var("TOKENGATE_ENV_ONLY__RATE");

        let loaded = loaded.unwrap();
        assert_eq!(loaded.rate, 4.0);
        assert_eq!(loaded.window, 1000);
        assert!(loaded.overrides.is_empty());
    }

    #[test]
    fn test_load_without_rate_is_config_error() {
        let err = LimiterConfig::load_with_prefix(None, "TOKENGATE_NO_RATE").unwrap_err();
        assert!(matches!(err, LimiterError::Config(_)));
    }

    #[test]
    fn test_from_missing_file() {
        let err = LimiterConfig::from_file("/nonexistent/tokengate.yaml").unwrap_err();
        assert!(matches!(err, LimiterError::Io(_)));
    }
}
