//! Configuration system using Figment.
//!
//! Settings are layered from lowest to highest precedence:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. A TOML file (`config/stage_focus.toml` unless a path is given)
//! 3. Environment variables prefixed with `STAGE_FOCUS_`, nested with `__`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! STAGE_FOCUS_APPLICATION__LOG_LEVEL=debug
//! STAGE_FOCUS_STAGE__MAX_STEP=250.0
//! STAGE_FOCUS_STAGE__SETTLE=20ms
//! STAGE_FOCUS_HARDWARE__DEGRADE_TO_SIMULATION=false
//! ```
//!
//! # Example TOML
//!
//! ```toml
//! [stage]
//! min_position = -10000.0
//! max_position = 10000.0
//! max_step = 500.0
//! settle = "50ms"
//!
//! [metric]
//! default_kind = "StdDev"
//! kinds = ["Mean", "StdDev", "Max"]
//! ```

use crate::metric::MetricKind;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/stage_focus.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "STAGE_FOCUS_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment could not extract the layered settings.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Extracted settings are inconsistent.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    /// Settings could not be rendered as TOML.
    #[error("Configuration serialization error: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Stage limits and motion timing
    pub stage: StageConfig,
    /// Periodic refresh timers
    pub timing: TimingConfig,
    /// Hardware adapter connection policy
    pub hardware: HardwareConfig,
    /// Metric registration
    pub metric: MetricConfig,
    /// Synthetic focus profile used in simulation mode
    pub simulation: SimulationConfig,
    /// Joystick jog mapping
    pub joystick: JoystickConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line format
    pub log_format: LogFormat,
    /// Append-only bookmark metadata file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_path: Option<PathBuf>,
    /// Capacity of the controller command channel
    pub command_channel_capacity: usize,
    /// Capacity of the event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metadata_path: None,
            command_channel_capacity: 32,
            event_channel_capacity: 256,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Stage limits and motion timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Lowest allowed coordinate on any axis (microns)
    pub min_position: f64,
    /// Highest allowed coordinate on any axis (microns)
    pub max_position: f64,
    /// Deltas below this are treated as no-ops (microns)
    pub tolerance: f64,
    /// Largest single move accepted while connected (microns)
    pub max_step: f64,
    /// Wait after a hardware move before reading the axis back
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            min_position: -25_000.0,
            max_position: 25_000.0,
            tolerance: 0.01,
            max_step: 500.0,
            settle: Duration::from_millis(50),
        }
    }
}

/// Periodic refresh timers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Position polling period
    #[serde(with = "humantime_serde")]
    pub position_refresh: Duration,
    /// Metric refresh period
    #[serde(with = "humantime_serde")]
    pub metric_refresh: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            position_refresh: Duration::from_millis(500),
            metric_refresh: Duration::from_millis(250),
        }
    }
}

/// Hardware adapter connection policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Connect attempts before giving up
    pub connect_attempts: u32,
    /// Delay between connect attempts
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    /// Fall back to simulation on hardware failure instead of entering `Error`
    pub degrade_to_simulation: bool,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            degrade_to_simulation: true,
        }
    }
}

/// Metric registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Kind selected at startup
    pub default_kind: MetricKind,
    /// Kinds the engine computes and accepts
    pub kinds: Vec<MetricKind>,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            default_kind: MetricKind::StdDev,
            kinds: MetricKind::ALL.to_vec(),
        }
    }
}

/// Synthetic focus profile used in simulation mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Distance between focus peaks along Z (microns)
    pub focus_period: f64,
    /// Width (sigma) of each focus peak (microns)
    pub focus_width: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            focus_period: 100.0,
            focus_width: 8.0,
        }
    }
}

/// Joystick jog mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoystickConfig {
    /// Deflections with magnitude at or below this are ignored
    pub deadzone: u8,
    /// Jog distance at full deflection and full speed knob (microns)
    pub max_step: f64,
}

impl Default for JoystickConfig {
    fn default() -> Self {
        Self {
            deadzone: 5,
            max_step: 10.0,
        }
    }
}

impl Settings {
    /// Load settings from the default path, falling back to defaults when the
    /// file is absent.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific TOML file plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file is malformed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Render the settings as TOML, e.g. to seed a config file.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Position range is non-empty and finite
    /// - Tolerance and maximum step are positive
    /// - Refresh periods are non-zero
    /// - At least one metric kind is registered and the default is among them
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let stage = &self.stage;
        if !stage.min_position.is_finite()
            || !stage.max_position.is_finite()
            || stage.min_position >= stage.max_position
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid position range [{}, {}]",
                stage.min_position, stage.max_position
            )));
        }
        if !(stage.tolerance > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "tolerance must be positive, got {}",
                stage.tolerance
            )));
        }
        if !(stage.max_step > stage.tolerance) {
            return Err(ConfigError::ValidationError(format!(
                "max_step {} must exceed tolerance {}",
                stage.max_step, stage.tolerance
            )));
        }

        if self.timing.position_refresh.is_zero() || self.timing.metric_refresh.is_zero() {
            return Err(ConfigError::ValidationError(
                "Refresh periods must be non-zero".to_string(),
            ));
        }

        if self.hardware.connect_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "connect_attempts must be at least 1".to_string(),
            ));
        }

        if self.metric.kinds.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one metric kind must be registered".to_string(),
            ));
        }
        if !self.metric.kinds.contains(&self.metric.default_kind) {
            return Err(ConfigError::ValidationError(format!(
                "Default metric '{}' is not among the registered kinds",
                self.metric.default_kind
            )));
        }

        if !(self.simulation.focus_period > 0.0) || !(self.simulation.focus_width > 0.0) {
            return Err(ConfigError::ValidationError(
                "Simulation focus period and width must be positive".to_string(),
            ));
        }

        if self.application.command_channel_capacity == 0
            || self.application.event_channel_capacity == 0
        {
            return Err(ConfigError::ValidationError(
                "Channel capacities must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.stage.tolerance, 0.01);
        assert_eq!(settings.metric.kinds.len(), MetricKind::ALL.len());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();

        let result = settings.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let mut settings = Settings::default();
        settings.stage.min_position = 10.0;
        settings.stage.max_position = -10.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_default_kind_must_be_registered() {
        let mut settings = Settings::default();
        settings.metric.kinds = vec![MetricKind::Mean];
        settings.metric.default_kind = MetricKind::Max;

        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("not among the registered kinds"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("absent.toml");
            let settings = Settings::load_from(path).map_err(|e| e.to_string())?;
            assert_eq!(settings, Settings::default());
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "stage.toml",
                r#"
                [stage]
                max_step = 250.0
                settle = "20ms"

                [metric]
                default_kind = "Mean"
                kinds = ["Mean", "Max"]
                "#,
            )?;
            jail.set_env("STAGE_FOCUS_STAGE__MAX_STEP", "125.0");
            jail.set_env("STAGE_FOCUS_HARDWARE__DEGRADE_TO_SIMULATION", "false");

            let settings = Settings::load_from("stage.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.stage.max_step, 125.0);
            assert_eq!(settings.stage.settle, Duration::from_millis(20));
            assert_eq!(settings.metric.default_kind, MetricKind::Mean);
            assert_eq!(settings.metric.kinds, vec![MetricKind::Mean, MetricKind::Max]);
            assert!(!settings.hardware.degrade_to_simulation);
            // Untouched sections keep their defaults
            assert_eq!(settings.timing, TimingConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        Jail::expect_with(|jail| {
            let rendered = Settings::default().to_toml().map_err(|e| e.to_string())?;
            jail.create_file("seed.toml", &rendered)?;
            let settings = Settings::load_from("seed.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings, Settings::default());
            Ok(())
        });
    }

    #[test]
    fn test_shipped_config_loads() {
        Jail::expect_with(|jail| {
            let shipped = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
            let contents = std::fs::read_to_string(shipped).map_err(|e| e.to_string())?;
            jail.create_file("shipped.toml", &contents)?;
            jail.set_env("STAGE_FOCUS_APPLICATION__LOG_FORMAT", "json");

            let settings = Settings::load_from("shipped.toml").map_err(|e| e.to_string())?;
            assert_eq!(settings.application.log_format, LogFormat::Json);
            assert_eq!(
                settings.application.metadata_path,
                Some(PathBuf::from("data/bookmarks.jsonl"))
            );
            assert_eq!(settings.stage, StageConfig::default());
            Ok(())
        });
    }
}
