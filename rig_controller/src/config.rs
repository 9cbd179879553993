use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::session::GearRatio;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration file: {source}")]
    ReadError { source: std::io::Error },

    #[error("Failed to parse configuration: {source}")]
    ParseError { source: toml::de::Error },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError { source: toml::ser::Error },

    #[error("Failed to write configuration file: {source}")]
    WriteError { source: std::io::Error },

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

#[derive(Deserialize, Debug, Serialize, Clone)]
#[serde(default)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    /// Upper bound on how long one read blocks before the session re-checks
    /// the cancellation flag.
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 100,
        }
    }
}

#[derive(Deserialize, Debug, Serialize, Clone)]
#[serde(default)]
pub struct MotionConfig {
    pub step_delay_us: u32,
    pub report_interval: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            step_delay_us: 225,
            report_interval: 100,
        }
    }
}

#[derive(Deserialize, Debug, Serialize, Clone)]
#[serde(default)]
pub struct GearConfig {
    pub step_angle_deg: f64,
    pub microstep: u32,
    pub gear_teeth: u32,
}

impl Default for GearConfig {
    fn default() -> Self {
        Self {
            step_angle_deg: 1.8,
            microstep: 4,
            gear_teeth: 113,
        }
    }
}

impl From<&GearConfig> for GearRatio {
    fn from(value: &GearConfig) -> Self {
        GearRatio {
            step_angle_deg: value.step_angle_deg,
            microstep: value.microstep,
            gear_teeth: value.gear_teeth,
        }
    }
}

#[derive(Deserialize, Debug, Serialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub directory: PathBuf,
    pub base_name: String,
    /// Rotate once the active file reaches this many bytes. 0 disables
    /// rotation.
    pub max_size_bytes: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            base_name: "combined_step_log".to_string(),
            max_size_bytes: 0,
        }
    }
}

impl LogConfig {
    pub fn rotation_threshold(&self) -> Option<u64> {
        (self.max_size_bytes > 0).then_some(self.max_size_bytes)
    }
}

#[derive(Deserialize, Debug, Serialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WatcherSource {
    /// Any input on the console cancels the running command.
    Console,
    /// Ctrl+C cancels the running command and lets the session wind down.
    CtrlC,
    /// Ctrl+C writes the stop line straight to the port and exits.
    RawSignal,
}

#[derive(Deserialize, Debug, Serialize, Clone)]
#[serde(default)]
pub struct WatcherConfig {
    pub source: WatcherSource,
    pub poll_period_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            source: WatcherSource::Console,
            poll_period_ms: 100,
        }
    }
}

impl WatcherConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }
}

/// Ten minutes. A stopped device answers within one pulse period.
pub const MAX_DRAIN_TIMEOUT_MS: u64 = 600_000;

#[derive(Deserialize, Debug, Serialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a cancelled command keeps reading for the device's final
    /// report and emergency stop notice.
    pub drain_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 2_000,
        }
    }
}

#[derive(Deserialize, Debug, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is not set.
    pub filter: String,
    /// Also write diagnostics to daily files in this directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            directory: None,
        }
    }
}

#[derive(Deserialize, Debug, Serialize, Clone, Default)]
#[serde(default)]
pub struct RigConfig {
    pub serial: SerialConfig,
    pub motion: MotionConfig,
    pub gear: GearConfig,
    pub log: LogConfig,
    pub watcher: WatcherConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl RigConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: &str| {
            Err(ConfigError::ValidationError {
                message: message.to_string(),
            })
        };

        if self.motion.report_interval == 0 {
            return fail("motion.report_interval must be at least 1");
        }
        if !(self.gear.step_angle_deg > 0.0) {
            return fail("gear.step_angle_deg must be positive");
        }
        if self.gear.microstep == 0 || self.gear.gear_teeth == 0 {
            return fail("gear.microstep and gear.gear_teeth must be non-zero");
        }
        if self.watcher.poll_period_ms == 0 {
            return fail("watcher.poll_period_ms must be non-zero");
        }
        if self.serial.read_timeout_ms == 0 {
            return fail("serial.read_timeout_ms must be non-zero");
        }
        if self.log.base_name.is_empty() {
            return fail("log.base_name must not be empty");
        }
        if self.session.drain_timeout_ms > MAX_DRAIN_TIMEOUT_MS {
            return fail("session.drain_timeout_ms must be at most 600000");
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigOptions {
    pub config_path: PathBuf,
    pub create_if_missing: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            create_if_missing: true,
        }
    }
}

impl ConfigOptions {
    pub fn default_config_path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("rig_config.toml"))
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    options: ConfigOptions,
}

impl ConfigManager {
    pub fn with_options(options: ConfigOptions) -> Self {
        Self { options }
    }

    pub fn load(&self) -> anyhow::Result<RigConfig> {
        let config_path = self.options.config_path.clone();

        if !config_path.exists() {
            if self.options.create_if_missing {
                let default_config = RigConfig::default();
                self.save(&default_config)
                    .context("Failed to save default config")?;
                return Ok(default_config);
            } else {
                return Err(ConfigError::FileNotFound {
                    path: config_path.clone(),
                }
                .into());
            }
        }

        let content =
            fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError { source: e })?;

        let config: RigConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { source: e })?;

        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, config: &RigConfig) -> anyhow::Result<()> {
        let config_path = &self.options.config_path;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(config_path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

pub fn init_config_with_options(
    options: ConfigOptions,
) -> anyhow::Result<(ConfigManager, RigConfig)> {
    let manager = ConfigManager::with_options(options);
    let config = manager.load()?;
    Ok((manager, config))
}

pub fn create_default_config<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<()> {
    let config_path = path
        .map(|p| p.as_ref().to_path_buf())
        .unwrap_or_else(ConfigOptions::default_config_path);

    let options = ConfigOptions {
        config_path,
        create_if_missing: true,
    };

    let manager = ConfigManager::with_options(options);
    let default_config = RigConfig::default();
    manager.save(&default_config)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("rig_controller_config_{}_{name}", std::process::id()))
            .join("rig_config.toml")
    }

    #[test]
    fn defaults_match_rig_hardware() {
        let config = RigConfig::default();

        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.motion.step_delay_us, 225);
        assert_eq!(config.motion.report_interval, 100);
        assert_eq!(config.gear.microstep, 4);
        assert_eq!(config.gear.gear_teeth, 113);
        assert_eq!(config.log.rotation_threshold(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: RigConfig = toml::from_str(
            r#"
            [log]
            max_size_bytes = 4096

            [watcher]
            source = "raw-signal"
            "#,
        )
        .unwrap();

        assert_eq!(config.log.rotation_threshold(), Some(4096));
        assert_eq!(config.log.base_name, "combined_step_log");
        assert_eq!(config.watcher.source, WatcherSource::RawSignal);
        assert_eq!(config.watcher.poll_period(), Duration::from_millis(100));
    }

    #[test]
    fn rejects_zero_report_interval() {
        let mut config = RigConfig::default();
        config.motion.report_interval = 0;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn bounds_drain_timeout() {
        let mut config = RigConfig::default();
        config.session.drain_timeout_ms = MAX_DRAIN_TIMEOUT_MS;
        assert!(config.validate().is_ok());

        config.session.drain_timeout_ms = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn creates_missing_file_and_reloads_it() {
        let path = scratch_path("roundtrip");
        let _ = fs::remove_file(&path);

        let (_manager, created) =
            init_config_with_options(ConfigOptions::with_path(&path)).unwrap();
        assert!(path.exists());

        let (_manager, loaded) = init_config_with_options(ConfigOptions::with_path(&path)).unwrap();
        assert_eq!(loaded.serial.device, created.serial.device);
        assert_eq!(loaded.watcher.source, created.watcher.source);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_without_create_is_an_error() {
        let options = ConfigOptions {
            config_path: scratch_path("missing"),
            create_if_missing: false,
        };

        let err = ConfigManager::with_options(options).load().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::FileNotFound { .. })
        ));
    }
}
