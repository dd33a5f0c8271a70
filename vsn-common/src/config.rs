//! Node configuration loading
//!
//! Bootstrap settings come from a TOML file. The file is located in priority
//! order:
//! 1. Command-line argument (highest priority)
//! 2. `VSN_CONFIG` environment variable
//! 3. Platform config file
//! 4. Built-in defaults (no file at all)
//!
//! Every key is optional; missing keys take the built-in default.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Log levels accepted in `[logging] level`
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "VSN_CONFIG";

/// The only frame length the voice transport accepts
pub const FRAME_DURATION_MS: u64 = 20;

/// Node configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Interval between periodic player updates, in whole seconds
    pub player_update_interval: u64,

    /// Look-ahead buffered by the reference engine, in milliseconds
    pub frame_buffer_duration_ms: u64,

    /// Length of one transport frame, in milliseconds
    pub frame_duration_ms: u64,

    /// Loss counter window, in seconds
    pub loss_window_secs: u64,

    /// How long a paused session may wait for its controller to come back
    pub resume_timeout_secs: u64,

    /// Capacity of the outbound message channel
    pub event_buffer: usize,

    /// Initial engine volume
    pub default_volume: i32,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub level: String,
}

impl LoggingConfig {
    /// Filter directives applied when `RUST_LOG` is unset
    pub fn filter_directives(&self) -> String {
        format!("vsn_player={0},vsn_common={0}", self.level)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            player_update_interval: 5,
            frame_buffer_duration_ms: 5000,
            frame_duration_ms: FRAME_DURATION_MS,
            loss_window_secs: 60,
            resume_timeout_secs: 60,
            event_buffer: 100,
            default_volume: 100,
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Resolve and load configuration
    ///
    /// An explicitly named file (argument or environment) must exist; the
    /// platform file is optional.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_path {
            return Self::from_file(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }

        // Priority 3: Platform config file
        if let Some(path) = platform_config_file() {
            return Self::from_file(&path);
        }

        // Priority 4: Built-in defaults
        debug!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would break the playback pipeline
    pub fn validate(&self) -> Result<()> {
        if self.player_update_interval == 0 {
            return Err(Error::Config(
                "player_update_interval must be at least 1 second".to_string(),
            ));
        }
        if self.loss_window_secs == 0 {
            return Err(Error::Config(
                "loss_window_secs must be at least 1 second".to_string(),
            ));
        }
        if self.frame_duration_ms != FRAME_DURATION_MS {
            return Err(Error::Config(format!(
                "frame_duration_ms must be {} (got {})",
                FRAME_DURATION_MS, self.frame_duration_ms
            )));
        }
        if self.event_buffer == 0 {
            return Err(Error::Config("event_buffer must be non-zero".to_string()));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(Error::Config(format!(
                "logging.level must be one of {} (got {})",
                LOG_LEVELS.join(", "),
                self.logging.level
            )));
        }
        Ok(())
    }

    pub fn player_update_period(&self) -> Duration {
        crate::time::secs_to_duration(self.player_update_interval)
    }

    pub fn loss_window(&self) -> Duration {
        crate::time::secs_to_duration(self.loss_window_secs)
    }
}

/// Platform config file, if one exists
fn platform_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("vsn").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/vsn/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.player_update_interval, 5);
        assert_eq!(config.frame_duration_ms, 20);
        assert_eq!(config.loss_window(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = NodeConfig::from_toml("player_update_interval = 2\n").unwrap();
        assert_eq!(config.player_update_interval, 2);
        assert_eq!(config.default_volume, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_logging_section() {
        let config = NodeConfig::from_toml("[logging]\nlevel = \"trace\"\n").unwrap();
        assert_eq!(config.logging.level, "trace");
        assert_eq!(
            config.logging.filter_directives(),
            "vsn_player=trace,vsn_common=trace"
        );
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let result = NodeConfig::from_toml("[logging]\nlevel = \"loud\"\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = NodeConfig::from_toml("player_update_interval = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_non_standard_frame_duration_rejected() {
        let result = NodeConfig::from_toml("frame_duration_ms = 40\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let result = NodeConfig::from_toml("player_update_interval = \"soon\"\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    #[serial]
    fn test_cli_path_takes_priority_over_env() {
        let mut cli_file = NamedTempFile::new().unwrap();
        writeln!(cli_file, "player_update_interval = 3").unwrap();
        let mut env_file = NamedTempFile::new().unwrap();
        writeln!(env_file, "player_update_interval = 9").unwrap();

        std::env::set_var(CONFIG_ENV_VAR, env_file.path());
        let config = NodeConfig::load(Some(cli_file.path())).unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.player_update_interval, 3);
    }

    #[test]
    #[serial]
    fn test_env_path_used_without_cli() {
        let mut env_file = NamedTempFile::new().unwrap();
        writeln!(env_file, "loss_window_secs = 30").unwrap();

        std::env::set_var(CONFIG_ENV_VAR, env_file.path());
        let config = NodeConfig::load(None).unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.loss_window_secs, 30);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let result = NodeConfig::load(Some(&missing));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
