//! Configuration module - environment variable parsing

use std::env;
use std::path::PathBuf;

/// TAS subsystem configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Maximum number of ticks of history to retain
    pub max_history_ticks: i32,
    /// Ticks between guaranteed-retained keyframes
    pub keyframe_interval: i32,
    /// Hard memory budget for stored snapshots, in bytes
    pub max_memory_bytes: usize,
    /// Recent window that is never evicted, in ticks
    pub min_retained_ticks: i32,

    /// Directory TAS input files are saved to and loaded from
    pub save_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            max_history_ticks: parse_var("TAS_MAX_HISTORY_TICKS", 90_000)?,
            keyframe_interval: parse_var("TAS_KEYFRAME_INTERVAL", 50)?,
            max_memory_bytes: parse_var::<usize>("TAS_MAX_MEMORY_MB", 2048)? * 1024 * 1024,
            min_retained_ticks: parse_var("TAS_MIN_RETAINED_TICKS", 250)?,

            save_dir: env::var("TAS_SAVE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("tas")),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            max_history_ticks: 90_000, // 30 minutes at 50 ticks/sec
            keyframe_interval: 50,     // 1 second
            max_memory_bytes: 2 * 1024 * 1024 * 1024,
            min_retained_ticks: 250, // 5 seconds
            save_dir: PathBuf::from("tas"),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
