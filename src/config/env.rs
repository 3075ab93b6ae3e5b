//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;
use std::path::PathBuf;

/// Environment variable prefix
const ENV_PREFIX: &str = "TESTFARM";

/// Variable carrying the module map into a test process
pub const MODULE_MAP_VAR: &str = "TESTFARM_MODULE_MAP";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Config file from TESTFARM_CONFIG
    pub config_file: Option<PathBuf>,
    /// Worker count from TESTFARM_MAX_WORKERS
    pub max_workers: Option<usize>,
    /// Watch mode from TESTFARM_WATCH
    pub watch: Option<bool>,
    /// Bail from TESTFARM_BAIL
    pub bail: Option<bool>,
    /// Log level from TESTFARM_LOG
    pub log: Option<String>,
    /// Cache directory from TESTFARM_CACHE_DIR
    pub cache_dir: Option<PathBuf>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            config_file: get_env("CONFIG").map(PathBuf::from),
            max_workers: get_env_parse("MAX_WORKERS"),
            watch: get_env_bool("WATCH"),
            bail: get_env_bool("BAIL"),
            log: get_env("LOG"),
            cache_dir: get_env("CACHE_DIR").map(PathBuf::from),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.config_file.is_some()
            || self.max_workers.is_some()
            || self.watch.is_some()
            || self.bail.is_some()
            || self.log.is_some()
            || self.cache_dir.is_some()
    }

    /// Get watch flag with fallback
    pub fn watch_or(&self, default: bool) -> bool {
        self.watch.unwrap_or(default)
    }

    /// Get bail flag with fallback
    pub fn bail_or(&self, default: bool) -> bool {
        self.bail.unwrap_or(default)
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}
