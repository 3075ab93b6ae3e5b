//! Logging utilities
//!
//! Provides logging configuration and helpers.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Log level configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Pick the level from the verbose flag or an explicit name
    pub fn resolve(verbose: bool, name: Option<&str>) -> Self {
        if verbose {
            return LogLevel::Debug;
        }
        name.and_then(LogLevel::from_str).unwrap_or(LogLevel::Info)
    }
}

/// Initialize the logger with specified level
///
/// Everything goes to stderr: a worker's stdout carries its protocol.
pub fn init_logger(level: LogLevel) {
    let filter = EnvFilter::new(format!("testfarm={}", level.to_tracing_level()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!(LogLevel::from_str("info"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_str("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("unknown"), None);
    }

    #[test]
    fn test_resolve_prefers_verbose() {
        assert_eq!(LogLevel::resolve(true, Some("error")), LogLevel::Debug);
        assert_eq!(LogLevel::resolve(false, Some("warn")), LogLevel::Warn);
        assert_eq!(LogLevel::resolve(false, Some("nope")), LogLevel::Info);
        assert_eq!(LogLevel::resolve(false, None), LogLevel::Info);
    }
}
