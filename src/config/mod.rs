//! Configuration module
//!
//! Handles loading and managing configuration.

mod env;
mod file;

pub use env::{EnvConfig, MODULE_MAP_VAR};
pub use file::ConfigFile;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Run-wide settings shipped to every worker alongside each work item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Directory the run was started from
    pub root_dir: PathBuf,

    /// Watch mode: work items carry the module map snapshot
    pub watch: bool,

    /// Stop dispatching after the first failing test file
    pub bail: bool,

    /// Verbose reporting
    pub verbose: bool,

    /// Per test file timeout in seconds
    pub test_timeout_secs: u64,
}

impl GlobalConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            watch: false,
            bail: false,
            verbose: false,
            test_timeout_secs: default_test_timeout(),
        }
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_bail(mut self, bail: bool) -> Self {
        self.bail = bail;
        self
    }
}

/// One project: where its tests live and how a single test file is run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Display name, also used for the timing cache file
    pub name: String,

    /// Project root; the test command runs here
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Source roots relative to `root_dir`; empty means the root itself
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// File name fragments marking a test file
    #[serde(default = "default_test_match")]
    pub test_match: Vec<String>,

    /// Command running one test file; `{path}` is substituted, otherwise
    /// the path is appended
    #[serde(default)]
    pub test_command: Vec<String>,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root_dir: root_dir.into(),
            roots: Vec::new(),
            test_match: default_test_match(),
            test_command: Vec::new(),
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.test_command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    /// Absolute-ish source roots to scan
    pub fn root_paths(&self) -> Vec<PathBuf> {
        if self.roots.is_empty() {
            vec![self.root_dir.clone()]
        } else {
            self.roots.iter().map(|r| self.root_dir.join(r)).collect()
        }
    }

    /// Whether a file name marks a test file
    pub fn is_test_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.test_match.iter().any(|m| name.contains(m.as_str()))
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self::new("default", default_root_dir())
    }
}

/// Settings for a test run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Worker processes; derived from the core count when unset
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Stop after the first failing test file
    #[serde(default)]
    pub bail: bool,

    /// Per test file timeout in seconds
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,

    /// Where timing data is kept between runs
    #[serde(default)]
    pub cache_directory: Option<PathBuf>,

    /// Reporter names (default, summary, json)
    #[serde(default = "default_reporters")]
    pub reporters: Vec<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_workers: None,
            bail: false,
            test_timeout_secs: default_test_timeout(),
            cache_directory: None,
            reporters: default_reporters(),
        }
    }
}

impl RunSettings {
    /// Cache directory, falling back to the platform cache dir
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_directory.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("testfarm")
        })
    }
}

/// Settings for the change debouncer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSettings {
    /// Debounce window in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Command receiving the batched changed paths
    #[serde(default)]
    pub build_command: Vec<String>,

    /// Directory holding packages with `src/` and `build/` trees
    #[serde(default = "default_packages_dir")]
    pub packages_dir: PathBuf,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            build_command: Vec::new(),
            packages_dir: default_packages_dir(),
        }
    }
}

/// Effective worker count.
///
/// An explicit value wins (clamped to at least one). Otherwise one core is
/// left for the orchestrator, and watch mode takes only half of the cores.
pub fn resolve_max_workers(explicit: Option<usize>, watch: bool) -> usize {
    if let Some(n) = explicit {
        return n.max(1);
    }

    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    if watch {
        (cpus / 2).max(1)
    } else {
        cpus.saturating_sub(1).max(1)
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_test_match() -> Vec<String> {
    vec![".test.".to_string(), "-test.".to_string(), "_test.".to_string()]
}

fn default_test_timeout() -> u64 {
    300
}

fn default_reporters() -> Vec<String> {
    vec!["default".to_string(), "summary".to_string()]
}

fn default_interval_ms() -> u64 {
    100
}

fn default_packages_dir() -> PathBuf {
    PathBuf::from("packages")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_max_workers_explicit() {
        assert_eq!(resolve_max_workers(Some(3), false), 3);
        assert_eq!(resolve_max_workers(Some(0), true), 1);
    }

    #[test]
    fn test_resolve_max_workers_derived() {
        assert!(resolve_max_workers(None, false) >= 1);
        assert!(resolve_max_workers(None, true) >= 1);
    }

    #[test]
    fn test_project_roots() {
        let project = ProjectConfig::new("app", "/repo");
        assert_eq!(project.root_paths(), vec![PathBuf::from("/repo")]);

        let project = project.with_root("src").with_root("lib");
        assert_eq!(
            project.root_paths(),
            vec![PathBuf::from("/repo/src"), PathBuf::from("/repo/lib")]
        );
    }

    #[test]
    fn test_is_test_file() {
        let project = ProjectConfig::default();
        assert!(project.is_test_file(Path::new("src/sum.test.js")));
        assert!(project.is_test_file(Path::new("src/sum-test.js")));
        assert!(project.is_test_file(Path::new("tests/io_test.py")));
        assert!(!project.is_test_file(Path::new("src/sum.js")));
    }

    #[test]
    fn test_global_config_builder() {
        let config = GlobalConfig::new("/repo").with_watch(true).with_bail(true);
        assert!(config.watch);
        assert!(config.bail);
        assert_eq!(config.test_timeout_secs, 300);
    }
}
