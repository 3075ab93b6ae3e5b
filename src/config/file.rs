//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{GlobalConfig, ProjectConfig, RunSettings, WatchSettings};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./testfarm.yaml",
    "./testfarm.yml",
    "./testfarm.json",
    "./.testfarm/config.yaml",
    "~/.config/testfarm/config.yaml",
];

/// Full configuration file structure
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Run settings
    #[serde(default)]
    pub run: RunSettings,

    /// Projects whose tests are run
    #[serde(default = "default_projects")]
    pub projects: Vec<ProjectConfig>,

    /// Debouncer settings
    #[serde(default)]
    pub watch: WatchSettings,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_projects() -> Vec<ProjectConfig> {
    vec![ProjectConfig::default()]
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            run: RunSettings::default(),
            projects: default_projects(),
            watch: WatchSettings::default(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from an explicit path, or the first standard location, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::find() {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from file
    ///
    /// Relative project roots are resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }

        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        if self.projects.is_empty() {
            anyhow::bail!("At least one project must be configured");
        }

        if self.run.max_workers == Some(0) {
            anyhow::bail!("run.max_workers must be at least 1");
        }

        for project in &self.projects {
            if project.test_match.is_empty() {
                anyhow::bail!("Project '{}' has an empty test_match list", project.name);
            }
        }

        Ok(())
    }

    /// Validation that only matters once tests are actually executed
    pub fn validate_runnable(&self) -> Result<()> {
        for project in &self.projects {
            if project.test_command.is_empty() {
                anyhow::bail!(
                    "Project '{}' has no test_command. Set projects[].test_command in testfarm.yaml",
                    project.name
                );
            }
        }
        Ok(())
    }

    /// Global config for a run started from `root_dir`
    pub fn global_config(&self, root_dir: impl Into<PathBuf>, watch: bool) -> GlobalConfig {
        let mut global = GlobalConfig::new(root_dir)
            .with_watch(watch)
            .with_bail(self.run.bail);
        global.test_timeout_secs = self.run.test_timeout_secs;
        global
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        for project in &mut self.projects {
            if project.root_dir.is_relative() {
                project.root_dir = base.join(&project.root_dir);
            }
        }
        if self.watch.packages_dir.is_relative() {
            self.watch.packages_dir = base.join(&self.watch.packages_dir);
        }
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_default() {
        let config = ConfigFile::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.projects.len(), 1);
        assert!(config.validate().is_ok());
        assert!(config.validate_runnable().is_err());
    }

    #[test]
    fn test_config_file_yaml_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("testfarm.yaml");

        let mut config = ConfigFile::default();
        config.projects = vec![ProjectConfig::new("app", "/abs/app").with_command(["sh", "-c", "true"])];
        config.run.max_workers = Some(3);
        config.watch.packages_dir = dir.path().join("packages");
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("testfarm.yml");
        std::fs::write(
            &path,
            "projects:\n  - name: web\n    root_dir: web\n    test_command: [node, \"{path}\"]\n",
        )
        .unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        let project = &loaded.projects[0];
        assert_eq!(project.root_dir, dir.path().join("web"));
        assert_eq!(project.test_command, vec!["node", "{path}"]);
        assert_eq!(loaded.run.test_timeout_secs, 300);
        assert_eq!(loaded.watch.interval_ms, 100);
        assert_eq!(loaded.watch.packages_dir, dir.path().join("packages"));
        assert!(loaded.validate_runnable().is_ok());
    }

    #[test]
    fn test_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("testfarm.json");
        std::fs::write(&path, r#"{"run": {"bail": true}}"#).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert!(loaded.run.bail);
        assert!(loaded.global_config("/repo", false).bail);
    }

    #[test]
    fn test_validate_config() {
        let mut config = ConfigFile::default();
        config.run.max_workers = Some(0);
        assert!(config.validate().is_err());

        let mut config = ConfigFile::default();
        config.projects.clear();
        assert!(config.validate().is_err());

        let mut config = ConfigFile::default();
        config.version = "9".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_global_config_from_file() {
        let mut config = ConfigFile::default();
        config.run.test_timeout_secs = 12;
        let global = config.global_config("/repo", true);
        assert!(global.watch);
        assert_eq!(global.test_timeout_secs, 12);
        assert_eq!(global.root_dir, PathBuf::from("/repo"));
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./test.yaml");
        assert_eq!(path, PathBuf::from("./test.yaml"));
    }
}
