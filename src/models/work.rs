//! Work units handed from the orchestrator to an executor
//!
//! A [`TestDescriptor`] names one test file inside a [`RunContext`]; a
//! [`WorkItem`] is the serializable form shipped to a worker process.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::config::{GlobalConfig, ProjectConfig};
use crate::utils::fs::walk_files;

/// Resolution snapshot: module id -> file.
///
/// Ids are root-relative paths without extension, `/`-separated. Cloning
/// shares the underlying map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawModuleMap(Arc<BTreeMap<String, PathBuf>>);

impl RawModuleMap {
    pub fn new(entries: BTreeMap<String, PathBuf>) -> Self {
        Self(Arc::new(entries))
    }

    /// Walk `roots` and resolve every file found.
    ///
    /// When two roots provide the same id the first root wins.
    pub fn build(roots: &[PathBuf]) -> Self {
        let mut entries = BTreeMap::new();

        for root in roots {
            for file in walk_files(root) {
                if let Some(id) = module_id(root, &file) {
                    entries.entry(id).or_insert(file);
                }
            }
        }

        Self::new(entries)
    }

    pub fn resolve(&self, id: &str) -> Option<&Path> {
        self.0.get(id).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether both handles point at the same snapshot
    pub fn same_snapshot(&self, other: &RawModuleMap) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

fn module_id(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?.with_extension("");
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Lazily computed module map for one project
#[derive(Debug)]
pub struct ModuleMap {
    roots: Vec<PathBuf>,
    raw: OnceLock<RawModuleMap>,
}

impl ModuleMap {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            raw: OnceLock::new(),
        }
    }

    /// Module map with an already known snapshot
    #[cfg(test)]
    pub fn from_raw(raw: RawModuleMap) -> Self {
        let map = Self::new(Vec::new());
        let _ = map.raw.set(raw);
        map
    }

    /// The raw snapshot, resolved on first request
    pub fn raw_module_map(&self) -> RawModuleMap {
        self.raw
            .get_or_init(|| {
                let raw = RawModuleMap::build(&self.roots);
                debug!("Resolved {} modules from {} roots", raw.len(), self.roots.len());
                raw
            })
            .clone()
    }

    #[cfg(test)]
    pub fn is_resolved(&self) -> bool {
        self.raw.get().is_some()
    }
}

/// Per-project context shared by every test of that project
#[derive(Debug)]
pub struct RunContext {
    pub config: ProjectConfig,
    pub module_map: ModuleMap,
}

impl RunContext {
    pub fn new(config: ProjectConfig) -> Self {
        let module_map = ModuleMap::new(config.root_paths());
        Self { config, module_map }
    }

    #[cfg(test)]
    pub fn with_module_map(config: ProjectConfig, module_map: ModuleMap) -> Self {
        Self { config, module_map }
    }
}

/// One test file to run
#[derive(Clone, Debug)]
pub struct TestDescriptor {
    pub context: Arc<RunContext>,
    pub path: PathBuf,
    /// Duration of the previous run, when known
    pub duration_ms: Option<u64>,
}

impl TestDescriptor {
    pub fn new(context: Arc<RunContext>, path: impl Into<PathBuf>) -> Self {
        Self {
            context,
            path: path.into(),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

impl fmt::Display for TestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Serializable unit of work for one test file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub config: ProjectConfig,
    pub global_config: GlobalConfig,
    pub path: PathBuf,
    /// Present exactly when `global_config.watch` is set
    pub raw_module_map: Option<RawModuleMap>,
}

impl WorkItem {
    pub fn build(test: &TestDescriptor, global_config: &GlobalConfig) -> Self {
        let raw_module_map = if global_config.watch {
            Some(test.context.module_map.raw_module_map())
        } else {
            None
        };

        Self {
            config: test.context.config.clone(),
            global_config: global_config.clone(),
            path: test.path.clone(),
            raw_module_map,
        }
    }
}
