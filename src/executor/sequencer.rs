//! Test ordering from previous runs
//!
//! Timings are kept per project as JSON in the cache directory. Files that
//! failed last time go first, then files without timing data (largest
//! first), then the rest from slowest to fastest.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::{AggregatedResults, TestDescriptor, TestStatus};

/// What the last run recorded for one test file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingEntry {
    pub failed: bool,
    pub duration_ms: u64,
}

type TimingCache = BTreeMap<PathBuf, TimingEntry>;

pub struct TestSequencer {
    cache_dir: PathBuf,
    caches: HashMap<String, TimingCache>,
}

impl TestSequencer {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            caches: HashMap::new(),
        }
    }

    fn cache_path(&self, project: &str) -> PathBuf {
        let name: String = project
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.cache_dir.join(format!("perf-cache-{name}.json"))
    }

    fn cache(&mut self, project: &str) -> &mut TimingCache {
        if !self.caches.contains_key(project) {
            let loaded = load_cache(&self.cache_path(project));
            self.caches.insert(project.to_string(), loaded);
        }
        self.caches.entry(project.to_string()).or_default()
    }

    /// Order `tests` for the next run, filling in known durations
    pub fn sort(&mut self, tests: Vec<TestDescriptor>) -> Vec<TestDescriptor> {
        let mut keyed: Vec<_> = tests
            .into_iter()
            .map(|mut test| {
                let entry = self
                    .cache(&test.context.config.name)
                    .get(&test.path)
                    .copied();
                test.duration_ms = entry.map(|e| e.duration_ms);

                let failed = entry.is_some_and(|e| e.failed);
                let weight = match entry {
                    Some(e) => e.duration_ms,
                    None => file_size(&test.path),
                };
                ((!failed, entry.is_some(), Reverse(weight)), test)
            })
            .collect();

        keyed.sort_by_key(|(key, _)| *key);
        keyed.into_iter().map(|(_, test)| test).collect()
    }

    /// Record the outcome of a run for the projects it touched
    pub fn cache_results(
        &mut self,
        tests: &[TestDescriptor],
        results: &AggregatedResults,
    ) -> Result<()> {
        let projects: HashMap<&Path, &str> = tests
            .iter()
            .map(|t| (t.path.as_path(), t.context.config.name.as_str()))
            .collect();
        let mut touched = HashSet::new();

        for result in &results.test_results {
            if result.status == TestStatus::Skip {
                continue;
            }
            let Some(project) = projects.get(result.path.as_path()) else {
                continue;
            };

            let entry = TimingEntry {
                failed: matches!(result.status, TestStatus::Fail | TestStatus::Error),
                duration_ms: result.duration_ms,
            };
            self.cache(project).insert(result.path.clone(), entry);
            touched.insert(project.to_string());
        }

        if touched.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.cache_dir).with_context(|| {
            format!("Failed to create cache directory {}", self.cache_dir.display())
        })?;

        for project in touched {
            let path = self.cache_path(&project);
            let Some(cache) = self.caches.get(&project) else {
                continue;
            };
            let file = File::create(&path).context("Failed to create timing cache")?;
            serde_json::to_writer(BufWriter::new(file), cache)
                .context("Failed to write timing cache")?;
            debug!("Saved {} timings to {}", cache.len(), path.display());
        }

        Ok(())
    }
}

fn load_cache(path: &Path) -> TimingCache {
    let Ok(file) = File::open(path) else {
        return TimingCache::new();
    };
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(cache) => cache,
        Err(e) => {
            debug!("Ignoring unreadable timing cache {}: {}", path.display(), e);
            TimingCache::new()
        }
    }
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
