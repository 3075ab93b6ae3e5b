//! Test file discovery

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::config::ProjectConfig;
use crate::models::{RunContext, TestDescriptor};
use crate::utils::fs::walk_files;

/// Find the test files of every project.
///
/// Each project gets its own fresh [`RunContext`]. Non-empty `patterns`
/// keep only paths containing at least one of them.
pub fn discover_tests(projects: &[ProjectConfig], patterns: &[String]) -> Vec<TestDescriptor> {
    let mut tests = Vec::new();

    for project in projects {
        let context = Arc::new(RunContext::new(project.clone()));
        let files: BTreeSet<_> = project
            .root_paths()
            .iter()
            .flat_map(|root| walk_files(root))
            .filter(|path| project.is_test_file(path))
            .filter(|path| matches_patterns(&path.to_string_lossy(), patterns))
            .collect();

        debug!("Project '{}': {} test files", project.name, files.len());
        tests.extend(
            files
                .into_iter()
                .map(|path| TestDescriptor::new(context.clone(), path)),
        );
    }

    tests
}

fn matches_patterns(path: &str, patterns: &[String]) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| path.contains(p.as_str()))
}
