//! Runs a test file through the project's test command

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::worker::TestExecutor;
use crate::config::MODULE_MAP_VAR;
use crate::models::{RawModuleMap, TestResult, WorkItem};
use crate::utils::timer::Timer;

/// Placeholder replaced by the test file path
const PATH_PLACEHOLDER: &str = "{path}";

/// Lines of output kept in a failure message
const FAILURE_TAIL_LINES: usize = 20;

/// Executes a work item by spawning `config.test_command`.
///
/// Exit status 0 passes the file, anything else fails it. The module map
/// travels to the test process as JSON in `TESTFARM_MODULE_MAP`: the
/// snapshot carried by the item when present, otherwise one resolved from
/// the project roots once per project and reused afterwards.
#[derive(Debug, Default)]
pub struct CommandExecutor {
    module_maps: Mutex<HashMap<String, RawModuleMap>>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Module map for an item without a snapshot, walked once per project
    async fn project_module_map(&self, item: &WorkItem) -> Result<RawModuleMap> {
        let cached = self.module_maps.lock().get(&item.config.name).cloned();
        if let Some(raw) = cached {
            return Ok(raw);
        }

        let roots = item.config.root_paths();
        let raw = tokio::task::spawn_blocking(move || RawModuleMap::build(&roots))
            .await
            .context("Module map resolution panicked")?;

        self.module_maps
            .lock()
            .insert(item.config.name.clone(), raw.clone());
        Ok(raw)
    }

    async fn run(&self, item: &WorkItem) -> Result<TestResult> {
        let (program, args) = item.config.test_command.split_first().with_context(|| {
            format!("Project '{}' has no test_command", item.config.name)
        })?;
        let args = resolve_args(args, &item.path);

        let module_map = match &item.raw_module_map {
            Some(raw) => raw.clone(),
            None => self.project_module_map(item).await?,
        };
        let module_map_json =
            serde_json::to_string(&module_map).context("Failed to encode module map")?;

        debug!("Running {} {:?}", program, args);
        let timer = Timer::start(format!("test {}", item.path.display()));

        let child = Command::new(program)
            .args(&args)
            .current_dir(&item.config.root_dir)
            .env(MODULE_MAP_VAR, module_map_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn test command '{program}'"))?;

        let limit = Duration::from_secs(item.global_config.test_timeout_secs.max(1));
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output.context("Failed to wait for test command")?,
            Err(_) => {
                return Ok(TestResult::fail(
                    item.path.clone(),
                    timer.stop(),
                    format!("Test file timed out after {}s", limit.as_secs()),
                ));
            }
        };
        let duration_ms = timer.stop();

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));

        let result = if output.status.success() {
            TestResult::pass(item.path.clone(), duration_ms)
        } else {
            let mut message = format!("Test command exited with {}", output.status);
            let tail = tail_lines(&captured, FAILURE_TAIL_LINES);
            if !tail.is_empty() {
                message.push('\n');
                message.push_str(&tail);
            }
            TestResult::fail(item.path.clone(), duration_ms, message)
        };

        Ok(result.with_output(captured))
    }
}

impl TestExecutor for CommandExecutor {
    fn execute<'a>(&'a self, item: &'a WorkItem) -> BoxFuture<'a, Result<TestResult>> {
        Box::pin(self.run(item))
    }
}

/// Substitute `{path}` in the arguments, or append the path when absent
fn resolve_args(args: &[String], path: &Path) -> Vec<String> {
    let path = path.display().to_string();
    let mut substituted = false;

    let mut resolved: Vec<String> = args
        .iter()
        .map(|arg| {
            if arg.contains(PATH_PLACEHOLDER) {
                substituted = true;
                arg.replace(PATH_PLACEHOLDER, &path)
            } else {
                arg.clone()
            }
        })
        .collect();

    if !substituted {
        resolved.push(path);
    }
    resolved
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<_> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
