//! Single runs and the watch-mode rerun loop

use anyhow::Result;
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::discovery::discover_tests;
use super::runner::TestRunner;
use super::sequencer::TestSequencer;
use super::watcher::TestWatcher;
use crate::config::ProjectConfig;
use crate::models::AggregatedResults;

/// Discover, order, run and remember timings
pub async fn run_once(
    runner: &TestRunner,
    sequencer: &mut TestSequencer,
    projects: &[ProjectConfig],
    patterns: &[String],
    watcher: &TestWatcher,
) -> Result<AggregatedResults> {
    let tests = discover_tests(projects, patterns);
    if tests.is_empty() {
        warn!("No test files found");
    }

    let tests = sequencer.sort(tests);
    let results = runner.run_tests(tests.clone(), watcher).await?;

    if let Err(e) = sequencer.cache_results(&tests, &results) {
        warn!("Failed to save test timings: {:#}", e);
    }
    Ok(results)
}

enum SessionEvent {
    Rerun(Vec<PathBuf>),
    Stop,
}

impl From<Option<Vec<PathBuf>>> for SessionEvent {
    fn from(batch: Option<Vec<PathBuf>>) -> Self {
        match batch {
            Some(batch) => SessionEvent::Rerun(batch),
            None => SessionEvent::Stop,
        }
    }
}

/// Run, then rerun on every batch until `stop` resolves or `batches` closes.
///
/// Each run gets its own watch-mode token. A batch or stop arriving mid-run
/// interrupts that run. Returns whether the last finished run succeeded.
pub async fn rerun_on_changes<S>(
    runner: &TestRunner,
    sequencer: &mut TestSequencer,
    projects: &[ProjectConfig],
    patterns: &[String],
    batches: &mut mpsc::UnboundedReceiver<Vec<PathBuf>>,
    stop: S,
) -> bool
where
    S: Future<Output = ()>,
{
    tokio::pin!(stop);
    let mut last_success = true;

    loop {
        let watcher = TestWatcher::new(true);
        let event = {
            let run = run_once(runner, sequencer, projects, patterns, &watcher);
            tokio::pin!(run);

            tokio::select! {
                outcome = &mut run => {
                    match outcome {
                        Ok(results) => last_success = results.success,
                        Err(e) => {
                            error!("Test run failed: {:#}", e);
                            last_success = false;
                        }
                    }
                    info!("Waiting for changes...");
                    tokio::select! {
                        batch = batches.recv() => SessionEvent::from(batch),
                        _ = &mut stop => SessionEvent::Stop,
                    }
                }
                batch = batches.recv() => {
                    watcher.set_interrupted();
                    if let Err(e) = run.await {
                        debug!("Interrupted run ended with: {:#}", e);
                    }
                    SessionEvent::from(batch)
                }
                _ = &mut stop => {
                    watcher.set_interrupted();
                    if let Err(e) = run.await {
                        debug!("Interrupted run ended with: {:#}", e);
                    }
                    SessionEvent::Stop
                }
            }
        };

        match event {
            SessionEvent::Rerun(batch) => {
                info!("{} files changed, rerunning", batch.len());
            }
            SessionEvent::Stop => break,
        }
    }

    last_success
}
