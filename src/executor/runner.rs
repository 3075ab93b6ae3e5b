//! Test run orchestration
//!
//! [`TestRunner`] decides whether a batch of test files runs in-band, one
//! after the other inside this process, or fans out over a [`WorkerPool`].
//! Either way every file goes through `on_start` then `on_result`, and the
//! run-wide [`TestWatcher`] is consulted before anything new is dispatched.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::command::CommandExecutor;
use super::pool::{PoolOptions, ProcessPool, WorkerEntry, WorkerPool};
use super::watcher::TestWatcher;
use super::worker::TestExecutor;
use crate::config::GlobalConfig;
use crate::models::{AggregatedResults, TestDescriptor, TestResult, TestStatus, WorkItem};
use crate::reporter::{Reporter, ReporterDispatcher, ReporterId, RunEvent, RunStartInfo};
use crate::utils::timer::Timer;

/// Tests that took longer than this last time are worth a worker
const SLOW_TEST_TIME_MS: u64 = 3000;

/// Largest batch of fast tests still run in-band
const IN_BAND_TEST_LIMIT: usize = 20;

/// Extra time a worker gets on top of the test timeout before it is replaced
const WORKER_TIMEOUT_SLACK_SECS: u64 = 30;

pub type OnStart = Arc<dyn Fn(&TestDescriptor) -> Result<()> + Send + Sync>;
pub type OnResult = Arc<dyn Fn(&TestDescriptor, TestResult) -> Result<()> + Send + Sync>;

/// Orchestrator for one or more test runs
pub struct TestRunner {
    global_config: Arc<GlobalConfig>,
    max_workers: usize,
    dispatcher: Arc<Mutex<ReporterDispatcher>>,
    executor: Arc<dyn TestExecutor>,
    pool: Option<Arc<dyn WorkerPool>>,
}

impl TestRunner {
    pub fn new(global_config: GlobalConfig, max_workers: usize) -> Self {
        Self {
            global_config: Arc::new(global_config),
            max_workers: max_workers.max(1),
            dispatcher: Arc::new(Mutex::new(ReporterDispatcher::new())),
            executor: Arc::new(CommandExecutor::new()),
            pool: None,
        }
    }

    /// Use an existing pool instead of starting one per run.
    ///
    /// The caller keeps ownership: the runner never shuts it down.
    pub fn with_pool(mut self, pool: Arc<dyn WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Executor for in-band runs
    pub fn with_executor(mut self, executor: Arc<dyn TestExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn global_config(&self) -> &GlobalConfig {
        &self.global_config
    }

    pub fn add_reporter(&self, reporter: Box<dyn Reporter>) -> ReporterId {
        self.dispatcher.lock().add(reporter)
    }

    pub fn remove_reporter(&self, id: ReporterId) -> bool {
        self.dispatcher.lock().remove(id)
    }

    /// Whether a batch is cheaper to run inside this process
    pub fn should_run_in_band(&self, tests: &[TestDescriptor]) -> bool {
        if self.max_workers <= 1 || tests.len() <= 1 {
            return true;
        }

        tests.len() <= IN_BAND_TEST_LIMIT
            && tests
                .iter()
                .all(|t| t.duration_ms.is_some_and(|d| d < SLOW_TEST_TIME_MS))
    }

    /// Run `tests`, calling `on_start` and `on_result` for each one.
    ///
    /// Resolves once every dispatched file settled, or as soon as `watcher`
    /// is interrupted. Files already handed to a worker at that point keep
    /// running and still report through `on_result`; nothing new starts.
    pub async fn run(
        &self,
        tests: Vec<TestDescriptor>,
        watcher: &TestWatcher,
        on_start: OnStart,
        on_result: OnResult,
    ) -> Result<()> {
        if tests.is_empty() {
            return Ok(());
        }

        if self.should_run_in_band(&tests) {
            debug!("Running {} test files in band", tests.len());
            return self
                .create_in_band_run(tests, watcher, &on_start, &on_result)
                .await;
        }

        debug!(
            "Running {} test files on {} workers",
            tests.len(),
            self.max_workers
        );

        if let Some(pool) = &self.pool {
            return self
                .create_parallel_run(tests, watcher, pool.clone(), on_start, on_result)
                .await;
        }

        let pool: Arc<dyn WorkerPool> = Arc::new(self.spawn_pool()?);
        let outcome = self
            .create_parallel_run(tests, watcher, pool.clone(), on_start, on_result)
            .await;

        if watcher.is_interrupted() {
            // Abandoned items may still be running.
            tokio::spawn(async move { pool.shutdown().await });
        } else {
            pool.shutdown().await;
        }
        outcome
    }

    async fn create_in_band_run(
        &self,
        tests: Vec<TestDescriptor>,
        watcher: &TestWatcher,
        on_start: &OnStart,
        on_result: &OnResult,
    ) -> Result<()> {
        let total = tests.len();

        for (index, test) in tests.into_iter().enumerate() {
            if watcher.is_interrupted() {
                debug!("Interrupted, {} test files not started", total - index);
                break;
            }

            let item = WorkItem::build(&test, &self.global_config);
            on_start(&test)?;

            let result = match self.executor.execute(&item).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Failed to run {}: {:#}", test, e);
                    TestResult::exec_error(test.path.clone(), format!("{e:#}"))
                }
            };
            on_result(&test, result)?;
        }

        Ok(())
    }

    async fn create_parallel_run(
        &self,
        tests: Vec<TestDescriptor>,
        watcher: &TestWatcher,
        pool: Arc<dyn WorkerPool>,
        on_start: OnStart,
        on_result: OnResult,
    ) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::with_capacity(tests.len());

        for test in tests {
            let item = WorkItem::build(&test, &self.global_config);
            let permits = permits.clone();
            let watcher = watcher.clone();
            let pool = pool.clone();
            let on_start = on_start.clone();
            let on_result = on_result.clone();

            handles.push(tokio::spawn(async move {
                let Ok(permit) = permits.acquire_owned().await else {
                    return Ok(());
                };
                if watcher.is_interrupted() {
                    return Ok(());
                }

                on_start(&test)?;
                let result = match pool.submit(item).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("{} failed in worker: {}", test, e);
                        TestResult::exec_error(test.path.clone(), e.to_string())
                    }
                };
                drop(permit);

                on_result(&test, result)
            }));
        }

        let settled = async {
            for handle in handles {
                handle.await.context("Test task panicked")??;
            }
            Ok::<_, anyhow::Error>(())
        };

        tokio::select! {
            outcome = settled => outcome,
            _ = watcher.interrupted() => {
                debug!("Run interrupted, no longer waiting for dispatched test files");
                Ok(())
            }
        }
    }

    /// Run `tests` and aggregate their results through the reporters.
    ///
    /// With `bail` set the first failing file interrupts `watcher`. Results
    /// arriving after an interruption are dropped.
    pub async fn run_tests(
        &self,
        tests: Vec<TestDescriptor>,
        watcher: &TestWatcher,
    ) -> Result<AggregatedResults> {
        let timer = Timer::start("test run");
        debug!(
            "Starting run of {} test files (watch mode: {})",
            tests.len(),
            watcher.is_watch_mode()
        );
        let info = RunStartInfo {
            estimated_time_secs: estimated_time_secs(&tests, self.max_workers),
            show_status: !self.should_run_in_band(&tests),
        };
        let aggregated = Arc::new(Mutex::new(AggregatedResults::new(tests.len())));

        {
            let results = aggregated.lock();
            self.dispatcher.lock().dispatch(RunEvent::RunStart {
                results: &results,
                info: &info,
            })?;
        }

        let on_start: OnStart = {
            let dispatcher = self.dispatcher.clone();
            Arc::new(move |test: &TestDescriptor| {
                dispatcher.lock().dispatch(RunEvent::TestStart { test })
            })
        };

        let on_result: OnResult = {
            let dispatcher = self.dispatcher.clone();
            let aggregated = aggregated.clone();
            let watcher = watcher.clone();
            let bail = self.global_config.bail;

            Arc::new(move |test: &TestDescriptor, result: TestResult| {
                if watcher.is_interrupted() {
                    debug!("Ignoring result for {} after interruption", test);
                    return Ok(());
                }

                let failed = matches!(result.status, TestStatus::Fail | TestStatus::Error);
                let mut results = aggregated.lock();
                results.add(result.clone());
                dispatcher.lock().dispatch(RunEvent::TestResult {
                    test,
                    result: &result,
                    results: &results,
                })?;

                if bail && failed {
                    info!("Bailing out after {} failed", test);
                    watcher.set_interrupted();
                }
                Ok(())
            })
        };

        self.run(tests, watcher, on_start, on_result).await?;

        let mut results = {
            let mut results = aggregated.lock();
            results.was_interrupted = watcher.is_interrupted();
            results.success = !results.has_failures();
            results.clone()
        };

        let mut dispatcher = self.dispatcher.lock();
        dispatcher.dispatch(RunEvent::RunComplete { results: &results })?;
        // Reporters may only notice their own failures while completing.
        results.success &= !dispatcher.has_errors();
        drop(dispatcher);

        info!(
            "Ran {}/{} test files in {}ms",
            results.num_completed(),
            results.num_total_test_suites,
            timer.stop()
        );
        Ok(results)
    }

    /// Process pool sized for this runner, running this binary's `worker`
    pub fn spawn_pool(&self) -> Result<ProcessPool> {
        let entry = WorkerEntry::current_exe().context("Failed to locate worker executable")?;
        let timeout = Duration::from_secs(
            self.global_config.test_timeout_secs.max(1) + WORKER_TIMEOUT_SLACK_SECS,
        );
        Ok(ProcessPool::new(
            PoolOptions::new(self.max_workers).with_timeout(timeout),
            entry,
        ))
    }
}

/// Rough wall time from previous timings, in seconds
fn estimated_time_secs(tests: &[TestDescriptor], workers: usize) -> u64 {
    let timings: Vec<u64> = tests.iter().filter_map(|t| t.duration_ms).collect();
    let Some(slowest) = timings.iter().copied().max() else {
        return 0;
    };

    let millis = if timings.len() <= workers {
        slowest
    } else {
        (timings.iter().sum::<u64>() / workers.max(1) as u64).max(slowest)
    };
    (millis + 500) / 1000
}
