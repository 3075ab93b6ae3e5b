//! Worker process pool
//!
//! A fixed number of slots, each owning at most one long-lived worker
//! process. Slots pull work items from one shared queue, so an item goes to
//! whichever worker is idle first. A slot whose process crashes, hangs or
//! breaks the protocol fails the in-flight item, kills the process and
//! spawns a fresh one for its next item. Shutdown kills every live
//! process and fails whatever is queued or in flight.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::worker::WorkerResponse;
use crate::models::{TestResult, WorkItem};

/// Worker-level failures; each one fails only the item it happened to
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Failed to spawn worker {slot}: {message}")]
    Spawn { slot: usize, message: String },

    #[error("Worker {slot} crashed: {message}")]
    Crashed { slot: usize, message: String },

    #[error("Worker {slot} timed out after {millis}ms")]
    Timeout { slot: usize, millis: u64 },

    #[error("Worker {slot} sent an invalid response: {message}")]
    Protocol { slot: usize, message: String },

    #[error("Worker reported an error: {0}")]
    Worker(String),

    #[error("Worker pool has been shut down")]
    ShutDown,
}

impl PoolError {
    /// Whether the worker process can no longer be trusted
    fn poisons_worker(&self) -> bool {
        matches!(
            self,
            PoolError::Crashed { .. } | PoolError::Timeout { .. } | PoolError::Protocol { .. }
        )
    }
}

/// Executes work items somewhere else and hands back their results
pub trait WorkerPool: Send + Sync {
    /// Queue an item; resolves once a worker answered for it
    fn submit(&self, item: WorkItem) -> BoxFuture<'static, Result<TestResult, PoolError>>;

    /// Kill all workers and fail pending items. Idempotent.
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}

/// Pool sizing and limits
#[derive(Clone, Debug)]
pub struct PoolOptions {
    pub max_workers: usize,
    /// Per item response deadline
    pub timeout: Option<Duration>,
}

impl PoolOptions {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How to start a worker process
#[derive(Clone, Debug)]
pub struct WorkerEntry {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerEntry {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// This binary's hidden `worker` subcommand
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec!["worker".to_string()]))
    }
}

struct Job {
    item: WorkItem,
    reply: oneshot::Sender<Result<TestResult, PoolError>>,
}

type JobQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>;

/// Pool of worker processes speaking the line protocol
pub struct ProcessPool {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    stop: watch::Sender<bool>,
    slots: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessPool {
    /// Create the pool. Must be called inside a tokio runtime.
    ///
    /// Processes are started lazily, on a slot's first item.
    pub fn new(options: PoolOptions, entry: WorkerEntry) -> Self {
        let size = options.max_workers.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue: JobQueue = Arc::new(tokio::sync::Mutex::new(receiver));
        let entry = Arc::new(entry);
        let (stop, _) = watch::channel(false);

        let slots = (0..size)
            .map(|slot| {
                tokio::spawn(slot_loop(
                    slot,
                    queue.clone(),
                    entry.clone(),
                    options.timeout,
                    stop.subscribe(),
                ))
            })
            .collect();

        debug!("Started worker pool with {} slots", size);

        Self {
            sender: Mutex::new(Some(sender)),
            stop,
            slots: Mutex::new(slots),
        }
    }
}

impl WorkerPool for ProcessPool {
    fn submit(&self, item: WorkItem) -> BoxFuture<'static, Result<TestResult, PoolError>> {
        let (reply, response) = oneshot::channel();
        let queued = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Job { item, reply }).is_ok(),
            None => false,
        };

        Box::pin(async move {
            if !queued {
                return Err(PoolError::ShutDown);
            }
            response.await.unwrap_or(Err(PoolError::ShutDown))
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            drop(self.sender.lock().take());
            self.stop.send_replace(true);
            let slots: Vec<_> = std::mem::take(&mut *self.slots.lock());
            if slots.is_empty() {
                return;
            }
            for slot in futures::future::join_all(slots).await {
                if let Err(e) = slot {
                    warn!("Worker slot ended abnormally: {}", e);
                }
            }
            debug!("Worker pool shut down");
        })
    }
}

async fn slot_loop(
    slot: usize,
    queue: JobQueue,
    entry: Arc<WorkerEntry>,
    timeout: Option<Duration>,
    mut stop: watch::Receiver<bool>,
) {
    let mut process: Option<WorkerProcess> = None;

    loop {
        let job = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            job = next_job(&queue) => job,
        };
        let Some(job) = job else { break };

        if job.reply.is_closed() {
            continue;
        }

        if process.is_none() {
            match WorkerProcess::spawn(&entry, slot) {
                Ok(worker) => process = Some(worker),
                Err(e) => {
                    warn!("{}", e);
                    let _ = job.reply.send(Err(e));
                    continue;
                }
            }
        }
        let Some(worker) = process.as_mut() else {
            continue;
        };

        let outcome = tokio::select! {
            biased;
            _ = stopped(&mut stop) => {
                let _ = job.reply.send(Err(PoolError::ShutDown));
                break;
            }
            outcome = worker.call(&job.item, timeout) => outcome,
        };
        if let Err(e) = &outcome {
            if e.poisons_worker() {
                warn!("{}; replacing worker", e);
                if let Some(worker) = process.take() {
                    worker.kill().await;
                }
            }
        }
        let _ = job.reply.send(outcome);
    }

    // Jobs still queued fail with ShutDown once the last slot drops the queue.
    if let Some(worker) = process.take() {
        if *stop.borrow() {
            worker.kill().await;
        } else {
            worker.close().await;
        }
    }
}

async fn next_job(queue: &JobQueue) -> Option<Job> {
    queue.lock().await.recv().await
}

/// Resolves once shutdown was requested or the pool is gone
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopping| *stopping).await;
}

struct WorkerProcess {
    slot: usize,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl WorkerProcess {
    fn spawn(entry: &WorkerEntry, slot: usize) -> Result<Self, PoolError> {
        let spawn_error = |message: String| PoolError::Spawn { slot, message };

        let mut child = Command::new(&entry.program)
            .args(&entry.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(format!("{}: {}", entry.program.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout not captured".to_string()))?;

        debug!("Spawned worker {} (pid {:?})", slot, child.id());

        Ok(Self {
            slot,
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn call(
        &mut self,
        item: &WorkItem,
        timeout: Option<Duration>,
    ) -> Result<TestResult, PoolError> {
        let slot = self.slot;
        let mut line = serde_json::to_string(item).map_err(|e| PoolError::Protocol {
            slot,
            message: e.to_string(),
        })?;
        line.push('\n');

        if let Err(e) = self.stdin.write_all(line.as_bytes()).await {
            return Err(self.crashed(e.to_string()));
        }
        if let Err(e) = self.stdin.flush().await {
            return Err(self.crashed(e.to_string()));
        }

        let read = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.stdout.next_line()).await {
                Ok(read) => read,
                Err(_) => {
                    return Err(PoolError::Timeout {
                        slot,
                        millis: limit.as_millis() as u64,
                    })
                }
            },
            None => self.stdout.next_line().await,
        };

        match read {
            Ok(Some(line)) => match serde_json::from_str::<WorkerResponse>(&line) {
                Ok(WorkerResponse::Result { result }) => Ok(result),
                Ok(WorkerResponse::Error { message }) => Err(PoolError::Worker(message)),
                Err(e) => Err(PoolError::Protocol {
                    slot,
                    message: format!("{e}: {line}"),
                }),
            },
            Ok(None) => Err(self.crashed("worker exited".to_string())),
            Err(e) => Err(self.crashed(e.to_string())),
        }
    }

    fn crashed(&mut self, message: String) -> PoolError {
        let message = match self.child.try_wait() {
            Ok(Some(status)) => format!("{message} ({status})"),
            _ => message,
        };
        PoolError::Crashed {
            slot: self.slot,
            message,
        }
    }

    async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("Worker {} already gone: {}", self.slot, e);
        }
    }

    /// Close stdin and give the worker a moment to exit on its own
    async fn close(self) {
        let WorkerProcess {
            slot,
            mut child,
            stdin,
            ..
        } = self;
        drop(stdin);

        match tokio::time::timeout(Duration::from_secs(1), child.wait()).await {
            Ok(Ok(status)) => debug!("Worker {} exited with {}", slot, status),
            _ => {
                let _ = child.kill().await;
                debug!("Worker {} killed on shutdown", slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalConfig, ProjectConfig};
    use crate::models::TestStatus;

    const ANSWER: &str = r#"{"type":"result","result":{"path":"answered","status":"pass","duration_ms":1}}"#;

    fn sh_worker(script: &str) -> WorkerEntry {
        WorkerEntry::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    /// Answers every item, crashes on items whose path mentions "crash"
    fn echo_worker() -> WorkerEntry {
        sh_worker(&format!(
            "while IFS= read -r line; do case \"$line\" in *crash*) exit 3;; esac; printf '%s\\n' '{ANSWER}'; done"
        ))
    }

    fn item(path: &str) -> WorkItem {
        WorkItem {
            config: ProjectConfig::default(),
            global_config: GlobalConfig::new("/repo"),
            path: path.into(),
            raw_module_map: None,
        }
    }

    #[tokio::test]
    async fn test_submit_returns_worker_result() {
        let pool = ProcessPool::new(PoolOptions::new(2), echo_worker());
        let results =
            futures::future::join_all((0..4).map(|i| pool.submit(item(&format!("{i}.test.js")))))
                .await;

        assert_eq!(results.len(), 4);
        for result in results {
            assert_eq!(result.unwrap().status, TestStatus::Pass);
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_crash_fails_only_that_item_and_worker_respawns() {
        let pool = ProcessPool::new(PoolOptions::new(1), echo_worker());

        let crashed = pool.submit(item("crash.test.js")).await;
        assert!(matches!(crashed, Err(PoolError::Crashed { slot: 0, .. })));

        let next = pool.submit(item("fine.test.js")).await.unwrap();
        assert_eq!(next.status, TestStatus::Pass);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_replaces_worker() {
        let pool = ProcessPool::new(
            PoolOptions::new(1).with_timeout(Duration::from_millis(200)),
            sh_worker(&format!(
                "while IFS= read -r line; do case \"$line\" in *slow*) sleep 5;; esac; printf '%s\\n' '{ANSWER}'; done"
            )),
        );

        let slow = pool.submit(item("slow.test.js")).await;
        assert_eq!(slow, Err(PoolError::Timeout { slot: 0, millis: 200 }));

        let next = pool.submit(item("quick.test.js")).await.unwrap();
        assert_eq!(next.status, TestStatus::Pass);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_error_response() {
        let pool = ProcessPool::new(
            PoolOptions::new(1),
            sh_worker(
                r#"while IFS= read -r line; do printf '%s\n' '{"type":"error","message":"boom"}'; done"#,
            ),
        );

        let result = pool.submit(item("a.test.js")).await;
        assert_eq!(result, Err(PoolError::Worker("boom".to_string())));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_garbage_response_is_protocol_error() {
        let pool = ProcessPool::new(
            PoolOptions::new(1),
            sh_worker("while IFS= read -r line; do echo hello; done"),
        );

        let result = pool.submit(item("a.test.js")).await;
        assert!(matches!(result, Err(PoolError::Protocol { .. })));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let pool = ProcessPool::new(
            PoolOptions::new(1),
            WorkerEntry::new("/definitely/not/a/binary", Vec::new()),
        );

        let result = pool.submit(item("a.test.js")).await;
        assert!(matches!(result, Err(PoolError::Spawn { slot: 0, .. })));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_rejects_new_items() {
        let pool = ProcessPool::new(PoolOptions::new(2), echo_worker());
        pool.submit(item("a.test.js")).await.unwrap();

        pool.shutdown().await;
        pool.shutdown().await;

        assert_eq!(pool.submit(item("b.test.js")).await, Err(PoolError::ShutDown));
    }

    #[tokio::test]
    async fn test_shutdown_kills_unresponsive_worker() {
        let pool = Arc::new(ProcessPool::new(
            PoolOptions::new(1),
            sh_worker("while IFS= read -r line; do sleep 30; done"),
        ));

        let in_flight = tokio::spawn(pool.submit(item("hang.test.js")));
        let queued = tokio::spawn(pool.submit(item("queued.test.js")));
        tokio::time::sleep(Duration::from_millis(200)).await;

        tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("shutdown should not wait for the worker");

        assert_eq!(in_flight.await.unwrap(), Err(PoolError::ShutDown));
        assert_eq!(queued.await.unwrap(), Err(PoolError::ShutDown));
    }

    #[test]
    fn test_pool_options_clamp() {
        assert_eq!(PoolOptions::new(0).max_workers, 1);
    }
}
