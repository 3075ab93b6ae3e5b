//! Test execution engine
//!
//! Discovery, ordering, in-band and pooled execution of test files.

mod command;
mod discovery;
mod pool;
mod runner;
mod sequencer;
mod session;
mod watcher;
mod worker;

pub use command::CommandExecutor;
pub use discovery::discover_tests;
pub use pool::{PoolError, PoolOptions, ProcessPool, WorkerEntry, WorkerPool};
pub use runner::{OnResult, OnStart, TestRunner};
pub use sequencer::TestSequencer;
pub use session::{rerun_on_changes, run_once};
pub use watcher::TestWatcher;
pub use worker::{run_worker, TestExecutor, WorkerResponse};
