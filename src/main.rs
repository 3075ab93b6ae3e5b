//! testfarm - parallel test file runner
//!
//! Discovers test files, decides whether to run them in this process or
//! across a pool of worker processes, and reports progress through
//! pluggable reporters. Watch mode reruns on file changes.
//!
//! ## Usage
//!
//! ```bash
//! # Run every test file
//! testfarm run
//!
//! # Only files matching a pattern, on 4 workers
//! testfarm run math -w 4
//!
//! # Rerun on change
//! testfarm run --watch
//!
//! # Rebuild packages/*/src into packages/*/build on change
//! testfarm watch-build --build-cmd node scripts/build.js
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

mod cli;
mod config;
mod executor;
mod models;
mod reporter;
mod utils;
mod watch;

use cli::{Args, Command, ListArgs, RunArgs, WatchBuildArgs};
use config::{resolve_max_workers, ConfigFile, EnvConfig};
use executor::{
    discover_tests, rerun_on_changes, run_once, run_worker, CommandExecutor, TestRunner,
    TestSequencer, TestWatcher, WorkerPool,
};
use models::AggregatedResults;
use reporter::ReporterOptions;
use utils::logger::{init_logger, LogLevel};
use watch::{BuildCommand, ChangeDebouncer, SourceRoot};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let env = EnvConfig::load();
    init_logger(LogLevel::resolve(args.verbose, env.log.as_deref()));

    match dispatch(args, env).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(args: Args, env: EnvConfig) -> Result<ExitCode> {
    if env.has_any() {
        debug!("Environment overrides: {:?}", env);
    }

    match args.command {
        Command::Worker => {
            run_worker(&CommandExecutor::new()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(run_args) => {
            let config = load_config(args.config, &env)?;
            run_tests(config, run_args, &env, args.verbose).await
        }
        Command::List(list_args) => {
            let config = load_config(args.config, &env)?;
            list_tests(&config, list_args)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::WatchBuild(build_args) => {
            let config = load_config(args.config, &env)?;
            watch_build(&config, build_args).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Config file with environment overrides applied
fn load_config(path: Option<PathBuf>, env: &EnvConfig) -> Result<ConfigFile> {
    let path = path.or_else(|| env.config_file.clone());
    let mut config = ConfigFile::load_or_default(path.as_deref())?;

    if let Some(max_workers) = env.max_workers {
        config.run.max_workers = Some(max_workers);
    }
    if let Some(cache_dir) = &env.cache_dir {
        config.run.cache_directory = Some(cache_dir.clone());
    }
    config.run.bail = env.bail_or(config.run.bail);

    Ok(config)
}

async fn run_tests(
    mut config: ConfigFile,
    args: RunArgs,
    env: &EnvConfig,
    verbose: bool,
) -> Result<ExitCode> {
    config.validate_runnable()?;
    if let Some(timeout) = args.timeout {
        config.run.test_timeout_secs = timeout;
    }
    config.run.bail |= args.bail;

    let watch = args.watch || env.watch_or(false);
    let max_workers = resolve_max_workers(
        args.requested_workers().or(config.run.max_workers),
        watch,
    );
    let root_dir = std::env::current_dir().context("Failed to read current directory")?;
    let mut global = config.global_config(root_dir, watch);
    global.verbose = verbose;

    let mut runner = TestRunner::new(global, max_workers);
    let pool = if watch {
        let pool: Arc<dyn WorkerPool> = Arc::new(runner.spawn_pool()?);
        runner = runner.with_pool(pool.clone());
        Some(pool)
    } else {
        None
    };

    let options = ReporterOptions {
        colorize: std::io::stderr().is_terminal(),
        verbose,
        output: args.output.clone(),
    };
    let names = if args.reporter.is_empty() {
        config.run.reporters.clone()
    } else {
        args.reporter.clone()
    };
    for name in &names {
        runner.add_reporter(reporter::from_name(name, &options)?);
    }

    let mut sequencer = TestSequencer::new(config.run.cache_dir());

    let Some(pool) = pool else {
        let results = run_once(
            &runner,
            &mut sequencer,
            &config.projects,
            &args.patterns,
            &TestWatcher::new(false),
        )
        .await?;
        return Ok(exit_code(&results));
    };

    let success = watch_session(&runner, &mut sequencer, &config, &args.patterns).await;
    pool.shutdown().await;
    Ok(if success? {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Watch the project roots and rerun on every batch of changes until Ctrl-C.
///
/// Returns whether the last completed run succeeded.
async fn watch_session(
    runner: &TestRunner,
    sequencer: &mut TestSequencer,
    config: &ConfigFile,
    patterns: &[String],
) -> Result<bool> {
    let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();

    let roots = config
        .projects
        .iter()
        .flat_map(|p| p.root_paths())
        .map(SourceRoot::new)
        .collect();
    let mut debouncer = ChangeDebouncer::new(roots);
    if let Some(build) = BuildCommand::from_parts(&config.watch.build_command) {
        debouncer = debouncer.with_rebuild(Box::new(build));
    }

    let handle = watch::spawn(
        debouncer,
        Duration::from_millis(config.watch.interval_ms.max(1)),
        move |batch| {
            let _ = batch_tx.send(batch);
        },
    )
    .context("Failed to start file watcher")?;

    let success = rerun_on_changes(
        runner,
        sequencer,
        &config.projects,
        patterns,
        &mut batch_rx,
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        },
    )
    .await;

    info!("Stopping watch mode");
    tokio::task::spawn_blocking(move || handle.stop())
        .await
        .context("Watch thread did not stop cleanly")?;
    Ok(success)
}

fn list_tests(config: &ConfigFile, args: ListArgs) -> Result<()> {
    let tests = discover_tests(&config.projects, &args.patterns);

    if args.json {
        let paths: Vec<_> = tests.iter().map(|t| &t.path).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&paths).context("Failed to encode test list")?
        );
    } else {
        for test in &tests {
            println!("{}", test.path.display());
        }
    }

    info!("{} test files", tests.len());
    Ok(())
}

async fn watch_build(config: &ConfigFile, args: WatchBuildArgs) -> Result<()> {
    let packages_dir = args
        .packages
        .unwrap_or_else(|| config.watch.packages_dir.clone());
    let command = if args.build_cmd.is_empty() {
        config.watch.build_command.clone()
    } else {
        args.build_cmd
    };
    let build = BuildCommand::from_parts(&command)
        .context("No build command. Pass --build-cmd or set watch.build_command")?;

    let roots = SourceRoot::packages(&packages_dir);
    if roots.is_empty() {
        anyhow::bail!(
            "No packages with a src directory under {}",
            packages_dir.display()
        );
    }
    info!("Watching {} packages", roots.len());

    let interval = Duration::from_millis(args.interval.unwrap_or(config.watch.interval_ms).max(1));
    let handle = watch::spawn(
        ChangeDebouncer::new(roots).with_rebuild(Box::new(build)),
        interval,
        |batch| debug!("Rebuilt {} files", batch.len()),
    )
    .context("Failed to start file watcher")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tokio::task::spawn_blocking(move || handle.stop())
        .await
        .context("Watch thread did not stop cleanly")?;
    Ok(())
}

fn exit_code(results: &AggregatedResults) -> ExitCode {
    if results.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
