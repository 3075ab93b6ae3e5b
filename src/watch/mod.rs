//! Watch mode
//!
//! A dedicated thread owns the [`ChangeDebouncer`]. It receives notify
//! events over a channel and ticks on a fixed interval; the rebuild step and
//! the batch callback run on that thread, so they never overlap.

mod build;
mod debouncer;

pub use build::{BuildCommand, Rebuild};
pub use debouncer::{ChangeDebouncer, ChangeKind, SourceRoot};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Keeps the filesystem watcher and its scheduling thread alive
pub struct WatchHandle {
    watcher: RecommendedWatcher,
    thread: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop watching and wait for the scheduling thread to finish its tick
    pub fn stop(self) {
        // Dropping the watcher closes the event channel, which ends the loop.
        drop(self.watcher);
        if self.thread.join().is_err() {
            warn!("Watch thread panicked");
        }
    }
}

/// Start watching the debouncer's roots.
///
/// `on_batch` receives every non-empty batch after the rebuild step ran.
pub fn spawn<F>(
    mut debouncer: ChangeDebouncer,
    interval: Duration,
    mut on_batch: F,
) -> notify::Result<WatchHandle>
where
    F: FnMut(Vec<PathBuf>) + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;

    for root in debouncer.roots() {
        if root.src.is_dir() {
            watcher.watch(&root.src, RecursiveMode::Recursive)?;
            debug!("Watching {}", root.src.display());
        } else {
            debug!("Skipping missing source root {}", root.src.display());
        }
    }

    let thread = std::thread::spawn(move || {
        let mut next_tick = Instant::now() + interval;

        loop {
            if Instant::now() >= next_tick {
                if let Some(batch) = debouncer.tick() {
                    on_batch(batch);
                }
                next_tick = Instant::now() + interval;
            }

            let wait = next_tick.saturating_duration_since(Instant::now());
            match rx.recv_timeout(wait) {
                Ok(Ok(event)) => {
                    let Some(kind) = ChangeKind::from_notify(&event.kind) else {
                        continue;
                    };
                    for path in &event.paths {
                        debouncer.handle_event(kind, path);
                    }
                }
                Ok(Err(e)) => warn!("Watch error: {}", e),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("Watch loop finished");
    });

    info!("Watching for changes...");
    Ok(WatchHandle { watcher, thread })
}
