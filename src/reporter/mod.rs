//! Run lifecycle reporting
//!
//! Reporters observe a run through four events. The [`ReporterDispatcher`]
//! fans each event out to every registered reporter, in registration order.
//! A handler error stops the fan-out for that event and is returned to the
//! caller; reporters registered after the failing one do not see the event.

mod default;
mod json;
mod summary;

pub use default::DefaultReporter;
pub use json::JsonReporter;
pub use summary::SummaryReporter;

use anyhow::Result;
use std::path::PathBuf;

use crate::models::{AggregatedResults, TestDescriptor, TestResult};

/// Extra information handed out when a run starts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStartInfo {
    /// Rough duration estimate from previous timings, in seconds
    pub estimated_time_secs: u64,
    /// Whether progress output makes sense (false for in-band runs)
    pub show_status: bool,
}

/// Observer of run lifecycle events.
///
/// Every handler defaults to a no-op, so reporters implement only what they
/// care about.
pub trait Reporter: Send {
    fn on_run_start(&mut self, _results: &AggregatedResults, _info: &RunStartInfo) -> Result<()> {
        Ok(())
    }

    fn on_test_start(&mut self, _test: &TestDescriptor) -> Result<()> {
        Ok(())
    }

    fn on_test_result(
        &mut self,
        _test: &TestDescriptor,
        _result: &TestResult,
        _results: &AggregatedResults,
    ) -> Result<()> {
        Ok(())
    }

    fn on_run_complete(&mut self, _results: &AggregatedResults) -> Result<()> {
        Ok(())
    }

    /// Error the reporter swallowed but wants to fail the run for
    fn last_error(&self) -> Option<String> {
        None
    }
}

/// Lifecycle event routed through the dispatcher
#[derive(Clone, Copy, Debug)]
pub enum RunEvent<'a> {
    RunStart {
        results: &'a AggregatedResults,
        info: &'a RunStartInfo,
    },
    TestStart {
        test: &'a TestDescriptor,
    },
    TestResult {
        test: &'a TestDescriptor,
        result: &'a TestResult,
        results: &'a AggregatedResults,
    },
    RunComplete {
        results: &'a AggregatedResults,
    },
}

/// Handle returned by [`ReporterDispatcher::add`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReporterId(u64);

/// Ordered fan-out of run events
#[derive(Default)]
pub struct ReporterDispatcher {
    reporters: Vec<(ReporterId, Box<dyn Reporter>)>,
    next_id: u64,
}

impl ReporterDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reporter at the end of the fan-out order
    pub fn add(&mut self, reporter: Box<dyn Reporter>) -> ReporterId {
        let id = ReporterId(self.next_id);
        self.next_id += 1;
        self.reporters.push((id, reporter));
        id
    }

    /// Unregister a reporter; returns whether it was present
    pub fn remove(&mut self, id: ReporterId) -> bool {
        match self.reporters.iter().position(|(rid, _)| *rid == id) {
            Some(index) => {
                self.reporters.remove(index);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn contains(&self, id: ReporterId) -> bool {
        self.reporters.iter().any(|(rid, _)| *rid == id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }

    /// Deliver one event to every reporter in order
    pub fn dispatch(&mut self, event: RunEvent<'_>) -> Result<()> {
        for (_, reporter) in &mut self.reporters {
            match event {
                RunEvent::RunStart { results, info } => reporter.on_run_start(results, info)?,
                RunEvent::TestStart { test } => reporter.on_test_start(test)?,
                RunEvent::TestResult {
                    test,
                    result,
                    results,
                } => reporter.on_test_result(test, result, results)?,
                RunEvent::RunComplete { results } => reporter.on_run_complete(results)?,
            }
        }
        Ok(())
    }

    pub fn has_errors(&self) -> bool {
        self.reporters
            .iter()
            .any(|(_, reporter)| reporter.last_error().is_some())
    }
}

/// Reporter construction options shared by the built-in reporters
#[derive(Clone, Debug, Default)]
pub struct ReporterOptions {
    pub colorize: bool,
    pub verbose: bool,
    /// Destination for the JSON reporter; stdout when unset
    pub output: Option<PathBuf>,
}

/// Build a built-in reporter by name
pub fn from_name(name: &str, options: &ReporterOptions) -> Result<Box<dyn Reporter>> {
    match name.to_lowercase().as_str() {
        "default" => Ok(Box::new(
            DefaultReporter::stderr(options.colorize).verbose(options.verbose),
        )),
        "summary" => Ok(Box::new(SummaryReporter::stderr(options.colorize))),
        "json" => Ok(Box::new(JsonReporter::new(options.output.clone()))),
        other => anyhow::bail!("Unknown reporter: {other} (expected default, summary or json)"),
    }
}

/// Paint `text` with an ANSI color when enabled
pub(crate) fn paint(text: &str, code: &str, colorize: bool) -> String {
    if colorize {
        format!("\x1b[{code}m{text}\x1b[0m")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::io::{self, Write};
    use std::sync::Arc;

    /// In-memory writer shared between a reporter and the test
    #[derive(Clone, Default)]
    pub struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Records event names with a tag, into a log shared across reporters
    pub struct RecordingReporter {
        pub tag: &'static str,
        pub log: Arc<Mutex<Vec<String>>>,
    }

    impl Reporter for RecordingReporter {
        fn on_run_start(&mut self, _: &AggregatedResults, _: &RunStartInfo) -> Result<()> {
            self.log.lock().push(format!("{}:run_start", self.tag));
            Ok(())
        }

        fn on_test_start(&mut self, test: &TestDescriptor) -> Result<()> {
            self.log
                .lock()
                .push(format!("{}:start:{}", self.tag, test.path.display()));
            Ok(())
        }

        fn on_test_result(
            &mut self,
            test: &TestDescriptor,
            result: &TestResult,
            _: &AggregatedResults,
        ) -> Result<()> {
            self.log.lock().push(format!(
                "{}:result:{}:{}",
                self.tag,
                test.path.display(),
                result.status
            ));
            Ok(())
        }

        fn on_run_complete(&mut self, _: &AggregatedResults) -> Result<()> {
            self.log.lock().push(format!("{}:run_complete", self.tag));
            Ok(())
        }
    }
}
