//! Per-file progress lines

use anyhow::{Context, Result};
use std::io::Write;

use super::{paint, Reporter, RunStartInfo};
use crate::models::{AggregatedResults, TestDescriptor, TestResult, TestStatus};

/// Prints one line per finished test file
pub struct DefaultReporter {
    writer: Box<dyn Write + Send>,
    colorize: bool,
    verbose: bool,
}

impl DefaultReporter {
    pub fn new(writer: Box<dyn Write + Send>, colorize: bool) -> Self {
        Self {
            writer,
            colorize,
            verbose: false,
        }
    }

    pub fn stderr(colorize: bool) -> Self {
        Self::new(Box::new(std::io::stderr()), colorize)
    }

    /// Also print captured output of every test file
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn status_label(&self, status: TestStatus) -> String {
        let (text, code) = match status {
            TestStatus::Pass => ("✓ PASS", "32"),
            TestStatus::Fail => ("✗ FAIL", "31"),
            TestStatus::Skip => ("○ SKIP", "33"),
            TestStatus::Error => ("! ERROR", "31"),
        };
        paint(text, code, self.colorize)
    }

    /// Format a single test result
    pub fn format_result(&self, result: &TestResult) -> String {
        let mut line = format!(
            "{} {} [{}ms]",
            self.status_label(result.status),
            result.path.display(),
            result.duration_ms
        );
        if !result.status.is_success() {
            if let Some(message) = &result.message {
                line.push_str(&format!("\n    {}", message.replace('\n', "\n    ")));
            }
        }
        line
    }
}

impl Reporter for DefaultReporter {
    fn on_run_start(&mut self, results: &AggregatedResults, info: &RunStartInfo) -> Result<()> {
        if info.show_status {
            let estimate = if info.estimated_time_secs > 0 {
                format!(" (estimated {}s)", info.estimated_time_secs)
            } else {
                String::new()
            };
            writeln!(
                self.writer,
                "Running {} test files{}",
                results.num_total_test_suites, estimate
            )
            .context("Failed to write run header")?;
        }
        Ok(())
    }

    fn on_test_result(
        &mut self,
        _test: &TestDescriptor,
        result: &TestResult,
        _results: &AggregatedResults,
    ) -> Result<()> {
        let line = self.format_result(result);
        writeln!(self.writer, "{line}").context("Failed to write test result")?;

        let show_output = self.verbose || !result.status.is_success();
        if let (true, Some(output)) = (show_output, &result.output) {
            for out_line in output.lines() {
                writeln!(self.writer, "    │ {out_line}").context("Failed to write test output")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::models::RunContext;
    use crate::reporter::testing::SharedBuffer;
    use std::sync::Arc;

    fn descriptor(path: &str) -> TestDescriptor {
        TestDescriptor::new(Arc::new(RunContext::new(ProjectConfig::default())), path)
    }

    #[test]
    fn test_format_result_plain() {
        let reporter = DefaultReporter::new(Box::new(SharedBuffer::default()), false);
        assert_eq!(
            reporter.format_result(&TestResult::pass("a.test.js", 12)),
            "✓ PASS a.test.js [12ms]"
        );
        assert_eq!(
            reporter.format_result(&TestResult::fail("b.test.js", 3, "expected 1\ngot 2")),
            "✗ FAIL b.test.js [3ms]\n    expected 1\n    got 2"
        );
    }

    #[test]
    fn test_format_result_colorized() {
        let reporter = DefaultReporter::new(Box::new(SharedBuffer::default()), true);
        let line = reporter.format_result(&TestResult::exec_error("c.test.js", "crash"));
        assert!(line.starts_with("\x1b[31m! ERROR\x1b[0m"));
    }

    #[test]
    fn test_writes_output_of_failures_only() {
        let buffer = SharedBuffer::default();
        let mut reporter = DefaultReporter::new(Box::new(buffer.clone()), false);
        let results = AggregatedResults::new(2);

        let pass = TestResult::pass("a.test.js", 1).with_output("quiet");
        let fail = TestResult::fail("b.test.js", 1, "nope").with_output("loud");
        reporter
            .on_test_result(&descriptor("a.test.js"), &pass, &results)
            .unwrap();
        reporter
            .on_test_result(&descriptor("b.test.js"), &fail, &results)
            .unwrap();

        let written = buffer.contents();
        assert!(!written.contains("quiet"));
        assert!(written.contains("    │ loud"));
    }

    #[test]
    fn test_run_header_only_with_status() {
        let buffer = SharedBuffer::default();
        let mut reporter = DefaultReporter::new(Box::new(buffer.clone()), false);
        let results = AggregatedResults::new(3);

        reporter
            .on_run_start(&results, &RunStartInfo::default())
            .unwrap();
        assert!(buffer.contents().is_empty());

        let info = RunStartInfo {
            estimated_time_secs: 4,
            show_status: true,
        };
        reporter.on_run_start(&results, &info).unwrap();
        assert_eq!(buffer.contents(), "Running 3 test files (estimated 4s)\n");
    }
}
