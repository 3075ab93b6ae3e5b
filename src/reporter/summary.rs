//! End-of-run totals

use anyhow::{Context, Result};
use std::io::Write;

use super::{paint, Reporter};
use crate::models::{AggregatedResults, TestStatus};

/// Prints failures and totals once the run completes
pub struct SummaryReporter {
    writer: Box<dyn Write + Send>,
    colorize: bool,
}

impl SummaryReporter {
    pub fn new(writer: Box<dyn Write + Send>, colorize: bool) -> Self {
        Self { writer, colorize }
    }

    pub fn stderr(colorize: bool) -> Self {
        Self::new(Box::new(std::io::stderr()), colorize)
    }

    /// Format the aggregated results of a run
    pub fn format_summary(&self, results: &AggregatedResults) -> String {
        let mut output = String::new();

        let failed: Vec<_> = results
            .test_results
            .iter()
            .filter(|r| matches!(r.status, TestStatus::Fail | TestStatus::Error))
            .collect();
        if !failed.is_empty() {
            output.push_str("\nFailed test files:\n");
            for result in failed {
                output.push_str(&format!(
                    "  {} {}\n",
                    paint(result.status.symbol(), "31", self.colorize),
                    result.path.display()
                ));
            }
        }

        let pass_str = paint(
            &results.num_passed_test_suites.to_string(),
            "32",
            self.colorize,
        );
        let fail_count = results.num_failed_test_suites + results.num_runtime_error_test_suites;
        let fail_str = if fail_count > 0 {
            paint(&fail_count.to_string(), "31", self.colorize)
        } else {
            fail_count.to_string()
        };

        output.push_str(&format!(
            "\nTest files: {} passed, {} failed, {} skipped, {} total\n",
            pass_str, fail_str, results.num_skipped_test_suites, results.num_total_test_suites
        ));
        output.push_str(&format!(
            "Time:       {:.3}s\n",
            results.total_duration_ms as f64 / 1000.0
        ));
        if results.was_interrupted {
            output.push_str(&paint("Run interrupted\n", "33", self.colorize));
        }

        output
    }
}

impl Reporter for SummaryReporter {
    fn on_run_complete(&mut self, results: &AggregatedResults) -> Result<()> {
        let summary = self.format_summary(results);
        write!(self.writer, "{summary}").context("Failed to write summary")?;
        self.writer.flush().context("Failed to flush summary")
    }
}
