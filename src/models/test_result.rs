//! Test result models
//!
//! Defines per-file results, status types and run-wide aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Test execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    /// The file could not be executed at all (worker crash, spawn failure)
    Error,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pass => "✓",
            TestStatus::Fail => "✗",
            TestStatus::Skip => "○",
            TestStatus::Error => "!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Pass)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "PASS"),
            TestStatus::Fail => write!(f, "FAIL"),
            TestStatus::Skip => write!(f, "SKIP"),
            TestStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of running one test file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub path: PathBuf,
    pub status: TestStatus,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub message: Option<String>,
    /// Captured stdout/stderr of the test process
    #[serde(default)]
    pub output: Option<String>,
}

impl TestResult {
    pub fn pass(path: impl Into<PathBuf>, duration_ms: u64) -> Self {
        Self {
            path: path.into(),
            status: TestStatus::Pass,
            duration_ms,
            message: None,
            output: None,
        }
    }

    pub fn fail(path: impl Into<PathBuf>, duration_ms: u64, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: TestStatus::Fail,
            duration_ms,
            message: Some(message.into()),
            output: None,
        }
    }

    #[cfg(test)]
    pub fn skip(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: TestStatus::Skip,
            duration_ms: 0,
            message: Some(reason.into()),
            output: None,
        }
    }

    /// The file never produced a result of its own
    pub fn exec_error(path: impl Into<PathBuf>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: TestStatus::Error,
            duration_ms: 0,
            message: Some(error.into()),
            output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        if !output.is_empty() {
            self.output = Some(output);
        }
        self
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.path.display(),
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Run-wide aggregation of test file results
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AggregatedResults {
    pub start_time: DateTime<Utc>,
    /// Test files scheduled for this run
    pub num_total_test_suites: usize,
    pub num_passed_test_suites: usize,
    pub num_failed_test_suites: usize,
    pub num_skipped_test_suites: usize,
    pub num_runtime_error_test_suites: usize,
    pub total_duration_ms: u64,
    pub test_results: Vec<TestResult>,
    pub was_interrupted: bool,
    pub success: bool,
}

impl AggregatedResults {
    pub fn new(num_total_test_suites: usize) -> Self {
        Self {
            start_time: Utc::now(),
            num_total_test_suites,
            num_passed_test_suites: 0,
            num_failed_test_suites: 0,
            num_skipped_test_suites: 0,
            num_runtime_error_test_suites: 0,
            total_duration_ms: 0,
            test_results: Vec::new(),
            was_interrupted: false,
            success: false,
        }
    }

    pub fn add(&mut self, result: TestResult) {
        match result.status {
            TestStatus::Pass => self.num_passed_test_suites += 1,
            TestStatus::Fail => self.num_failed_test_suites += 1,
            TestStatus::Skip => self.num_skipped_test_suites += 1,
            TestStatus::Error => self.num_runtime_error_test_suites += 1,
        }
        self.total_duration_ms += result.duration_ms;
        self.test_results.push(result);
    }

    pub fn num_completed(&self) -> usize {
        self.test_results.len()
    }

    pub fn has_failures(&self) -> bool {
        self.num_failed_test_suites > 0 || self.num_runtime_error_test_suites > 0
    }

    pub fn pass_rate(&self) -> f64 {
        let completed = self.num_completed();
        if completed == 0 {
            0.0
        } else {
            (self.num_passed_test_suites as f64 / completed as f64) * 100.0
        }
    }
}

impl fmt::Display for AggregatedResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Test files: {} | Pass: {} | Fail: {} | Skip: {} | Error: {}",
            self.num_total_test_suites,
            self.num_passed_test_suites,
            self.num_failed_test_suites,
            self.num_skipped_test_suites,
            self.num_runtime_error_test_suites
        )?;
        write!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )?;
        if self.was_interrupted {
            write!(f, " | interrupted")?;
        }
        writeln!(f)
    }
}
