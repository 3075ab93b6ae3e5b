//! Data models for test orchestration
//!
//! This module contains all data structures used throughout the application.

mod test_result;
mod work;

pub use test_result::{AggregatedResults, TestResult, TestStatus};
pub use work::{ModuleMap, RawModuleMap, RunContext, TestDescriptor, WorkItem};
