//! Machine-readable run results

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use super::Reporter;
use crate::models::AggregatedResults;

/// Writes the aggregated results as JSON when the run completes.
///
/// Write failures do not abort the dispatch; they are kept and surface
/// through [`Reporter::last_error`], which fails the run.
pub struct JsonReporter {
    output: Option<PathBuf>,
    last_error: Option<String>,
}

impl JsonReporter {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self {
            output,
            last_error: None,
        }
    }

    fn write(&self, results: &AggregatedResults) -> Result<()> {
        let json =
            serde_json::to_string_pretty(results).context("Failed to serialize results")?;

        match &self.output {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create directory: {}", parent.display())
                    })?;
                }
                std::fs::write(path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Results written to {}", path.display());
            }
            None => println!("{json}"),
        }
        Ok(())
    }
}

impl Reporter for JsonReporter {
    fn on_run_complete(&mut self, results: &AggregatedResults) -> Result<()> {
        self.last_error = None;
        if let Err(e) = self.write(results) {
            warn!("JSON reporter failed: {:#}", e);
            self.last_error = Some(format!("{e:#}"));
        }
        Ok(())
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }
}
