//! External rebuild step

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Something that brings build outputs up to date for a batch of sources
pub trait Rebuild: Send {
    fn rebuild(&mut self, paths: &[PathBuf]) -> Result<()>;
}

/// Runs one command with the changed paths appended as arguments.
///
/// Blocks until the command exits. Stdio is inherited; a non-zero exit is
/// only logged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildCommand {
    program: String,
    args: Vec<String>,
}

impl BuildCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a configured command line into program and arguments
    pub fn from_parts(parts: &[String]) -> Option<Self> {
        let (program, args) = parts.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl Rebuild for BuildCommand {
    fn rebuild(&mut self, paths: &[PathBuf]) -> Result<()> {
        debug!("Rebuilding {} files with {}", paths.len(), self.program);

        let status = Command::new(&self.program)
            .args(&self.args)
            .args(paths)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("Failed to run build command '{}'", self.program))?;

        if !status.success() {
            warn!("Build command exited with {}", status);
        }
        Ok(())
    }
}
