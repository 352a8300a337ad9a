//! Native package-manager invocations.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use log::debug;

/// Captured result of one child process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub success: bool,
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Last non-empty lines of stderr (or stdout when stderr is empty).
    pub fn detail(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().filter(|l| !l.trim().is_empty()).collect();
        let tail = &lines[lines.len().saturating_sub(20)..];
        tail.join("\n")
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Toolchain: Send + Sync {
    /// Runs `argv` to completion in `dir`.
    ///
    /// A non-zero exit is an `Ok` with `success == false`; `Err` means the
    /// program could not be started at all.
    fn run(&self, dir: &Path, argv: &[String]) -> Result<CommandOutput>;
}

/// Runs the real `npm`, `pip` and `go` binaries found on `PATH`.
pub struct NativeToolchain;

impl Toolchain for NativeToolchain {
    #[tracing::instrument(skip(self))]
    fn run(&self, dir: &Path, argv: &[String]) -> Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .context("Empty command line")?;
        debug!("Running {} in {:?}", argv.join(" "), dir);

        let output = Command::new(program)
            .args(args)
            .current_dir(dir)
            .output()
            .with_context(|| format!("Failed to execute {}", program))?;

        Ok(CommandOutput {
            success: output.status.success(),
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
