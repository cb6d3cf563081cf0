use crate::{config::expand_tilde, write_atomic};
use anyhow::{anyhow, Result};
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;
use std::{
    io::Write,
    path::{Path, PathBuf},
    process::Command,
    time::{Duration, Instant},
};

/// The outcome of one external invocation
#[derive(Debug, Clone)]
pub struct ToolRun {
    pub unit: String,
    pub command: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub artifact: Option<PathBuf>,
    pub elapsed: Duration,
}

/// A unit of work that did not complete
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub unit: String,
    pub exit_code: Option<i32>,
    pub message: String,
}

/// What a stage did, reported when it finishes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub stage: String,
    pub completed: usize,
    pub skipped: usize,
    pub failures: Vec<Failure>,
}

// --------------------------------------------------
/// Find an external program, expanding `~/` and searching `PATH`
pub fn resolve(program: &str) -> Result<PathBuf> {
    let path = expand_tilde(program)?;
    which::which(&path)
        .map_err(|e| anyhow!(r#"Cannot find external tool "{program}": {e}"#))
}

// --------------------------------------------------
/// Run a command to completion, capturing its output
///
/// A command that cannot be spawned is reported as a failed run so that
/// the caller can carry on with the rest of its batch.
pub fn run(unit: &str, cmd: &mut Command) -> ToolRun {
    let command = describe(cmd);
    debug!(r#"Running "{command}""#);

    let start = Instant::now();
    match cmd.output() {
        Ok(output) => ToolRun {
            unit: unit.to_string(),
            command,
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            artifact: None,
            elapsed: start.elapsed(),
        },
        Err(e) => ToolRun {
            unit: unit.to_string(),
            command,
            success: false,
            exit_code: None,
            stdout: vec![],
            stderr: format!("Failed to start: {e}"),
            artifact: None,
            elapsed: start.elapsed(),
        },
    }
}

// --------------------------------------------------
fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy())
        .join(" ")
}

// --------------------------------------------------
/// Format a duration as `HH:MM:SS`
pub fn hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

impl ToolRun {
    // --------------------------------------------------
    pub fn with_artifact(self, artifact: PathBuf) -> Self {
        ToolRun {
            artifact: Some(artifact),
            ..self
        }
    }

    // --------------------------------------------------
    pub fn failure(&self) -> Failure {
        let message = match self.stderr.trim() {
            "" => match self.exit_code {
                Some(code) => format!("exited with status {code}"),
                _ => "terminated by signal".to_string(),
            },
            stderr => stderr.to_string(),
        };

        Failure {
            unit: self.unit.clone(),
            exit_code: self.exit_code,
            message,
        }
    }
}

impl Summary {
    pub fn new(stage: &str) -> Self {
        Summary {
            stage: stage.to_string(),
            ..Default::default()
        }
    }

    // --------------------------------------------------
    /// Count a finished run as completed or failed
    pub fn record(&mut self, run: &ToolRun) {
        if run.success {
            if let Some(artifact) = &run.artifact {
                info!(r#"{}: wrote "{}" in {}"#, run.unit, artifact.display(), hms(run.elapsed));
            }
            self.completed += 1;
        } else {
            debug!(r#"Failed command: "{}""#, run.command);
            self.add_failure(run.failure());
        }
    }

    // --------------------------------------------------
    pub fn add_failure(&mut self, failure: Failure) {
        warn!("{} failed: {}", failure.unit, failure.message);
        self.failures.push(failure);
    }

    // --------------------------------------------------
    pub fn fail(&mut self, unit: &str, message: &str) {
        self.add_failure(Failure {
            unit: unit.to_string(),
            exit_code: None,
            message: message.to_string(),
        });
    }

    // --------------------------------------------------
    pub fn skip(&mut self, unit: &str) {
        info!("Skipping {unit}, output exists");
        self.skipped += 1;
    }

    // --------------------------------------------------
    pub fn report(&self) {
        info!(
            "{}: {} completed, {} skipped, {} failed",
            self.stage,
            self.completed,
            self.skipped,
            self.failures.len()
        );
        if !self.failures.is_empty() {
            warn!(
                "{}: failed units: {}",
                self.stage,
                self.failures.iter().map(|f| &f.unit).join(", ")
            );
        }
    }

    // --------------------------------------------------
    pub fn write(&self, outdir: &Path) -> Result<PathBuf> {
        let path = outdir.join(format!("{}-summary.json", self.stage));
        write_atomic(&path, |out| {
            serde_json::to_writer_pretty(&mut *out, self)?;
            writeln!(out)?;
            Ok(())
        })?;
        Ok(path)
    }
}
