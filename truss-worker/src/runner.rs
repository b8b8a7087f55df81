//! Running job commands on the local machine.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use truss_core::{JobResults, TrussError};

/// Exit status and captured lines of one finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Upload form: stderr lines as errors, stdout lines as output.
    pub fn into_results(self, command: &str) -> JobResults {
        JobResults {
            command: command.to_string(),
            errors: self.stderr,
            output: self.stdout,
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<ProcessOutput, TrussError>;
}

/// Runs commands through the platform shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ShellRunner {
    fn command(line: &str) -> Command {
        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C");
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c");
            c
        };
        command.arg(line).kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<ProcessOutput, TrussError> {
        debug!(%command, "spawning");
        let output = Self::command(command)
            .output()
            .await
            .map_err(|e| TrussError::Other(format!("could not start {command:?}: {e}")))?;

        Ok(ProcessOutput {
            status: output.status.code(),
            stdout: split_lines(&output.stdout),
            stderr: split_lines(&output.stderr),
        })
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}
