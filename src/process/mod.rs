//! External process execution.
//!
//! Two synchronous modes live here:
//! - [`run`]: run to completion, streaming stdout and stderr to our stderr
//! - [`run_output`]: run to completion and capture trimmed stdout
//!
//! Supervised background processes (start, halt, auto-restart) live in
//! [`supervisor`].

pub mod supervisor;

use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::debug;

pub use supervisor::{BackgroundCommand, RestartPolicy};

/// Errors from running external processes.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process could not be started.
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the process failed.
    #[error("failed waiting for '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully.
    #[error("Command '{command}' failed: {status}")]
    Failed { command: String, status: ExitStatus },

    /// The process exited unsuccessfully; its stderr was captured.
    #[error("Command '{command}' failed: {status}\nstderr: {stderr}")]
    FailedWithOutput {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// A program plus its arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Extra environment variables set for the child.
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    /// Creates a command spec with no extra environment.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
        }
    }

    /// Adds an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Builds a tokio [`Command`] for this spec.
    ///
    /// The child is killed if its handle is dropped, so an abandoned
    /// supervisor never leaks a process.
    pub fn command(&self, dir: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Spawns a process whose output goes to our stderr.
pub(crate) fn spawn_streaming(spec: &CommandSpec, dir: Option<&Path>) -> Result<Child, ProcessError> {
    spec.command(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(std::io::stderr()))
        .stderr(Stdio::from(std::io::stderr()))
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            command: spec.to_string(),
            source,
        })
}

/// Runs a command to completion in the foreground.
///
/// Standard output and error of the child are both streamed to the host
/// process's stderr. Returns an error if the process cannot be started or
/// exits unsuccessfully.
pub async fn run(spec: &CommandSpec, dir: Option<&Path>) -> Result<(), ProcessError> {
    debug!(command = %spec, "Running command");
    let mut child = spawn_streaming(spec, dir)?;
    let status = child.wait().await.map_err(|source| ProcessError::Wait {
        command: spec.to_string(),
        source,
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(ProcessError::Failed {
            command: spec.to_string(),
            status,
        })
    }
}

/// Runs a command to completion and returns its trimmed stdout.
pub async fn run_output(spec: &CommandSpec, dir: Option<&Path>) -> Result<String, ProcessError> {
    debug!(command = %spec, "Running command for output");
    let output = spec
        .command(dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ProcessError::Spawn {
            command: spec.to_string(),
            source,
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(ProcessError::FailedWithOutput {
            command: spec.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script])
    }

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("echo", ["hello", "world"]);
        assert_eq!(spec.to_string(), "echo hello world");
        assert_eq!(CommandSpec::new("true", Vec::<String>::new()).to_string(), "true");
    }

    #[tokio::test]
    async fn run_succeeds_on_zero_exit() {
        run(&sh("exit 0"), None).await.unwrap();
    }

    #[tokio::test]
    async fn run_reports_nonzero_exit() {
        let err = run(&sh("exit 3"), None).await.unwrap_err();
        match err {
            ProcessError::Failed { command, status } => {
                assert_eq!(command, "sh -c exit 3");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_reports_missing_program() {
        let spec = CommandSpec::new("gitsync-no-such-program", Vec::<String>::new());
        let err = run(&spec, None).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn run_uses_working_directory() {
        let dir = tempdir().unwrap();
        run(&sh("touch marker"), Some(dir.path())).await.unwrap();
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn run_output_trims_stdout() {
        let out = run_output(&sh("printf '  abc\\n\\n'"), None).await.unwrap();
        assert_eq!(out, "abc");
    }

    #[tokio::test]
    async fn run_output_captures_stderr_on_failure() {
        let err = run_output(&sh("echo boom >&2; exit 1"), None)
            .await
            .unwrap_err();
        match err {
            ProcessError::FailedWithOutput { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn env_is_passed_to_child() {
        let spec = sh("printf %s \"$GITSYNC_TEST_VAR\"").env("GITSYNC_TEST_VAR", "value");
        assert_eq!(run_output(&spec, None).await.unwrap(), "value");
    }
}
