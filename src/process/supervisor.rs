//! Supervised background processes.
//!
//! A [`BackgroundCommand`] owns at most one running instance of a command.
//! Starting it again halts the previous instance and waits for it to exit
//! before the new one is spawned, so two instances never overlap.
//!
//! Each running instance has a supervising task that races the child's exit
//! against a halt token:
//!
//! - halt requested: the child is killed and supervision ends
//! - clean exit (status 0): supervision ends quietly
//! - unexpected exit: the command is restarted up to
//!   [`RestartPolicy::max_attempts`] times, [`RestartPolicy::delay`] apart
//!
//! A restart attempt counts as successful once the new process has stayed up
//! for one `delay`. A process that crashes inside that window is a failed
//! attempt, so a command that can never start cleanly is abandoned after the
//! budget instead of flapping forever. A process that survives the window
//! gets a fresh budget for its next crash.

use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{CommandSpec, ProcessError, spawn_streaming};

/// Restart budget for a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Restart attempts after an unexpected exit before giving up.
    pub max_attempts: u32,

    /// Delay between attempts, and how long a restarted process must stay
    /// up for the attempt to count as successful.
    pub delay: Duration,
}

impl RestartPolicy {
    /// Three attempts, five seconds apart.
    pub const DEFAULT: Self = Self {
        max_attempts: 3,
        delay: Duration::from_secs(5),
    };

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The currently running instance and its supervisor.
struct Running {
    halt: CancellationToken,
    task: JoinHandle<()>,
}

/// A command run in the background under supervision.
pub struct BackgroundCommand {
    spec: CommandSpec,
    policy: RestartPolicy,
    current: Mutex<Option<Running>>,
}

impl BackgroundCommand {
    /// Creates a background command with the default restart policy.
    pub fn new(spec: CommandSpec) -> Self {
        Self::with_policy(spec, RestartPolicy::DEFAULT)
    }

    pub fn with_policy(spec: CommandSpec, policy: RestartPolicy) -> Self {
        BackgroundCommand {
            spec,
            policy,
            current: Mutex::new(None),
        }
    }

    /// Returns the command this instance runs.
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Starts the command in `dir` and returns as soon as it is spawned.
    ///
    /// Any previous instance is halted first, and its termination awaited.
    pub async fn exec(&self, dir: Option<PathBuf>) -> Result<(), ProcessError> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            debug!(command = %self.spec, "Halting previous instance before restart");
            stop(previous).await;
        }

        let child = spawn_streaming(&self.spec, dir.as_deref())?;
        let halt = CancellationToken::new();
        let task = tokio::spawn(supervise(
            self.spec.clone(),
            dir,
            child,
            halt.clone(),
            self.policy,
        ));
        *current = Some(Running { halt, task });
        Ok(())
    }

    /// Kills the running instance, if any, without triggering a restart.
    pub async fn halt(&self) {
        if let Some(running) = self.current.lock().await.take() {
            stop(running).await;
        }
    }

    /// Returns true while a supervising task is alive.
    pub async fn is_running(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Waits until supervision ends on its own (clean exit or abandoned
    /// restarts).
    pub async fn wait(&self) {
        let running = self.current.lock().await.take();
        if let Some(running) = running
            && let Err(e) = running.task.await
        {
            warn!(command = %self.spec, error = %e, "Supervisor task panicked");
        }
    }
}

async fn stop(running: Running) {
    running.halt.cancel();
    if let Err(e) = running.task.await {
        warn!(error = %e, "Supervisor task panicked");
    }
}

/// Supervises one running child until halted, cleanly exited or abandoned.
async fn supervise(
    spec: CommandSpec,
    dir: Option<PathBuf>,
    mut child: Child,
    halt: CancellationToken,
    policy: RestartPolicy,
) {
    loop {
        let status = tokio::select! {
            _ = halt.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(command = %spec, error = %e, "Failed to kill process");
                }
                info!("Command '{}' terminated from within.", spec);
                return;
            }
            status = child.wait() => status,
        };

        match status {
            Ok(status) if status.success() => {
                debug!(command = %spec, "Background command exited cleanly");
                return;
            }
            Ok(status) => error!(%status, "Command '{}' terminated with error", spec),
            Err(e) => error!(error = %e, "Command '{}' terminated with error", spec),
        }

        match restart(&spec, dir.as_deref(), &halt, policy).await {
            Some(restarted) => child = restarted,
            None => return,
        }
    }
}

/// Runs the restart loop. Returns the restarted child once it is stable, or
/// `None` when halted, cleanly exited, or out of attempts.
async fn restart(
    spec: &CommandSpec,
    dir: Option<&std::path::Path>,
    halt: &CancellationToken,
    policy: RestartPolicy,
) -> Option<Child> {
    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            tokio::select! {
                _ = halt.cancelled() => return None,
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }

        info!(
            "Attempting restart {} of {} for '{}'",
            attempt, policy.max_attempts, spec
        );

        let mut child = match spawn_streaming(spec, dir) {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "Restart failed for '{}'.", spec);
                continue;
            }
        };

        tokio::select! {
            _ = halt.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(command = %spec, error = %e, "Failed to kill process");
                }
                return None;
            }
            status = child.wait() => match status {
                Ok(status) if status.success() => {
                    debug!(command = %spec, "Restarted command exited cleanly");
                    return None;
                }
                _ => warn!("Restart failed for '{}'.", spec),
            },
            _ = tokio::time::sleep(policy.delay) => {
                info!("Restart successful for '{}'.", spec);
                return Some(child);
            }
        }
    }

    error!(
        "Restart failed after {} attempts for '{}'. Ignoring...",
        policy.max_attempts, spec
    );
    None
}
