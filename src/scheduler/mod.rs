//! Polling scheduler.
//!
//! The [`Scheduler`] is a registry of timer tasks, one per started target.
//! Each task calls [`PollTarget::poll`] once per interval until stopped.
//!
//! Starting the same target twice creates two independent entries. Stopping
//! removes every matching entry from the registry at once; each entry's task
//! then either exits immediately ([`StopMode::Now`]) or finishes a number of
//! further ticks first ([`StopMode::After`]).

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::effects::GitInterpreter;
use crate::git::GitError;
use crate::repo::{PullOutcome, Repository};
use crate::types::RepoId;

/// Something the scheduler can poll on a fixed interval.
pub trait PollTarget: Send + Sync + 'static {
    /// Identity used to stop entries.
    fn poll_id(&self) -> &RepoId;

    /// Time between polls; zero disables polling.
    fn poll_interval(&self) -> Duration;

    /// Runs one poll. Failures are the target's to report.
    fn poll(&self) -> impl Future<Output = ()> + Send;
}

impl<G> PollTarget for Repository<G>
where
    G: GitInterpreter<Error = GitError> + Send + Sync + 'static,
{
    fn poll_id(&self) -> &RepoId {
        self.id()
    }

    fn poll_interval(&self) -> Duration {
        self.config().interval
    }

    async fn poll(&self) {
        match self.pull().await {
            Ok(PullOutcome::Updated {
                actions: Err(e), ..
            }) => {
                error!(repo = %self.id(), error = %e, "Post-sync actions failed");
            }
            Ok(_) => {}
            Err(e) => error!(repo = %self.id(), error = %e, "Scheduled pull failed"),
        }
    }
}

/// How a stopped entry winds down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Run this many more ticks, then exit.
    After(u32),
    /// Exit without another tick.
    Now,
}

impl StopMode {
    /// Maps a tick count to a mode: negative means immediately.
    ///
    /// # Examples
    ///
    /// ```
    /// use gitsync::scheduler::StopMode;
    ///
    /// assert_eq!(StopMode::from_ticks(2), StopMode::After(2));
    /// assert_eq!(StopMode::from_ticks(-1), StopMode::Now);
    /// ```
    pub fn from_ticks(n: i64) -> Self {
        match u32::try_from(n) {
            Ok(n) => StopMode::After(n),
            Err(_) if n < 0 => StopMode::Now,
            Err(_) => StopMode::After(u32::MAX),
        }
    }
}

struct Entry {
    id: RepoId,
    stop: oneshot::Sender<StopMode>,
    task: JoinHandle<()>,
}

/// Registry of active polling entries.
#[derive(Default)]
pub struct Scheduler {
    entries: Mutex<Vec<Entry>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts polling `target`.
    ///
    /// Returns false, adding nothing, if the target's interval is zero.
    pub fn start<T: PollTarget>(&self, target: Arc<T>) -> bool {
        let interval = target.poll_interval();
        if interval.is_zero() {
            debug!(repo = %target.poll_id(), "Polling disabled");
            return false;
        }

        let id = target.poll_id().clone();
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_entry(target, interval, stop_rx));
        info!(repo = %id, interval_secs = interval.as_secs(), "Started polling");
        self.lock().push(Entry { id, stop, task });
        true
    }

    /// Stops every entry for `id` and removes them from the registry.
    ///
    /// Returns how many entries were stopped.
    pub fn stop(&self, id: &RepoId, mode: StopMode) -> usize {
        let stopped: Vec<Entry> = {
            let mut entries = self.lock();
            let (matching, rest) = entries.drain(..).partition(|e| &e.id == id);
            *entries = rest;
            matching
        };

        for entry in &stopped {
            debug!(repo = %entry.id, ?mode, "Stopping polling");
        }
        let count = stopped.len();
        for entry in stopped {
            // The task may already be gone if it panicked.
            let _ = entry.stop.send(mode);
        }
        count
    }

    /// Stops every entry immediately and waits for the tasks to exit.
    pub async fn shutdown(&self) {
        let entries: Vec<Entry> = self.lock().drain(..).collect();
        for entry in entries {
            let _ = entry.stop.send(StopMode::Now);
            if let Err(e) = entry.task.await {
                warn!(repo = %entry.id, error = %e, "Polling task panicked");
            }
        }
    }

    /// Number of active entries.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Number of active entries for `id`.
    pub fn count_for(&self, id: &RepoId) -> usize {
        self.lock().iter().filter(|e| &e.id == id).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One entry's timer loop. The first poll happens one interval after start.
async fn run_entry<T: PollTarget>(
    target: Arc<T>,
    interval: Duration,
    mut stop: oneshot::Receiver<StopMode>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut remaining: Option<u32> = None;

    loop {
        if remaining == Some(0) {
            break;
        }
        tokio::select! {
            biased;
            mode = &mut stop, if remaining.is_none() => match mode {
                Ok(StopMode::After(n)) => remaining = Some(n),
                // A dropped sender means the scheduler itself is gone.
                Ok(StopMode::Now) | Err(_) => break,
            },
            _ = ticker.tick() => {
                target.poll().await;
                if let Some(n) = remaining.as_mut() {
                    *n -= 1;
                }
            }
        }
    }
    debug!(repo = %target.poll_id(), "Polling stopped");
}
