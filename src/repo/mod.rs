//! The repository synchronizer.
//!
//! A [`Repository`] owns one tracked repository: its configuration, its git
//! interpreter, its post-sync actions and its mutable sync state. All state
//! transitions happen under one exclusive async lock, so two syncs of the
//! same repository never overlap.
//!
//! # State machine
//!
//! ```text
//! Unprepared ──prepare──► Prepared ──clone──► Synced ◄──pull / tag checkout──┐
//!      │                                        │                            │
//!      └──prepare (matching working copy)──────►┘────────────────────────────┘
//! ```
//!
//! # Pull
//!
//! 1. Take the lock. Later callers queue behind it.
//! 2. Return [`PullOutcome::Debounced`] if the last successful sync was less
//!    than [`Repository::DEBOUNCE`] ago.
//! 3. Try the sync up to [`Repository::SYNC_ATTEMPTS`] times, back to back.
//!    Only git failures are retried.
//! 4. Compare the new HEAD with the previous one. If it moved, run the
//!    post-sync actions and report their aggregate result alongside the
//!    (successful) sync.

pub mod actions;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::RepoConfig;
use crate::effects::{GitEffect, GitInterpreter, GitResponse};
use crate::git::{GitCli, GitEnvironment, GitError};
use crate::status::{Status, StatusHub};
use crate::types::{BranchSpec, RepoId, Sha};

pub use actions::{ActionsError, PostSyncAction, run_actions};

/// Errors from synchronizing a repository.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The working copy directory could not be created.
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A different repository is checked out at the configured path.
    #[error("another git repo '{found}' exists at {path}")]
    ForeignRepository {
        found: String,
        path: std::path::PathBuf,
    },

    /// The configured path holds files but no working copy.
    #[error("cannot git clone into {path}, directory not empty.")]
    NotEmpty { path: std::path::PathBuf },

    /// The origin of an existing working copy could not be read.
    #[error("cannot retrieve repo url for {path}: {source}")]
    OriginUnreadable {
        path: std::path::PathBuf,
        #[source]
        source: GitError,
    },

    /// Tag-tracking mode found no tags on the remote.
    #[error("No tags found for Repo: {url}.")]
    NoTags { url: String },

    /// A git operation failed.
    #[error(transparent)]
    Git(#[from] GitError),
}

impl SyncError {
    /// Returns true for failures worth retrying immediately: network and
    /// authentication trouble surfaces as failed git commands.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Git(_))
    }

    /// Returns true for directory-state problems found by `prepare`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::CreateDir { .. }
                | SyncError::ForeignRepository { .. }
                | SyncError::NotEmpty { .. }
                | SyncError::OriginUnreadable { .. }
        )
    }
}

/// What a call to [`Repository::pull`] did.
#[derive(Debug)]
pub enum PullOutcome {
    /// The previous sync was too recent; nothing ran.
    Debounced,

    /// The sync succeeded but HEAD did not move; no actions ran.
    Unchanged,

    /// HEAD moved and the post-sync actions ran.
    Updated {
        /// The newly checked-out commit.
        commit: Option<Sha>,
        /// Aggregate result of the post-sync actions.
        actions: Result<(), ActionsError>,
    },
}

/// Mutable state, only ever touched under the repository lock.
#[derive(Debug, Default)]
struct SyncState {
    /// An initial clone has succeeded (or a matching working copy exists).
    pulled: bool,
    /// Monotonic time of the last successful sync, for debouncing.
    last_pull: Option<Instant>,
    /// Wall-clock time of the last successful sync, for status reporting.
    last_pull_at: Option<DateTime<Utc>>,
    /// HEAD as of the last sync; change detection compares against it.
    last_commit: Option<Sha>,
    /// HEAD found by `prepare` in an existing working copy. Reported in the
    /// status until the first sync, never used for change detection.
    found_head: Option<Sha>,
    latest_tag: Option<String>,
}

impl SyncState {
    fn snapshot(&self) -> Status {
        Status {
            active: self.pulled,
            hash: self
                .last_commit
                .as_ref()
                .or(self.found_head.as_ref())
                .map(|sha| sha.as_str().to_string())
                .unwrap_or_default(),
            last_updated: self.last_pull_at.unwrap_or_else(Status::never_updated),
        }
    }
}

/// One tracked repository.
pub struct Repository<G = GitCli> {
    config: RepoConfig,
    id: RepoId,
    git: G,
    actions: Vec<PostSyncAction>,
    state: Mutex<SyncState>,
    status: watch::Sender<Status>,
    hub: StatusHub,
}

impl Repository<GitCli> {
    /// Creates a repository driven by the git CLI.
    pub fn from_config(config: RepoConfig, env: Arc<GitEnvironment>) -> Self {
        let git = GitCli::new(
            env,
            config.url.clone(),
            config.path.clone(),
            config.key.clone(),
        );
        let actions = config.then.iter().map(PostSyncAction::from_config).collect();
        Repository::new(config, git, actions)
    }
}

impl<G> Repository<G>
where
    G: GitInterpreter<Error = GitError> + Send + Sync,
{
    /// Minimum time between two syncs.
    pub const DEBOUNCE: Duration = Duration::from_secs(5);

    /// Attempts per pull before giving up.
    pub const SYNC_ATTEMPTS: u32 = 3;

    /// Creates a repository with an explicit interpreter and actions.
    pub fn new(config: RepoConfig, git: G, actions: Vec<PostSyncAction>) -> Self {
        let id = RepoId::new(config.url.to_string());
        let state = SyncState::default();
        let (status, _) = watch::channel(state.snapshot());
        Repository {
            config,
            id,
            git,
            actions,
            state: Mutex::new(state),
            status,
            hub: StatusHub::new(),
        }
    }

    pub fn id(&self) -> &RepoId {
        &self.id
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Subscribers to this repository's status changes.
    pub fn hub(&self) -> &StatusHub {
        &self.hub
    }

    /// The current status snapshot.
    ///
    /// Reads the last published snapshot, so it never waits on a sync in
    /// progress.
    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Validates the working copy directory.
    ///
    /// - missing or empty: created, a clone will follow
    /// - a working copy of the same remote: marked as already cloned
    /// - anything else: a fatal configuration error
    pub async fn prepare(&self) -> Result<(), SyncError> {
        let path = &self.config.path;
        let mut state = self.state.lock().await;

        if is_missing_or_empty(path) {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|source| SyncError::CreateDir {
                    path: path.clone(),
                    source,
                })?;
            debug!(path = %path.display(), "Prepared empty working copy directory");
            return Ok(());
        }

        if !path.join(".git").is_dir() {
            return Err(SyncError::NotEmpty { path: path.clone() });
        }

        let mut origin = match self.git.interpret(GitEffect::OriginUrl).await {
            Ok(response) => expect_text(GitEffect::OriginUrl, response),
            Err(e) => Err(e),
        }
        .map_err(|source| SyncError::OriginUnreadable {
            path: path.clone(),
            source,
        })?;
        if !origin.ends_with(".git") {
            origin.push_str(".git");
        }

        let configured = self.config.url.to_git_string();
        if origin != configured && origin != self.config.url.to_string() {
            return Err(SyncError::ForeignRepository {
                found: origin,
                path: path.clone(),
            });
        }

        // Not `last_commit`: the first pull after a restart runs the actions.
        state.pulled = true;
        state.found_head = self.head_commit().await.ok();
        self.publish(&state);
        info!(url = %self.config.url, path = %path.display(), "Using existing working copy");
        Ok(())
    }

    /// Brings the working copy up to date with the remote.
    ///
    /// See the module docs for the debounce, retry and change-detection
    /// rules.
    pub async fn pull(&self) -> Result<PullOutcome, SyncError> {
        let mut state = self.state.lock().await;

        if let Some(last) = state.last_pull
            && last.elapsed() < Self::DEBOUNCE
        {
            debug!(url = %self.config.url, "Skipping pull inside debounce window");
            return Ok(PullOutcome::Debounced);
        }

        let previous = state.last_commit.clone();
        let mut attempt = 1;
        loop {
            match self.sync(&mut state).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < Self::SYNC_ATTEMPTS => {
                    warn!(
                        url = %self.config.url,
                        attempt,
                        error = %e,
                        "Sync attempt failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    error!(url = %self.config.url, attempt, error = %e, "Sync failed");
                    return Err(e);
                }
            }
        }

        state.last_pull = Some(Instant::now());
        state.last_pull_at = Some(Utc::now());
        self.publish(&state);

        if state.last_commit == previous {
            info!("No new changes.");
            return Ok(PullOutcome::Unchanged);
        }

        let actions = run_actions(&self.actions, &self.config.path).await;
        Ok(PullOutcome::Updated {
            commit: state.last_commit.clone(),
            actions,
        })
    }

    /// Checks out an explicit commit, bypassing change detection.
    pub async fn checkout_commit(&self, commit: &Sha) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        self.git
            .interpret(GitEffect::Checkout {
                target: commit.as_str().to_string(),
            })
            .await?;
        info!("Commit {} checkout done.", commit);

        if let Ok(head) = self.head_commit().await {
            state.last_commit = Some(head);
        }
        self.publish(&state);
        Ok(())
    }

    /// Halts every background post-sync action.
    pub async fn halt_actions(&self) {
        for action in &self.actions {
            action.halt().await;
        }
    }

    /// One sync attempt: clone, tag checkout or branch pull.
    async fn sync(&self, state: &mut SyncState) -> Result<(), SyncError> {
        if !state.pulled {
            return self.clone_repo(state).await;
        }

        match &self.config.branch {
            BranchSpec::LatestTag => self.checkout_latest_tag(state).await,
            BranchSpec::Branch(branch) => {
                self.git
                    .interpret(GitEffect::Pull {
                        branch: branch.clone(),
                        args: self.config.pull_args.clone(),
                    })
                    .await?;
                info!("{} pulled.", self.config.url);
                state.last_commit = Some(self.head_commit().await?);
                Ok(())
            }
        }
    }

    async fn clone_repo(&self, state: &mut SyncState) -> Result<(), SyncError> {
        self.git
            .interpret(GitEffect::Clone {
                branch: self.config.branch.branch().map(str::to_string),
                args: self.config.clone_args.clone(),
            })
            .await?;
        state.pulled = true;
        info!("{} pulled.", self.config.url);
        state.last_commit = Some(self.head_commit().await?);

        if self.config.branch.is_latest_tag() {
            self.checkout_latest_tag(state).await?;
        }
        Ok(())
    }

    async fn checkout_latest_tag(&self, state: &mut SyncState) -> Result<(), SyncError> {
        self.git.interpret(GitEffect::FetchTags).await?;
        let response = self.git.interpret(GitEffect::DescribeLatestTag).await?;
        let tag = expect_text(GitEffect::DescribeLatestTag, response)?;

        if tag.is_empty() {
            warn!("No tags found for Repo: {}", self.config.url);
            return Err(SyncError::NoTags {
                url: self.config.url.to_string(),
            });
        }
        if state.latest_tag.as_deref() == Some(tag.as_str()) {
            info!("No new tags.");
            return Ok(());
        }

        self.git
            .interpret(GitEffect::Checkout {
                target: format!("tags/{tag}"),
            })
            .await?;
        state.last_commit = Some(self.head_commit().await?);
        info!("Tag {} checkout done.", tag);
        state.latest_tag = Some(tag);
        Ok(())
    }

    async fn head_commit(&self) -> Result<Sha, GitError> {
        match self.git.interpret(GitEffect::HeadCommit).await? {
            GitResponse::Sha(sha) => Ok(sha),
            other => Err(GitError::UnexpectedResponse {
                effect: GitEffect::HeadCommit.kind().to_string(),
                response: format!("{other:?}"),
            }),
        }
    }

    /// Publishes the current snapshot to queries and subscribers.
    fn publish(&self, state: &SyncState) {
        let snapshot = state.snapshot();
        self.status.send_replace(snapshot.clone());
        self.hub.notify(&snapshot);
    }
}

fn expect_text(effect: GitEffect, response: GitResponse) -> Result<String, GitError> {
    match response {
        GitResponse::Text(text) => Ok(text),
        other => Err(GitError::UnexpectedResponse {
            effect: effect.kind().to_string(),
            response: format!("{other:?}"),
        }),
    }
}

fn is_missing_or_empty(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}
