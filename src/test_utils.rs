//! Shared test utilities: a scripted git interpreter and log capture.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::fmt::MakeWriter;

use crate::config::{RemoteUrl, RepoConfig};
use crate::effects::{GitEffect, GitInterpreter, GitResponse};
use crate::git::GitError;
use crate::repo::{PostSyncAction, Repository};
use crate::types::Sha;

// ─── Fake git ───

#[derive(Default)]
struct FakeGitState {
    calls: Vec<GitEffect>,
    head: Option<Sha>,
    /// Tags in creation order; the last one is the latest.
    tags: Vec<(String, Sha)>,
    origin: Option<String>,
    /// Remaining scripted failures per effect kind.
    failures: HashMap<&'static str, u32>,
    /// Artificial latency for remote operations.
    latency: Option<Duration>,
    in_flight: u32,
    max_in_flight: u32,
}

/// A git interpreter backed by in-memory state.
///
/// Clones and pulls "fetch" whatever [`FakeGit::set_remote_head`] last set;
/// tag checkouts move HEAD to the tag's commit.
#[derive(Clone, Default)]
pub struct FakeGit {
    state: Arc<Mutex<FakeGitState>>,
    remote_head: Arc<Mutex<Option<Sha>>>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the commit the remote branch points at.
    pub fn set_remote_head(&self, sha: &str) {
        *self.remote_head.lock().unwrap() = Some(Sha::new(sha));
    }

    /// Adds a tag as the newest one.
    pub fn push_tag(&self, name: &str, sha: &str) {
        self.state
            .lock()
            .unwrap()
            .tags
            .push((name.to_string(), Sha::new(sha)));
    }

    /// Sets the origin URL reported for an existing working copy.
    pub fn set_origin(&self, url: &str) {
        self.state.lock().unwrap().origin = Some(url.to_string());
    }

    /// Makes the next `n` effects of `kind` fail.
    pub fn fail_next(&self, kind: &'static str, n: u32) {
        self.state.lock().unwrap().failures.insert(kind, n);
    }

    /// Makes remote operations take `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = Some(latency);
    }

    /// Every effect interpreted so far.
    pub fn calls(&self) -> Vec<GitEffect> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of effects of `kind` interpreted so far.
    pub fn count(&self, kind: &str) -> usize {
        self.calls().iter().filter(|e| e.kind() == kind).count()
    }

    /// Highest number of remote operations seen running at once.
    pub fn max_in_flight(&self) -> u32 {
        self.state.lock().unwrap().max_in_flight
    }
}

impl GitInterpreter for FakeGit {
    type Error = GitError;

    async fn interpret(&self, effect: GitEffect) -> Result<GitResponse, GitError> {
        let latency = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(effect.clone());
            if let Some(remaining) = state.failures.get_mut(effect.kind())
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(GitError::CommandFailed {
                    command: format!("git {}", effect.kind()),
                    stderr: "scripted failure".into(),
                });
            }
            if effect.is_remote() {
                state.in_flight += 1;
                state.max_in_flight = state.max_in_flight.max(state.in_flight);
            }
            state.latency.filter(|_| effect.is_remote())
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().unwrap();
        if effect.is_remote() {
            state.in_flight -= 1;
        }
        let response = match &effect {
            GitEffect::Clone { .. } | GitEffect::Pull { .. } => {
                state.head = self.remote_head.lock().unwrap().clone();
                GitResponse::Ok
            }
            GitEffect::FetchTags => GitResponse::Ok,
            GitEffect::DescribeLatestTag => GitResponse::Text(
                state
                    .tags
                    .last()
                    .map(|(name, _)| name.clone())
                    .unwrap_or_default(),
            ),
            GitEffect::Checkout { target } => {
                let tagged = target.strip_prefix("tags/").and_then(|name| {
                    state
                        .tags
                        .iter()
                        .find(|(tag, _)| tag == name)
                        .map(|(_, sha)| sha.clone())
                });
                state.head = Some(tagged.unwrap_or_else(|| Sha::new(target.clone())));
                GitResponse::Ok
            }
            GitEffect::HeadCommit => match &state.head {
                Some(sha) => GitResponse::Sha(sha.clone()),
                None => {
                    return Err(GitError::CommandFailed {
                        command: "git log".into(),
                        stderr: "no commits".into(),
                    });
                }
            },
            GitEffect::OriginUrl => match &state.origin {
                Some(url) => GitResponse::Text(url.clone()),
                None => {
                    return Err(GitError::CommandFailed {
                        command: "git config".into(),
                        stderr: "no origin".into(),
                    });
                }
            },
        };
        Ok(response)
    }
}

/// A repository at `path` driven by `git`, tracking `branch`.
pub fn fake_repository(
    git: FakeGit,
    path: &std::path::Path,
    branch: &str,
    actions: Vec<PostSyncAction>,
) -> Repository<FakeGit> {
    let mut config = RepoConfig::new(
        RemoteUrl::parse("https://github.com/user/site.git").unwrap(),
        path,
    );
    config.branch = crate::types::BranchSpec::parse(branch);
    Repository::new(config, git, actions)
}

// ─── Log capture ───

/// Log output captured by [`capture_logs`].
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Byte offset of the first occurrence of `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.contents().find(needle)
    }
}

pub struct CapturedWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedWriter(self.0.clone())
    }
}

/// Captures log output on the current thread until the guard is dropped.
///
/// `#[tokio::test]` runs on a current-thread runtime, so spawned tasks log
/// into the same capture.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
