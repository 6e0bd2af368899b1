//! Git operation effect types.
//!
//! These types describe the git operations the synchronizer needs, without
//! executing them. An interpreter constructed for one tracked repository
//! executes them against that repository's working copy.

use serde::{Deserialize, Serialize};

use crate::types::Sha;

/// A git operation effect.
///
/// Each variant describes one git command. Effects are repository-scoped:
/// the interpreter already knows the remote URL, the working copy path and
/// any SSH identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GitEffect {
    /// Clone the remote into the (empty) working copy directory.
    Clone {
        /// Branch to check out. `None` clones the remote's default HEAD,
        /// which is what tag-tracking mode wants.
        branch: Option<String>,
        /// Extra arguments inserted before the URL.
        args: Vec<String>,
    },

    /// Pull a branch from `origin`.
    Pull {
        /// The branch to pull.
        branch: String,
        /// Extra arguments inserted before `origin`.
        args: Vec<String>,
    },

    /// Fetch all tags from `origin`.
    FetchTags,

    /// Name the most recent tag reachable from `origin`.
    ///
    /// Responds with an empty [`GitResponse::Text`] when there are no tags.
    DescribeLatestTag,

    /// Checkout a ref or commit.
    Checkout {
        /// The target to checkout (`tags/<name>` or a SHA).
        target: String,
    },

    /// Hash of the most recent commit on HEAD.
    HeadCommit,

    /// The configured `remote.origin.url` of an existing working copy.
    OriginUrl,
}

impl GitEffect {
    /// Returns a short, stable name for this kind of effect.
    ///
    /// Used in log fields and by test interpreters to script failures.
    pub fn kind(&self) -> &'static str {
        match self {
            GitEffect::Clone { .. } => "clone",
            GitEffect::Pull { .. } => "pull",
            GitEffect::FetchTags => "fetch_tags",
            GitEffect::DescribeLatestTag => "describe_latest_tag",
            GitEffect::Checkout { .. } => "checkout",
            GitEffect::HeadCommit => "head_commit",
            GitEffect::OriginUrl => "origin_url",
        }
    }

    /// Returns true if this effect talks to the remote.
    ///
    /// Remote operations are the ones that need SSH credentials.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            GitEffect::Clone { .. } | GitEffect::Pull { .. } | GitEffect::FetchTags
        )
    }
}

/// Response from executing a git effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GitResponse {
    /// Operation completed successfully with no return value.
    Ok,

    /// A commit SHA.
    Sha(Sha),

    /// Trimmed textual output (tag name, remote URL).
    Text(String),
}
