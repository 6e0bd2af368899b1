//! Effect interpreter trait.
//!
//! The synchronizer only ever talks to git through this trait, so tests can
//! swap in a scripted interpreter and the production build uses the git CLI.

use std::future::Future;

use super::git::{GitEffect, GitResponse};

/// Interprets Git effects against a local working copy.
///
/// Implementations are constructed for one tracked repository, so all
/// effects executed through a single interpreter instance operate on that
/// repository's remote and working copy.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct MockGitInterpreter {
///     head: Sha,
/// }
///
/// impl GitInterpreter for MockGitInterpreter {
///     type Error = GitError;
///
///     async fn interpret(&self, effect: GitEffect) -> Result<GitResponse, Self::Error> {
///         match effect {
///             GitEffect::HeadCommit => Ok(GitResponse::Sha(self.head.clone())),
///             _ => Ok(GitResponse::Ok),
///         }
///     }
/// }
/// ```
pub trait GitInterpreter {
    /// The error type returned by this interpreter.
    type Error;

    /// Execute a Git effect and return its response.
    fn interpret(
        &self,
        effect: GitEffect,
    ) -> impl Future<Output = Result<GitResponse, Self::Error>> + Send;
}
