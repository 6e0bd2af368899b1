//! The git command-line interpreter.
//!
//! [`GitCli`] executes [`GitEffect`]s for one tracked repository by running
//! the `git` binary found at startup. Remote operations for repositories with
//! an SSH key go through the generated scripts in [`ssh`]. Everything else
//! runs git directly with prompts disabled.

pub mod ssh;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::config::RemoteUrl;
use crate::effects::{GitEffect, GitInterpreter, GitResponse};
use crate::process::{self, CommandSpec, ProcessError};
use crate::types::Sha;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Running the process failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// A required executable is not on `PATH`.
    #[error("{0}")]
    MissingBinary(String),

    /// Writing a credential script failed.
    #[error("failed to write ssh script: {0}")]
    Script(#[source] std::io::Error),

    /// The interpreter answered with a response of the wrong shape.
    #[error("unexpected response to {effect}: {response}")]
    UnexpectedResponse { effect: String, response: String },
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Locations of the executables git invocations depend on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitEnvironment {
    /// Absolute path of the `git` binary.
    pub git: PathBuf,

    /// Shell used for generated scripts: `bash` if present, else `sh`.
    pub shell: PathBuf,
}

impl GitEnvironment {
    /// Locates `git` and a shell on `PATH`.
    pub fn detect() -> GitResult<Self> {
        let git = which::which("git").map_err(|_| {
            GitError::MissingBinary("git is required but no git binary was found in PATH".into())
        })?;
        let shell = which::which("bash")
            .or_else(|_| which::which("sh"))
            .map_err(|_| GitError::MissingBinary("either bash or sh is required".into()))?;

        debug!(git = %git.display(), shell = %shell.display(), "Detected git environment");
        Ok(GitEnvironment { git, shell })
    }
}

/// Interprets [`GitEffect`]s with the git CLI for a single repository.
#[derive(Debug, Clone)]
pub struct GitCli {
    env: Arc<GitEnvironment>,
    url: RemoteUrl,
    workdir: PathBuf,
    key: Option<PathBuf>,
}

impl GitCli {
    /// Creates an interpreter for the working copy at `workdir` tracking `url`.
    pub fn new(
        env: Arc<GitEnvironment>,
        url: RemoteUrl,
        workdir: impl Into<PathBuf>,
        key: Option<PathBuf>,
    ) -> Self {
        GitCli {
            env,
            url,
            workdir: workdir.into(),
            key,
        }
    }

    /// Returns the working copy path.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Builds the git argument list for an effect.
    fn args(&self, effect: &GitEffect) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match effect {
            GitEffect::Clone { branch, args: extra } => {
                args.push("clone".into());
                args.extend(extra.iter().cloned());
                if let Some(branch) = branch {
                    args.push("-b".into());
                    args.push(branch.clone());
                }
                args.push(self.url.to_git_string());
                args.push(self.clone_target());
            }
            GitEffect::Pull { branch, args: extra } => {
                args.push("pull".into());
                args.extend(extra.iter().cloned());
                args.push("origin".into());
                args.push(branch.clone());
            }
            GitEffect::FetchTags => {
                args.extend(["fetch", "origin", "--tags"].map(String::from));
            }
            GitEffect::DescribeLatestTag => {
                args.extend(["describe", "origin", "--abbrev=0", "--tags"].map(String::from));
            }
            GitEffect::Checkout { target } => {
                args.push("checkout".into());
                args.push("--detach".into());
                args.push(target.clone());
            }
            GitEffect::HeadCommit => {
                args.extend(["--no-pager", "log", "-n", "1", "--pretty=format:%H"].map(String::from));
            }
            GitEffect::OriginUrl => {
                args.extend(["config", "--get", "remote.origin.url"].map(String::from));
            }
        }
        args
    }

    /// Directory the command runs in. Clone runs next to the target
    /// directory; everything else runs inside the working copy.
    fn cwd(&self, effect: &GitEffect) -> PathBuf {
        match effect {
            GitEffect::Clone { .. } => self
                .workdir
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            _ => self.workdir.clone(),
        }
    }

    /// Clone target relative to the clone's [`cwd`](Self::cwd).
    fn clone_target(&self) -> String {
        match self.workdir.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.workdir.to_string_lossy().into_owned(),
        }
    }

    fn git_spec(&self, args: Vec<String>) -> CommandSpec {
        CommandSpec::new(self.env.git.to_string_lossy(), args).env("GIT_TERMINAL_PROMPT", "0")
    }

    /// Runs a command that streams its output.
    async fn run_streaming(&self, effect: &GitEffect, args: Vec<String>) -> GitResult<()> {
        let cwd = self.cwd(effect);
        match (&self.key, effect.is_remote()) {
            (Some(key), true) => {
                // Scripts are removed when `scripts` goes out of scope.
                let scripts = ssh::SshScripts::write(&self.env, self.url.host(), key, &args)?;
                process::run(&scripts.command(), Some(&cwd)).await?;
            }
            _ => process::run(&self.git_spec(args), Some(&cwd)).await?,
        }
        Ok(())
    }

    /// Runs a command and captures its trimmed stdout.
    async fn run_captured(&self, effect: &GitEffect, args: Vec<String>) -> GitResult<String> {
        let spec = self.git_spec(args);
        process::run_output(&spec, Some(&self.cwd(effect)))
            .await
            .map_err(|e| match e {
                ProcessError::FailedWithOutput { command, stderr, .. } => {
                    GitError::CommandFailed { command, stderr }
                }
                other => GitError::Process(other),
            })
    }
}

impl GitInterpreter for GitCli {
    type Error = GitError;

    async fn interpret(&self, effect: GitEffect) -> Result<GitResponse, Self::Error> {
        let args = self.args(&effect);
        debug!(effect = effect.kind(), url = %self.url, "Running git");

        match effect {
            GitEffect::Clone { .. }
            | GitEffect::Pull { .. }
            | GitEffect::FetchTags
            | GitEffect::Checkout { .. } => {
                self.run_streaming(&effect, args).await?;
                Ok(GitResponse::Ok)
            }
            GitEffect::HeadCommit => {
                let out = self.run_captured(&effect, args).await?;
                Ok(GitResponse::Sha(Sha::new(out.trim_matches('"'))))
            }
            GitEffect::OriginUrl => Ok(GitResponse::Text(self.run_captured(&effect, args).await?)),
            GitEffect::DescribeLatestTag => match self.run_captured(&effect, args).await {
                Ok(tag) => Ok(GitResponse::Text(tag)),
                // `git describe` fails outright when there is nothing to describe.
                Err(GitError::CommandFailed { stderr, .. })
                    if stderr.contains("No names found") || stderr.contains("No tags can describe") =>
                {
                    Ok(GitResponse::Text(String::new()))
                }
                Err(e) => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cli(workdir: &Path, url: &str) -> GitCli {
        let env = GitEnvironment {
            git: PathBuf::from("git"),
            shell: PathBuf::from("/bin/sh"),
        };
        GitCli::new(Arc::new(env), RemoteUrl::parse(url).unwrap(), workdir, None)
    }

    #[test]
    fn clone_args_include_branch_and_extras() {
        let c = cli(Path::new("/srv/site"), "https://github.com/user/site");
        let args = c.args(&GitEffect::Clone {
            branch: Some("main".into()),
            args: vec!["--depth".into(), "1".into()],
        });
        assert_eq!(
            args,
            vec![
                "clone",
                "--depth",
                "1",
                "-b",
                "main",
                "https://github.com/user/site.git",
                "site"
            ]
        );
        assert_eq!(
            c.cwd(&GitEffect::Clone {
                branch: None,
                args: vec![]
            }),
            PathBuf::from("/srv")
        );
    }

    #[test]
    fn relative_workdir_clones_into_itself() {
        let c = cli(Path::new("checkouts/site"), "https://github.com/user/site");
        let clone = GitEffect::Clone {
            branch: None,
            args: vec![],
        };
        let target = c.args(&clone).pop().unwrap();
        assert_eq!(c.cwd(&clone).join(target), PathBuf::from("checkouts/site"));

        let bare = cli(Path::new("site"), "https://github.com/user/site");
        let target = bare.args(&clone).pop().unwrap();
        assert_eq!(bare.cwd(&clone).join(target), PathBuf::from("./site"));
    }

    #[test]
    fn checkout_detaches_at_target() {
        let c = cli(Path::new("/srv/site"), "https://github.com/user/site.git");
        let args = c.args(&GitEffect::Checkout {
            target: "tags/v1.2".into(),
        });
        assert_eq!(args, vec!["checkout", "--detach", "tags/v1.2"]);
    }

    #[test]
    fn tag_mode_clone_omits_branch() {
        let c = cli(Path::new("/srv/site"), "https://github.com/user/site.git");
        let args = c.args(&GitEffect::Clone {
            branch: None,
            args: vec![],
        });
        assert!(!args.contains(&"-b".to_string()));
    }

    #[test]
    fn pull_args_precede_origin() {
        let c = cli(Path::new("/srv/site"), "https://github.com/user/site.git");
        let args = c.args(&GitEffect::Pull {
            branch: "master".into(),
            args: vec!["--ff-only".into()],
        });
        assert_eq!(args, vec!["pull", "--ff-only", "origin", "master"]);
        assert_eq!(
            c.cwd(&GitEffect::Pull {
                branch: "master".into(),
                args: vec![]
            }),
            PathBuf::from("/srv/site")
        );
    }

    #[tokio::test]
    async fn reads_head_and_origin_of_a_real_repository() {
        let Ok(env) = GitEnvironment::detect() else {
            return;
        };
        let dir = tempdir().unwrap();
        let run = |args: &[&str]| {
            let status = std::process::Command::new(&env.git)
                .args(args)
                .current_dir(dir.path())
                .env("GIT_CONFIG_NOSYSTEM", "1")
                .env("GIT_CONFIG_GLOBAL", "/dev/null")
                .status()
                .unwrap();
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q"]);
        run(&["remote", "add", "origin", "https://example.com/user/repo.git"]);
        run(&[
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "-q",
            "--allow-empty",
            "-m",
            "initial",
        ]);

        let git = GitCli::new(
            Arc::new(env),
            RemoteUrl::parse("https://example.com/user/repo.git").unwrap(),
            dir.path(),
            None,
        );

        match git.interpret(GitEffect::HeadCommit).await.unwrap() {
            GitResponse::Sha(sha) => assert_eq!(sha.as_str().len(), 40),
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(
            git.interpret(GitEffect::OriginUrl).await.unwrap(),
            GitResponse::Text("https://example.com/user/repo.git".into())
        );
    }
}
