//! Configuration loading.
//!
//! The configuration is a TOML file with an optional `[server]` table and
//! one `[[repo]]` table per tracked repository:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//!
//! [[repo]]
//! url = "github.com/user/site"
//! path = "/srv/site"
//! branch = "main"            # or "{latest}" to track the newest tag
//! interval_secs = 600        # 0 disables polling
//!
//! [repo.hook]
//! path = "/hooks/site"
//! secret = "s3cret"
//! type = "github"            # optional; auto-detected when absent
//!
//! [[repo.then]]
//! command = "hugo"
//! args = ["--destination", "/var/www"]
//!
//! [repo.status]
//! path = "/status/site"
//! secret = "viewer"
//! ```

pub mod url;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use url::{RemoteUrl, UrlError};

use crate::types::BranchSpec;
use crate::webhooks::providers::PROVIDER_NAMES;

/// Default polling interval (one hour).
const DEFAULT_INTERVAL_SECS: u64 = 3600;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the file failed.
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML is malformed or does not match the schema.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A repository URL is invalid.
    #[error("repo '{url}': {source}")]
    Url {
        url: String,
        #[source]
        source: UrlError,
    },

    /// `hook.type` names no known provider.
    #[error("repo '{url}': invalid hook type '{kind}' (expected one of: {})", PROVIDER_NAMES.join(", "))]
    UnknownHookType { url: String, kind: String },

    /// An endpoint path does not start with `/`.
    #[error("repo '{url}': {field} '{value}' must start with '/'")]
    InvalidPath {
        url: String,
        field: &'static str,
        value: String,
    },

    /// No repositories are configured.
    #[error("no [[repo]] entries configured")]
    NoRepositories,
}

// ─── File schema ───

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default, rename = "repo")]
    repos: Vec<RepoSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    #[serde(default = "default_listen")]
    listen: SocketAddr,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RepoSection {
    url: String,
    path: Option<PathBuf>,
    #[serde(default)]
    branch: BranchSpec,
    key: Option<PathBuf>,
    #[serde(default = "default_interval")]
    interval_secs: u64,
    #[serde(default)]
    clone_args: Vec<String>,
    #[serde(default)]
    pull_args: Vec<String>,
    hook: Option<HookConfig>,
    #[serde(default)]
    then: Vec<ActionConfig>,
    status: Option<StatusConfig>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn enabled() -> bool {
    true
}

// ─── Validated configuration ───

/// Webhook settings for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookConfig {
    /// Path the webhook is served on.
    pub path: String,

    /// Shared secret or token. Verification is skipped when absent.
    #[serde(default)]
    pub secret: Option<String>,

    /// Provider name; auto-detected from headers when absent.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// One post-sync command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Run under supervision in the background instead of to completion.
    #[serde(default)]
    pub background: bool,
}

/// Status endpoint settings for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusConfig {
    /// Path the status endpoint is served on.
    pub path: String,

    /// Basic-auth secret gating both capabilities.
    #[serde(default)]
    pub secret: Option<String>,

    /// Whether plain `GET` queries are allowed.
    #[serde(default = "enabled")]
    pub get: bool,

    /// Whether websocket subscriptions are allowed.
    #[serde(default = "enabled")]
    pub websocket: bool,
}

/// A fully validated tracked-repository configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    /// Normalised remote URL (HTTPS without a key, SSH with one).
    pub url: RemoteUrl,
    /// Local working copy path.
    pub path: PathBuf,
    pub branch: BranchSpec,
    /// SSH private key for remote operations.
    pub key: Option<PathBuf>,
    /// Polling interval; zero disables polling.
    pub interval: Duration,
    pub clone_args: Vec<String>,
    pub pull_args: Vec<String>,
    pub hook: Option<HookConfig>,
    pub then: Vec<ActionConfig>,
    pub status: Option<StatusConfig>,
}

impl RepoConfig {
    /// A minimal configuration for `url` checked out at `path`.
    pub fn new(url: RemoteUrl, path: impl Into<PathBuf>) -> Self {
        RepoConfig {
            url,
            path: path.into(),
            branch: BranchSpec::default(),
            key: None,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            clone_args: Vec::new(),
            pull_args: Vec::new(),
            hook: None,
            then: Vec::new(),
            status: None,
        }
    }
}

/// The whole validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen: SocketAddr,
    pub repos: Vec<RepoConfig>,
}

impl Config {
    /// Loads and validates a config file.
    ///
    /// Relative repository paths are resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::from_toml(&text, base)
    }

    /// Parses and validates TOML text, resolving relative paths against `base`.
    ///
    /// A relative `base` is taken from the current directory, so repository
    /// paths always come out absolute.
    pub fn from_toml(text: &str, base: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;
        if file.repos.is_empty() {
            return Err(ConfigError::NoRepositories);
        }

        let base = if base.as_os_str().is_empty() {
            Path::new(".")
        } else {
            base
        };
        let base = std::path::absolute(base).map_err(|source| ConfigError::Io {
            path: base.to_path_buf(),
            source,
        })?;
        let base = base.as_path();

        let repos = file
            .repos
            .into_iter()
            .map(|section| validate_repo(section, base))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            listen: file.server.listen,
            repos,
        })
    }
}

fn validate_repo(section: RepoSection, base: &Path) -> Result<RepoConfig, ConfigError> {
    let parsed = RemoteUrl::parse(&section.url).map_err(|source| ConfigError::Url {
        url: section.url.clone(),
        source,
    })?;
    let url = match section.key {
        Some(_) => parsed.to_ssh(),
        None => parsed.to_https(),
    };
    let display = url.to_string();

    let path = section
        .path
        .unwrap_or_else(|| PathBuf::from(url.repo_name()));
    let path = if path.is_relative() {
        base.join(path)
    } else {
        path
    };

    if let Some(hook) = &section.hook {
        check_endpoint_path(&display, "hook path", &hook.path)?;
        if let Some(kind) = &hook.kind
            && !PROVIDER_NAMES.contains(&kind.as_str())
        {
            return Err(ConfigError::UnknownHookType {
                url: display,
                kind: kind.clone(),
            });
        }
    }
    if let Some(status) = &section.status {
        check_endpoint_path(&display, "status path", &status.path)?;
    }

    Ok(RepoConfig {
        url,
        path,
        branch: section.branch,
        key: section.key,
        interval: Duration::from_secs(section.interval_secs),
        clone_args: section.clone_args,
        pull_args: section.pull_args,
        hook: section.hook,
        then: section.then,
        status: section.status,
    })
}

fn check_endpoint_path(url: &str, field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with('/') {
        Ok(())
    } else {
        Err(ConfigError::InvalidPath {
            url: url.to_string(),
            field,
            value: value.to_string(),
        })
    }
}
