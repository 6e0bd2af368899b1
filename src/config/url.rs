//! Remote URL validation and normalisation.
//!
//! Accepted inputs:
//!
//! - `https://host/path`, `http://host/path`, `ssh://[user@]host[:port]/path`
//! - scp-style `[user@]host:path`
//! - schemeless `host/path`, which is read as HTTPS
//!
//! `.git` is appended to the path when missing. Repositories without a key
//! are fetched over HTTPS ([`RemoteUrl::to_https`]); repositories with a key
//! over SSH ([`RemoteUrl::to_ssh`]).
//!
//! `Display` never prints a password. Use [`RemoteUrl::to_git_string`] for
//! the form handed to git.

use std::fmt;

use thiserror::Error;

/// Errors from parsing a remote URL.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("repository URL is empty")]
    Empty,

    #[error("invalid repository URL '{url}': {reason}")]
    Invalid { url: String, reason: String },

    #[error("unsupported URL scheme '{scheme}' (expected https, http or ssh)")]
    UnsupportedScheme { scheme: String },
}

/// A validated remote repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUrl {
    scheme: Scheme,
    user: Option<String>,
    password: Option<String>,
    host: String,
    port: Option<u16>,
    /// Repository path without a leading slash, always ending in `.git`.
    path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Https,
    Http,
    Ssh,
    /// `user@host:path`
    Scp,
}

impl RemoteUrl {
    /// Parses and validates a repository URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use gitsync::config::RemoteUrl;
    ///
    /// let url = RemoteUrl::parse("github.com/user/repo").unwrap();
    /// assert_eq!(url.to_string(), "https://github.com/user/repo.git");
    ///
    /// let url = RemoteUrl::parse("git@github.com:user/repo").unwrap();
    /// assert_eq!(url.to_string(), "git@github.com:user/repo.git");
    ///
    /// assert!(RemoteUrl::parse("ftp://github.com/user/repo").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(UrlError::Empty);
        }

        let mut parsed = if input.contains("://") {
            Self::parse_with_scheme(input)?
        } else if let Some(scp) = Self::parse_scp(input)? {
            scp
        } else {
            Self::parse_with_scheme(&format!("https://{input}"))?
        };

        if parsed.path.is_empty() {
            return Err(UrlError::Invalid {
                url: input.to_string(),
                reason: "missing repository path".into(),
            });
        }
        if !parsed.path.ends_with(".git") {
            parsed.path.push_str(".git");
        }
        Ok(parsed)
    }

    fn parse_with_scheme(input: &str) -> Result<Self, UrlError> {
        let url = url::Url::parse(input).map_err(|e| UrlError::Invalid {
            url: input.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = match url.scheme() {
            "https" => Scheme::Https,
            "http" => Scheme::Http,
            "ssh" => Scheme::Ssh,
            other => {
                return Err(UrlError::UnsupportedScheme {
                    scheme: other.to_string(),
                });
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| UrlError::Invalid {
                url: input.to_string(),
                reason: "missing host".into(),
            })?
            .to_string();

        Ok(RemoteUrl {
            scheme,
            user: Some(url.username().to_string()).filter(|u| !u.is_empty()),
            password: url.password().map(str::to_string),
            host,
            port: url.port(),
            path: url.path().trim_matches('/').to_string(),
        })
    }

    /// Recognises `[user@]host:path`. A numeric first path segment means
    /// `host:port/...` instead, which is left to the schemeless parser.
    fn parse_scp(input: &str) -> Result<Option<Self>, UrlError> {
        let Some((authority, path)) = input.split_once(':') else {
            return Ok(None);
        };
        if authority.contains('/') {
            return Ok(None);
        }
        let first_segment = path.split('/').next().unwrap_or_default();
        if !first_segment.is_empty() && first_segment.chars().all(|c| c.is_ascii_digit()) {
            return Ok(None);
        }

        let (user, host) = match authority.rsplit_once('@') {
            Some((user, host)) => (Some(user.to_string()), host),
            None => (None, authority),
        };
        if host.is_empty() {
            return Err(UrlError::Invalid {
                url: input.to_string(),
                reason: "missing host".into(),
            });
        }

        Ok(Some(RemoteUrl {
            scheme: Scheme::Scp,
            user,
            password: None,
            host: host.to_string(),
            port: None,
            path: path.trim_matches('/').to_string(),
        }))
    }

    /// Host name, as used for `ssh-keyscan`.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Repository path without leading slash, including `.git`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment without `.git`, e.g. `repo` for `user/repo.git`.
    pub fn repo_name(&self) -> &str {
        let last = self.path.rsplit('/').next().unwrap_or(&self.path);
        last.strip_suffix(".git").unwrap_or(last)
    }

    /// Returns true for the SSH and scp-like forms.
    pub fn is_ssh(&self) -> bool {
        matches!(self.scheme, Scheme::Ssh | Scheme::Scp)
    }

    /// Normalises to an HTTP(S) URL for anonymous or password access.
    ///
    /// An SSH login user is not an HTTPS credential and is dropped, as is an
    /// SSH port. Bitbucket requires the account in HTTPS URLs, so for
    /// `bitbucket.org` the first path segment becomes the user when none is
    /// set.
    pub fn to_https(&self) -> RemoteUrl {
        let mut url = self.clone();
        if self.is_ssh() {
            url.scheme = Scheme::Https;
            url.user = None;
            url.password = None;
            url.port = None;
        }
        if url.host == "bitbucket.org" && url.user.is_none() {
            url.user = url
                .path
                .split('/')
                .next()
                .filter(|s| !s.is_empty())
                .map(str::to_string);
        }
        url
    }

    /// Normalises to an SSH URL for key-based access.
    ///
    /// The login user defaults to `git`. Without a port this is the scp form
    /// `git@host:path.git`; with a port it needs the `ssh://` scheme.
    pub fn to_ssh(&self) -> RemoteUrl {
        let mut url = self.clone();
        url.password = None;
        if !self.is_ssh() {
            // HTTP credentials never carry over to SSH.
            url.user = None;
            url.port = None;
        }
        if url.user.is_none() {
            url.user = Some("git".to_string());
        }
        url.scheme = if url.port.is_some() {
            Scheme::Ssh
        } else {
            Scheme::Scp
        };
        url
    }

    /// The full URL including any password, for passing to git.
    pub fn to_git_string(&self) -> String {
        self.render(true)
    }

    fn render(&self, with_password: bool) -> String {
        let mut userinfo = String::new();
        if let Some(user) = &self.user {
            userinfo.push_str(user);
            if with_password && let Some(password) = &self.password {
                userinfo.push(':');
                userinfo.push_str(password);
            }
            userinfo.push('@');
        }

        match self.scheme {
            Scheme::Scp => format!("{userinfo}{}:{}", self.host, self.path),
            scheme => {
                let scheme = match scheme {
                    Scheme::Https => "https",
                    Scheme::Http => "http",
                    _ => "ssh",
                };
                let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
                format!("{scheme}://{userinfo}{}{port}/{}", self.host, self.path)
            }
        }
    }
}

impl fmt::Display for RemoteUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(false))
    }
}
