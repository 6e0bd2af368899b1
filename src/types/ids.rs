//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of plain strings that mean different
//! things (a commit hash, a branch name, a repository identity).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A git commit SHA.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(pub String);

impl Sha {
    /// Creates a new Sha from a string.
    ///
    /// Note: This does not validate the format. Full SHAs are 40 hex characters,
    /// but CI providers may send abbreviated ones.
    pub fn new(s: impl Into<String>) -> Self {
        Sha(s.into())
    }

    /// Parses an externally supplied commit hash: 4 to 40 hex digits.
    ///
    /// Anything else (notably strings starting with `-`) is rejected, so the
    /// result is always safe to pass to git as a revision.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = (4..=40).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Sha(s.to_ascii_lowercase()))
    }

    /// Returns the SHA as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Sha {
    fn from(s: String) -> Self {
        Sha(s)
    }
}

impl From<&str> for Sha {
    fn from(s: &str) -> Self {
        Sha(s.to_string())
    }
}

/// Identity of a tracked repository, as used by the scheduler registry.
///
/// This is the display form of the remote URL (credentials stripped).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(pub String);

impl RepoId {
    pub fn new(s: impl Into<String>) -> Self {
        RepoId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RepoId {
    fn from(s: &str) -> Self {
        RepoId(s.to_string())
    }
}

/// What a tracked repository follows upstream: a named branch, or the most
/// recent tag.
///
/// In configuration the latest-tag policy is written as the sentinel
/// [`BranchSpec::LATEST_TAG`] in place of a branch name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BranchSpec {
    /// Track a fixed branch.
    Branch(String),
    /// Always check out the newest tag.
    LatestTag,
}

impl BranchSpec {
    /// Configuration sentinel selecting tag-tracking mode.
    pub const LATEST_TAG: &'static str = "{latest}";

    /// Branch used when none is configured.
    pub const DEFAULT_BRANCH: &'static str = "master";

    /// Parses a configured branch value.
    ///
    /// # Examples
    ///
    /// ```
    /// use gitsync::types::BranchSpec;
    ///
    /// assert_eq!(BranchSpec::parse("{latest}"), BranchSpec::LatestTag);
    /// assert_eq!(BranchSpec::parse("main"), BranchSpec::Branch("main".into()));
    /// assert_eq!(BranchSpec::parse(""), BranchSpec::Branch("master".into()));
    /// ```
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            Self::LATEST_TAG => BranchSpec::LatestTag,
            "" => BranchSpec::Branch(Self::DEFAULT_BRANCH.to_string()),
            other => BranchSpec::Branch(other.to_string()),
        }
    }

    /// Returns the branch name, or `None` in tag-tracking mode.
    pub fn branch(&self) -> Option<&str> {
        match self {
            BranchSpec::Branch(name) => Some(name),
            BranchSpec::LatestTag => None,
        }
    }

    /// Returns true in tag-tracking mode.
    pub fn is_latest_tag(&self) -> bool {
        matches!(self, BranchSpec::LatestTag)
    }
}

impl Default for BranchSpec {
    fn default() -> Self {
        BranchSpec::Branch(Self::DEFAULT_BRANCH.to_string())
    }
}

impl fmt::Display for BranchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchSpec::Branch(name) => write!(f, "{name}"),
            BranchSpec::LatestTag => write!(f, "{}", Self::LATEST_TAG),
        }
    }
}

impl From<String> for BranchSpec {
    fn from(s: String) -> Self {
        BranchSpec::parse(&s)
    }
}

impl From<BranchSpec> for String {
    fn from(spec: BranchSpec) -> Self {
        spec.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    mod sha {
        use super::*;

        #[test]
        fn short_truncates_to_seven() {
            let sha = Sha::new("0123456789abcdef0123456789abcdef01234567");
            assert_eq!(sha.short(), "0123456");
        }

        #[test]
        fn short_of_short_sha_is_whole() {
            assert_eq!(Sha::new("abc").short(), "abc");
        }

        #[test]
        fn parse_accepts_full_and_abbreviated_hashes() {
            let full = "9FCEB02D0AE598E95DC970B74767F19372D61AF8";
            assert_eq!(Sha::parse(full).unwrap().as_str(), full.to_ascii_lowercase());
            assert_eq!(Sha::parse("9fceb").unwrap().as_str(), "9fceb");
        }

        #[test]
        fn parse_rejects_options_and_non_hex() {
            let too_long = "a".repeat(41);
            for bad in ["--orphan=pwned", "-b", "abc", "HEAD~1", "main", "", too_long.as_str()] {
                assert!(Sha::parse(bad).is_none(), "{bad:?} accepted");
            }
        }

        proptest! {
            #[test]
            fn parsed_hashes_never_look_like_options(s in "\\PC{0,48}") {
                if let Some(sha) = Sha::parse(&s) {
                    prop_assert!(!sha.as_str().starts_with('-'));
                    prop_assert!(sha.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
                }
            }
        }

        #[test]
        fn serializes_transparently() {
            let sha = Sha::from("deadbeef");
            assert_eq!(serde_json::to_string(&sha).unwrap(), "\"deadbeef\"");
        }
    }

    mod branch_spec {
        use super::*;

        #[test]
        fn sentinel_selects_tag_mode() {
            let spec = BranchSpec::parse("{latest}");
            assert!(spec.is_latest_tag());
            assert_eq!(spec.branch(), None);
            assert_eq!(spec.to_string(), "{latest}");
        }

        #[test]
        fn whitespace_is_trimmed() {
            assert_eq!(
                BranchSpec::parse("  develop "),
                BranchSpec::Branch("develop".into())
            );
        }

        #[test]
        fn deserializes_from_plain_string() {
            let spec: BranchSpec = serde_json::from_str("\"{latest}\"").unwrap();
            assert_eq!(spec, BranchSpec::LatestTag);
            let spec: BranchSpec = serde_json::from_str("\"release\"").unwrap();
            assert_eq!(spec.branch(), Some("release"));
        }

        proptest! {
            #[test]
            fn display_then_parse_is_identity(name in "[a-z][a-z0-9/_-]{0,30}") {
                let spec = BranchSpec::parse(&name);
                prop_assert_eq!(BranchSpec::parse(&spec.to_string()), spec);
            }
        }
    }
}
