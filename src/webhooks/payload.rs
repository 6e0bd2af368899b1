//! Push payload parsing shared by the providers.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{HookAction, HookError};
use crate::types::BranchSpec;

/// The part of a ref-based push payload the providers need.
#[derive(Debug, Deserialize)]
pub struct RefPush {
    #[serde(rename = "ref")]
    pub reference: String,
}

/// Decodes a JSON body, mapping failures to [`HookError::InvalidPayload`].
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, HookError> {
    serde_json::from_slice(body).map_err(|e| HookError::InvalidPayload(e.to_string()))
}

/// Extracts the branch from a ref such as `refs/heads/master`.
///
/// The ref must have exactly three slash-separated segments, so branch
/// names containing a slash are rejected.
///
/// # Examples
///
/// ```
/// use gitsync::webhooks::payload::branch_from_ref;
///
/// assert_eq!(branch_from_ref("refs/heads/master").unwrap(), "master");
/// assert!(branch_from_ref("refs/heads/feature/x").is_err());
/// assert!(branch_from_ref("master").is_err());
/// ```
pub fn branch_from_ref(reference: &str) -> Result<&str, HookError> {
    let segments: Vec<&str> = reference.split('/').collect();
    match segments.as_slice() {
        [_, _, branch] => Ok(branch),
        _ => Err(HookError::InvalidRef(reference.to_string())),
    }
}

/// Returns the tag name if `reference` is a `refs/tags/*` ref.
pub fn tag_from_ref(reference: &str) -> Option<&str> {
    reference
        .strip_prefix("refs/tags/")
        .filter(|tag| !tag.is_empty())
}

/// Accepts `branch` if it is the tracked branch, else an ignored outcome.
pub fn match_branch(
    provider: &'static str,
    tracked: &BranchSpec,
    branch: &str,
) -> Result<HookAction, HookError> {
    if tracked.branch() == Some(branch) {
        Ok(HookAction::Pull)
    } else {
        Err(HookError::other_branch(provider, branch))
    }
}

/// The common `{"ref": "refs/heads/<branch>"}` push.
pub fn evaluate_ref_push(
    provider: &'static str,
    body: &[u8],
    tracked: &BranchSpec,
) -> Result<HookAction, HookError> {
    let push: RefPush = parse_json(body)?;
    let branch = branch_from_ref(&push.reference)?;
    match_branch(provider, tracked, branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn master() -> BranchSpec {
        BranchSpec::parse("master")
    }

    #[test]
    fn matching_push_pulls() {
        let action = evaluate_ref_push("gogs", br#"{"ref":"refs/heads/master"}"#, &master());
        assert_eq!(action.unwrap(), HookAction::Pull);
    }

    #[test]
    fn other_branch_is_ignored() {
        let err = evaluate_ref_push("gogs", br#"{"ref":"refs/heads/dev"}"#, &master()).unwrap_err();
        assert!(err.is_ignored());
    }

    #[test]
    fn malformed_body_is_invalid_payload() {
        let err = evaluate_ref_push("gogs", b"not json", &master()).unwrap_err();
        assert!(matches!(err, HookError::InvalidPayload(_)));
        let err = evaluate_ref_push("gogs", b"{}", &master()).unwrap_err();
        assert!(matches!(err, HookError::InvalidPayload(_)));
    }

    #[test]
    fn bad_ref_is_invalid_ref() {
        let err = evaluate_ref_push("gogs", br#"{"ref":"master"}"#, &master()).unwrap_err();
        assert!(matches!(err, HookError::InvalidRef(_)));
    }

    #[test]
    fn tag_mode_ignores_branch_pushes() {
        let err = evaluate_ref_push("gogs", br#"{"ref":"refs/heads/master"}"#, &BranchSpec::LatestTag)
            .unwrap_err();
        assert!(err.is_ignored());
    }

    #[test]
    fn tag_refs() {
        assert_eq!(tag_from_ref("refs/tags/v1.2.0"), Some("v1.2.0"));
        assert_eq!(tag_from_ref("refs/tags/"), None);
        assert_eq!(tag_from_ref("refs/heads/master"), None);
    }

    proptest! {
        #[test]
        fn three_segment_refs_yield_last_segment(
            a in "[a-z]{1,8}",
            b in "[a-z]{1,8}",
            branch in "[a-zA-Z0-9._-]{1,20}",
        ) {
            let reference = format!("{a}/{b}/{branch}");
            prop_assert_eq!(branch_from_ref(&reference).unwrap(), branch.as_str());
        }

        #[test]
        fn other_segment_counts_are_rejected(parts in prop::collection::vec("[a-z]{1,5}", 1..8)) {
            prop_assume!(parts.len() != 3);
            prop_assert!(branch_from_ref(&parts.join("/")).is_err());
        }
    }
}
