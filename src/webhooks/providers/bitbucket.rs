use axum::http::HeaderMap;
use serde::Deserialize;

use crate::types::BranchSpec;
use crate::webhooks::ip_ranges::{ATLASSIAN_RANGES_URL, IpAllowList};
use crate::webhooks::payload::{match_branch, parse_json};
use crate::webhooks::{HookAction, HookError, HookProvider, HookRequest};

const EVENT: &str = "x-event-key";

/// Bitbucket Cloud.
///
/// Bitbucket does not sign deliveries; instead the source address must be in
/// Atlassian's published ranges.
pub struct Bitbucket {
    allowed: IpAllowList,
}

impl Bitbucket {
    /// An adapter that fetches Atlassian's ranges with `client`.
    pub fn new(client: reqwest::Client) -> Self {
        Bitbucket::with_allow_list(IpAllowList::new(client, ATLASSIAN_RANGES_URL))
    }

    pub fn with_allow_list(allowed: IpAllowList) -> Self {
        Bitbucket { allowed }
    }
}

#[derive(Debug, Deserialize)]
struct PushEvent {
    push: Push,
}

#[derive(Debug, Deserialize)]
struct Push {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    new: Option<NewState>,
}

#[derive(Debug, Deserialize)]
struct NewState {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    kind: String,
}

impl HookProvider for Bitbucket {
    fn name(&self) -> &'static str {
        "bitbucket"
    }

    fn does_handle(&self, headers: &HeaderMap) -> bool {
        headers.contains_key(EVENT)
    }

    fn ip_allow_list(&self) -> Option<&IpAllowList> {
        Some(&self.allowed)
    }

    fn evaluate(
        &self,
        request: &HookRequest,
        tracked: &BranchSpec,
    ) -> Result<HookAction, HookError> {
        let event = request.required_header(EVENT)?;
        if event != "repo:push" {
            return Err(HookError::UnsupportedEvent {
                provider: self.name(),
                event: event.to_string(),
            });
        }

        let push: PushEvent = parse_json(&request.body)?;
        let change = push.push.changes.into_iter().next().ok_or_else(|| {
            HookError::InvalidPayload("the push was incomplete, missing change list".into())
        })?;
        let new = change
            .new
            .filter(|new| !new.name.is_empty())
            .ok_or_else(|| {
                HookError::InvalidPayload("the push didn't contain a valid branch name".into())
            })?;

        if tracked.is_latest_tag() && new.kind == "tag" {
            return Ok(HookAction::Pull);
        }
        match_branch(self.name(), tracked, &new.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::providers::test_support::request;

    fn adapter() -> Bitbucket {
        Bitbucket::with_allow_list(IpAllowList::preloaded(vec![]))
    }

    fn push_body(name: &str, kind: &str) -> String {
        serde_json::json!({
            "push": {"changes": [{"new": {"name": name, "type": kind}}]}
        })
        .to_string()
    }

    #[test]
    fn push_to_tracked_branch_pulls() {
        let req = request(&[("x-event-key", "repo:push")], &push_body("master", "branch"));
        assert_eq!(
            adapter().evaluate(&req, &BranchSpec::parse("master")).unwrap(),
            HookAction::Pull
        );
    }

    #[test]
    fn push_to_other_branch_is_ignored() {
        let req = request(&[("x-event-key", "repo:push")], &push_body("dev", "branch"));
        assert!(
            adapter()
                .evaluate(&req, &BranchSpec::parse("master"))
                .unwrap_err()
                .is_ignored()
        );
    }

    #[test]
    fn tag_push_pulls_in_tag_mode() {
        let req = request(&[("x-event-key", "repo:push")], &push_body("v3.1", "tag"));
        assert_eq!(
            adapter().evaluate(&req, &BranchSpec::LatestTag).unwrap(),
            HookAction::Pull
        );
    }

    #[test]
    fn incomplete_pushes_are_invalid() {
        let tracked = BranchSpec::parse("master");
        for body in [
            r#"{"push":{"changes":[]}}"#,
            r#"{"push":{"changes":[{"new":null}]}}"#,
            r#"{"push":{"changes":[{"new":{"name":""}}]}}"#,
            r#"{"nope":1}"#,
        ] {
            let req = request(&[("x-event-key", "repo:push")], body);
            assert!(
                matches!(adapter().evaluate(&req, &tracked), Err(HookError::InvalidPayload(_))),
                "{body}"
            );
        }
    }

    #[test]
    fn other_events_are_unsupported() {
        let req = request(&[("x-event-key", "repo:fork")], "{}");
        assert!(matches!(
            adapter().evaluate(&req, &BranchSpec::parse("master")),
            Err(HookError::UnsupportedEvent { .. })
        ));
    }
}
