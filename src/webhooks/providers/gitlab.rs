use axum::http::HeaderMap;

use crate::types::BranchSpec;
use crate::webhooks::payload::{RefPush, evaluate_ref_push, parse_json, tag_from_ref};
use crate::webhooks::{HookAction, HookError, HookProvider, HookRequest, check_token};

const EVENT: &str = "x-gitlab-event";
const TOKEN: &str = "x-gitlab-token";

/// GitLab, authenticated by the plain `X-Gitlab-Token` header.
#[derive(Debug, Default)]
pub struct GitLab;

impl HookProvider for GitLab {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    fn does_handle(&self, headers: &HeaderMap) -> bool {
        headers.contains_key(EVENT)
    }

    fn verify(&self, request: &HookRequest, secret: Option<&str>) -> Result<(), HookError> {
        check_token(request, TOKEN, secret)
    }

    fn evaluate(
        &self,
        request: &HookRequest,
        tracked: &BranchSpec,
    ) -> Result<HookAction, HookError> {
        match request.required_header(EVENT)? {
            "Push Hook" => evaluate_ref_push(self.name(), &request.body, tracked),
            "Tag Push Hook" => {
                let push: RefPush = parse_json(&request.body)?;
                match tag_from_ref(&push.reference) {
                    Some(_) if tracked.is_latest_tag() => Ok(HookAction::Pull),
                    _ => Err(HookError::Ignored {
                        provider: self.name(),
                        reason: format!("tag push {} while tracking a branch", push.reference),
                    }),
                }
            }
            other => Err(HookError::UnsupportedEvent {
                provider: self.name(),
                event: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::providers::test_support::request;

    fn master() -> BranchSpec {
        BranchSpec::parse("master")
    }

    #[test]
    fn push_hook_matches_branch() {
        let req = request(&[("x-gitlab-event", "Push Hook")], r#"{"ref":"refs/heads/master"}"#);
        assert_eq!(GitLab.evaluate(&req, &master()).unwrap(), HookAction::Pull);

        let other = request(&[("x-gitlab-event", "Push Hook")], r#"{"ref":"refs/heads/wip"}"#);
        assert!(GitLab.evaluate(&other, &master()).unwrap_err().is_ignored());
    }

    #[test]
    fn bad_ref_is_rejected() {
        let req = request(&[("x-gitlab-event", "Push Hook")], r#"{"ref":"refs/master"}"#);
        assert_eq!(
            GitLab.evaluate(&req, &master()).unwrap_err().status(),
            axum::http::StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn tag_push_only_pulls_in_tag_mode() {
        let req = request(&[("x-gitlab-event", "Tag Push Hook")], r#"{"ref":"refs/tags/v2"}"#);
        assert_eq!(GitLab.evaluate(&req, &BranchSpec::LatestTag).unwrap(), HookAction::Pull);
        assert!(GitLab.evaluate(&req, &master()).unwrap_err().is_ignored());
    }

    #[test]
    fn other_events_are_unsupported() {
        let req = request(&[("x-gitlab-event", "Issue Hook")], "{}");
        assert!(matches!(
            GitLab.evaluate(&req, &master()),
            Err(HookError::UnsupportedEvent { .. })
        ));
    }

    #[test]
    fn token_compared_with_secret() {
        let req = request(&[("x-gitlab-event", "Push Hook"), ("x-gitlab-token", "tok")], "{}");
        assert!(GitLab.verify(&req, Some("tok")).is_ok());
        assert!(GitLab.verify(&req, Some("nope")).is_err());
    }
}
