use axum::http::HeaderMap;
use serde::Deserialize;
use tracing::warn;

use crate::types::{BranchSpec, Sha};
use crate::webhooks::payload::parse_json;
use crate::webhooks::{HookAction, HookError, HookProvider, HookRequest, travis_signature};

const SLUG: &str = "travis-repo-slug";
const AUTHORIZATION: &str = "authorization";

/// Travis CI build notifications.
///
/// Unlike the git hosts, a passed build names the exact commit to deploy,
/// so the repository is pulled and then checked out at that commit.
#[derive(Debug, Default)]
pub struct Travis;

#[derive(Debug, Deserialize)]
struct BuildPayload {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    status_message: String,
    #[serde(default)]
    branch: String,
    #[serde(default)]
    commit: String,
}

impl HookProvider for Travis {
    fn name(&self) -> &'static str {
        "travis"
    }

    fn does_handle(&self, headers: &HeaderMap) -> bool {
        headers
            .get(SLUG)
            .is_some_and(|slug| !slug.as_bytes().is_empty())
    }

    fn verify(&self, request: &HookRequest, secret: Option<&str>) -> Result<(), HookError> {
        let signature = request
            .header(AUTHORIZATION)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HookError::Unverified("request sent no authorization signature".into()))?;
        let Some(secret) = secret else {
            warn!("Unable to verify request signature. Secret not set in configuration!");
            return Ok(());
        };
        let slug = request.header(SLUG).unwrap_or_default();
        if signature == travis_signature(slug, secret) {
            Ok(())
        } else {
            Err(HookError::Unverified("Invalid authorization header".into()))
        }
    }

    fn evaluate(
        &self,
        request: &HookRequest,
        tracked: &BranchSpec,
    ) -> Result<HookAction, HookError> {
        let payload = url::form_urlencoded::parse(&request.body)
            .find(|(key, _)| key == "payload")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| HookError::InvalidPayload("Payload required".into()))?;
        let build: BuildPayload = parse_json(payload.as_bytes())?;

        if build.kind != "push" || build.status_message != "Passed" {
            return Err(HookError::Ignored {
                provider: self.name(),
                reason: "wrong status or type".into(),
            });
        }
        if let Some(branch) = tracked.branch()
            && build.branch != branch
        {
            return Err(HookError::other_branch(self.name(), &build.branch));
        }
        let commit = Sha::parse(&build.commit).ok_or_else(|| {
            HookError::InvalidPayload(format!("invalid commit '{}'", build.commit))
        })?;
        Ok(HookAction::PullThenCheckout(commit))
    }
}
