use axum::http::HeaderMap;
use tracing::warn;

use crate::types::BranchSpec;
use crate::webhooks::payload::{RefPush, branch_from_ref, match_branch, parse_json, tag_from_ref};
use crate::webhooks::{HookAction, HookError, HookProvider, HookRequest, verify_signature};

const EVENT: &str = "x-github-event";
const SIGNATURE: &str = "x-hub-signature-256";

/// GitHub and GitHub Enterprise.
///
/// `push` events pull on the tracked branch. In tag-tracking mode, tag
/// pushes and `release` events pull instead.
#[derive(Debug, Default)]
pub struct GitHub;

impl HookProvider for GitHub {
    fn name(&self) -> &'static str {
        "github"
    }

    fn does_handle(&self, headers: &HeaderMap) -> bool {
        headers.contains_key(EVENT)
    }

    fn verify(&self, request: &HookRequest, secret: Option<&str>) -> Result<(), HookError> {
        let Some(secret) = secret else {
            warn!("Unable to verify request signature. Secret not set in configuration!");
            return Ok(());
        };
        let signature = request
            .header(SIGNATURE)
            .ok_or_else(|| HookError::Unverified(format!("The '{SIGNATURE}' header is missing.")))?;
        if verify_signature(&request.body, signature, secret.as_bytes()) {
            Ok(())
        } else {
            Err(HookError::Unverified("Invalid signature.".into()))
        }
    }

    fn evaluate(
        &self,
        request: &HookRequest,
        tracked: &BranchSpec,
    ) -> Result<HookAction, HookError> {
        match request.required_header(EVENT)? {
            "ping" => Ok(HookAction::Respond("pong")),
            "push" => {
                let push: RefPush = parse_json(&request.body)?;
                if tracked.is_latest_tag() {
                    return match tag_from_ref(&push.reference) {
                        Some(_) => Ok(HookAction::Pull),
                        None => Err(HookError::Ignored {
                            provider: self.name(),
                            reason: format!("ref {} is not a tag", push.reference),
                        }),
                    };
                }
                match_branch(self.name(), tracked, branch_from_ref(&push.reference)?)
            }
            "release" if tracked.is_latest_tag() => Ok(HookAction::Pull),
            "release" => Err(HookError::Ignored {
                provider: self.name(),
                reason: "release event while tracking a branch".into(),
            }),
            other => Err(HookError::UnsupportedEvent {
                provider: self.name(),
                event: other.to_string(),
            }),
        }
    }
}
