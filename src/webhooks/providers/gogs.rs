use axum::http::HeaderMap;
use tracing::warn;

use crate::types::BranchSpec;
use crate::webhooks::payload::evaluate_ref_push;
use crate::webhooks::{HookAction, HookError, HookProvider, HookRequest, verify_hex_signature};

const EVENT: &str = "x-gogs-event";
const SIGNATURE: &str = "x-gogs-signature";

/// Gogs (and Gitea in Gogs compatibility mode).
#[derive(Debug, Default)]
pub struct Gogs;

impl HookProvider for Gogs {
    fn name(&self) -> &'static str {
        "gogs"
    }

    fn does_handle(&self, headers: &HeaderMap) -> bool {
        headers.contains_key(EVENT)
    }

    fn verify(&self, request: &HookRequest, secret: Option<&str>) -> Result<(), HookError> {
        let Some(secret) = secret else {
            warn!("Unable to verify request signature. Secret not set in configuration!");
            return Ok(());
        };
        match request.header(SIGNATURE) {
            Some(sig) if verify_hex_signature(&request.body, sig, secret.as_bytes()) => Ok(()),
            Some(_) => Err(HookError::Unverified("Invalid signature.".into())),
            None => Err(HookError::Unverified(format!(
                "The '{SIGNATURE}' header is missing."
            ))),
        }
    }

    fn evaluate(
        &self,
        request: &HookRequest,
        tracked: &BranchSpec,
    ) -> Result<HookAction, HookError> {
        match request.required_header(EVENT)? {
            "ping" => Ok(HookAction::Respond("pong")),
            "push" => evaluate_ref_push(self.name(), &request.body, tracked),
            other => Err(HookError::UnsupportedEvent {
                provider: self.name(),
                event: other.to_string(),
            }),
        }
    }
}
