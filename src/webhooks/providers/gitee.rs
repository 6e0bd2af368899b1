use axum::http::HeaderMap;

use crate::types::BranchSpec;
use crate::webhooks::payload::evaluate_ref_push;
use crate::webhooks::{HookAction, HookError, HookProvider, HookRequest, check_token};

const EVENT: &str = "x-gitee-event";
const TOKEN: &str = "x-gitee-token";

/// Gitee, authenticated by the plain `X-Gitee-Token` header.
#[derive(Debug, Default)]
pub struct Gitee;

impl HookProvider for Gitee {
    fn name(&self) -> &'static str {
        "gitee"
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
            other => Err(HookError::UnsupportedEvent {
                provider: self.name(),
                event: other.to_string(),
            }),
        }
    }
}
