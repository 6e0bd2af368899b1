use axum::http::HeaderMap;

use crate::types::BranchSpec;
use crate::webhooks::payload::evaluate_ref_push;
use crate::webhooks::{HookAction, HookError, HookProvider, HookRequest};

/// Any sender posting `{"ref": "refs/heads/<branch>"}`.
///
/// Accepts every request, so it is only used when configured explicitly.
#[derive(Debug, Default)]
pub struct Generic;

impl HookProvider for Generic {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn does_handle(&self, _headers: &HeaderMap) -> bool {
        true
    }

    fn evaluate(
        &self,
        request: &HookRequest,
        tracked: &BranchSpec,
    ) -> Result<HookAction, HookError> {
        evaluate_ref_push(self.name(), &request.body, tracked)
    }
}
