//! Webhook endpoint.
//!
//! Buffers the request and hands it to the [`Dispatcher`](crate::webhooks::Dispatcher).
//!
//! # Response
//!
//! - 200 OK: handled or ignored; `pong` for pings
//! - 400 Bad Request: failed verification, missing event header, unknown event or bad payload
//! - 403 Forbidden: source address outside the provider's ranges
//! - 404 Not Found: no provider recognised the request
//! - 405 Method Not Allowed: not a POST
//! - 500 Internal Server Error: a CI-result deploy failed

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use super::AppState;
use crate::effects::GitInterpreter;
use crate::git::GitError;
use crate::repo::Repository;
use crate::webhooks::HookRequest;

/// Largest accepted webhook body.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Handles a request on `repo`'s hook path.
pub async fn handle_hook<G>(state: &AppState<G>, repo: &Arc<Repository<G>>, request: Request) -> Response
where
    G: GitInterpreter<Error = GitError> + Send + Sync + 'static,
{
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Could not read webhook body");
            return (StatusCode::BAD_REQUEST, "could not read body from request").into_response();
        }
    };

    let hook_request = HookRequest {
        method: parts.method,
        headers: parts.headers,
        body,
        remote_addr,
    };

    match state.dispatcher().dispatch(repo, hook_request).await {
        Ok(Some(reply)) => reply.into_response(),
        Ok(None) => {
            debug!(path = %parts.uri.path(), "Webhook not routed");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            warn!(repo = %repo.id(), status = %e.status(), error = %e, "Webhook rejected");
            e.into_response()
        }
    }
}
