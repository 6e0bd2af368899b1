//! Status endpoint.
//!
//! A plain `GET` returns the repository's [`Status`](crate::status::Status)
//! as JSON. A websocket upgrade subscribes to the repository's status hub
//! and receives the same JSON object on every change. Either capability can
//! be disabled per repository.
//!
//! With a secret configured, requests need HTTP Basic credentials in which
//! the username or the password equals the secret.

use std::sync::Arc;

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::StatusConfig;
use crate::effects::GitInterpreter;
use crate::git::GitError;
use crate::repo::Repository;

/// Errors answered by the status endpoint.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("No or invalid secret.")]
    Unauthorized,

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("Requesting this endpoint as regular HTTP GET not allowed.")]
    GetDisabled,

    #[error("Requesting this endpoint as websocket not allowed.")]
    WebsocketDisabled,
}

impl IntoResponse for StatusError {
    fn into_response(self) -> Response {
        match self {
            StatusError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"Secure Area\"")],
                self.to_string(),
            )
                .into_response(),
            StatusError::MethodNotAllowed
            | StatusError::GetDisabled
            | StatusError::WebsocketDisabled => {
                (StatusCode::METHOD_NOT_ALLOWED, self.to_string()).into_response()
            }
        }
    }
}

/// Handles a request on `repo`'s status path.
pub async fn handle_status<G>(repo: Arc<Repository<G>>, config: &StatusConfig, request: Request) -> Response
where
    G: GitInterpreter<Error = GitError> + Send + Sync + 'static,
{
    if let Some(secret) = config.secret.as_deref()
        && !authorized(request.headers(), secret)
    {
        return StatusError::Unauthorized.into_response();
    }
    if request.method() != Method::GET {
        return StatusError::MethodNotAllowed.into_response();
    }

    if is_websocket_upgrade(request.headers()) {
        if !config.websocket {
            return StatusError::WebsocketDisabled.into_response();
        }
        let (mut parts, _body) = request.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade.on_upgrade(move |socket| stream_status(socket, repo)),
            Err(rejection) => rejection.into_response(),
        };
    }

    if !config.get {
        return StatusError::GetDisabled.into_response();
    }
    Json(repo.status()).into_response()
}

/// Checks HTTP Basic credentials against `secret`.
///
/// Either field may carry the secret; the other is not checked.
pub fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    let Some(encoded) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
    else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    match credentials.split_once(':') {
        Some((user, password)) => user == secret || password == secret,
        None => false,
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Pushes status snapshots to one websocket client until it goes away.
///
/// Inbound frames are read only to notice the disconnect.
async fn stream_status<G>(mut socket: WebSocket, repo: Arc<Repository<G>>)
where
    G: GitInterpreter<Error = GitError> + Send + Sync + 'static,
{
    let mut subscription = repo.hub().register();
    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            update = subscription.updates.recv() => {
                // The hub drops subscribers that fall behind.
                let Some(status) = update else { break };
                let text = match serde_json::to_string(&status) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Could not serialize status");
                        continue;
                    }
                };
                if let Err(e) = socket.send(Message::Text(text.into())).await {
                    debug!(error = %e, "It was not possible to write to client");
                    break;
                }
            }
        }
    }
    repo.hub().unregister(subscription.id);
    debug!(repo = %repo.id(), "Status subscriber disconnected");
}
