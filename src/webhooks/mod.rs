//! Webhook dispatch.
//!
//! An inbound request on a repository's hook path is routed to one
//! [`HookProvider`]: the one named in the repository's configuration, or
//! the first auto-detected one (see [`ProviderRegistry`]). The provider
//! verifies and parses the request and decides on a [`HookAction`]; the
//! [`Dispatcher`] then runs that action against the repository.
//!
//! # Outcomes
//!
//! | Outcome | Status |
//! |---|---|
//! | wrong method | 405 |
//! | failed token or signature check, missing event header, unknown event, malformed payload | 400 |
//! | source outside the provider's published IP ranges | 403 |
//! | event for another branch ([`HookError::Ignored`]) | 200, logged |
//! | tracked branch | 200, after the pull |
//! | CI-result pull or checkout failure | 500 |

pub mod dispatch;
pub mod ip_ranges;
pub mod payload;
pub mod providers;
pub mod signature;

use std::net::IpAddr;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use crate::repo::SyncError;
use crate::types::{BranchSpec, Sha};

pub use dispatch::{Dispatcher, ProviderRegistry};
pub use ip_ranges::IpAllowList;
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, travis_signature,
    verify_hex_signature, verify_signature,
};

/// A buffered inbound webhook request.
#[derive(Debug, Clone)]
pub struct HookRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Peer address, when the server knows it.
    pub remote_addr: Option<IpAddr>,
}

impl HookRequest {
    /// A POST request with the given headers and body and no peer address.
    pub fn post(headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        HookRequest {
            method: Method::POST,
            headers,
            body: body.into(),
            remote_addr: None,
        }
    }

    /// Returns a header as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a header that must be present and non-empty.
    pub fn required_header(&self, name: &'static str) -> Result<&str, HookError> {
        self.header(name)
            .filter(|v| !v.is_empty())
            .ok_or(HookError::MissingHeader(name))
    }
}

/// What a provider decided to do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction {
    /// Answer 200 with a fixed body and do not sync (e.g. a ping).
    Respond(&'static str),
    /// Pull the tracked branch or tag.
    Pull,
    /// Pull, then check out this exact commit.
    PullThenCheckout(Sha),
}

/// A response to a handled webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReply {
    pub status: StatusCode,
    pub body: Option<&'static str>,
}

impl HookReply {
    pub fn ok() -> Self {
        HookReply {
            status: StatusCode::OK,
            body: None,
        }
    }
}

impl IntoResponse for HookReply {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) => (self.status, body).into_response(),
            None => self.status.into_response(),
        }
    }
}

/// Errors from handling a webhook.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("the request had an invalid method")]
    MethodNotAllowed,

    #[error("the '{0}' header is required but was missing")]
    MissingHeader(&'static str),

    /// Token, signature or authorization check failed.
    #[error("Unable to verify request. {0}")]
    Unverified(String),

    #[error("the request doesn't come from a valid IP")]
    ForbiddenSource(IpAddr),

    #[error("unsupported {provider} event '{event}'")]
    UnsupportedEvent {
        provider: &'static str,
        event: String,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("the push request contained an invalid reference string: '{0}'")]
    InvalidRef(String),

    /// An explicitly configured provider did not recognise the request.
    #[error("the request is not a {0} webhook")]
    NotHandled(String),

    /// A valid event that does not apply to this repository.
    #[error("{provider} webhook ignored. Error: {reason}")]
    Ignored {
        provider: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl HookError {
    /// Creates an [`HookError::Ignored`] for a push to another branch.
    pub fn other_branch(provider: &'static str, branch: &str) -> Self {
        HookError::Ignored {
            provider,
            reason: format!("found different branch {branch}"),
        }
    }

    /// The HTTP status this error is answered with.
    pub fn status(&self) -> StatusCode {
        match self {
            HookError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            HookError::ForbiddenSource(_) => StatusCode::FORBIDDEN,
            HookError::Ignored { .. } => StatusCode::OK,
            HookError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HookError::MissingHeader(_)
            | HookError::Unverified(_)
            | HookError::UnsupportedEvent { .. }
            | HookError::InvalidPayload(_)
            | HookError::InvalidRef(_)
            | HookError::NotHandled(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, HookError::Ignored { .. })
    }
}

impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_success() {
            return status.into_response();
        }
        (status, self.to_string()).into_response()
    }
}

/// A webhook provider adapter.
///
/// Implementations are stateless apart from cached data such as an IP
/// allow-list, and never touch the repository themselves.
pub trait HookProvider: Send + Sync {
    /// Configuration name, e.g. `"github"`.
    fn name(&self) -> &'static str;

    /// Returns true if the headers look like this provider's deliveries.
    fn does_handle(&self, headers: &HeaderMap) -> bool;

    /// Checks the request's token or signature against `secret`.
    fn verify(&self, _request: &HookRequest, _secret: Option<&str>) -> Result<(), HookError> {
        Ok(())
    }

    /// The provider's published source ranges, if it has any.
    fn ip_allow_list(&self) -> Option<&IpAllowList> {
        None
    }

    /// Parses the event and decides what to do for a repository tracking
    /// `tracked`.
    fn evaluate(&self, request: &HookRequest, tracked: &BranchSpec)
    -> Result<HookAction, HookError>;
}

/// Compares a plain token header with the configured secret.
///
/// Without a secret the check is skipped with a warning. With a secret the
/// header must be present and equal.
pub(crate) fn check_token(
    request: &HookRequest,
    header: &'static str,
    secret: Option<&str>,
) -> Result<(), HookError> {
    let token = request.header(header).filter(|t| !t.is_empty());
    match (secret, token) {
        (None, _) => {
            warn!(header, "Unable to verify request. Secret not set in configuration!");
            Ok(())
        }
        (Some(_), None) => Err(HookError::Unverified(format!(
            "The '{header}' header is missing."
        ))),
        (Some(secret), Some(token)) if token == secret => Ok(()),
        (Some(_), Some(_)) => Err(HookError::Unverified(
            "The token and specified secret do not match!".into(),
        )),
    }
}
