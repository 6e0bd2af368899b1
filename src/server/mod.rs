//! HTTP server for the synchronizer.
//!
//! Routes are not fixed: every repository contributes the hook and status
//! paths from its configuration, so the router resolves them at request
//! time in a fallback handler.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns 200 if the server is running
//! - `<hook.path>` - Accepts provider webhooks for one repository
//! - `<status.path>` - Status JSON or websocket stream for one repository
//!
//! Repositories are checked in configuration order; the first whose hook
//! or status path matches handles the request.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::debug;

pub mod status;
pub mod webhook;

use crate::config::StatusConfig;
use crate::effects::GitInterpreter;
use crate::git::{GitCli, GitError};
use crate::repo::Repository;
use crate::webhooks::Dispatcher;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
pub struct AppState<G = GitCli> {
    inner: Arc<AppStateInner<G>>,
}

struct AppStateInner<G> {
    /// Tracked repositories in configuration order.
    repos: Vec<Arc<Repository<G>>>,

    dispatcher: Dispatcher,
}

impl<G> Clone for AppState<G> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G> AppState<G> {
    pub fn new(repos: Vec<Arc<Repository<G>>>, dispatcher: Dispatcher) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { repos, dispatcher }),
        }
    }

    pub fn repos(&self) -> &[Arc<Repository<G>>] {
        &self.inner.repos
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }
}

impl<G> AppState<G>
where
    G: GitInterpreter<Error = GitError> + Send + Sync,
{
    /// The endpoint registered for `path`.
    ///
    /// Repositories are checked in order, hook path before status path.
    fn endpoint(&self, path: &str) -> Option<Endpoint<'_, G>> {
        self.inner.repos.iter().find_map(|repo| {
            let config = repo.config();
            if config.hook.as_ref().is_some_and(|h| h.path == path) {
                return Some(Endpoint::Hook(repo));
            }
            config
                .status
                .as_ref()
                .filter(|s| s.path == path)
                .map(|s| Endpoint::Status(repo, s))
        })
    }
}

enum Endpoint<'a, G> {
    Hook(&'a Arc<Repository<G>>),
    Status(&'a Arc<Repository<G>>, &'a StatusConfig),
}

/// Builds the axum Router with all endpoints.
pub fn build_router<G>(state: AppState<G>) -> Router
where
    G: GitInterpreter<Error = GitError> + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .fallback(gateway::<G>)
        .with_state(state)
}

/// Liveness probe.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Sends a request to the repository endpoint registered for its path.
async fn gateway<G>(State(state): State<AppState<G>>, request: Request) -> Response
where
    G: GitInterpreter<Error = GitError> + Send + Sync + 'static,
{
    let path = request.uri().path().to_string();
    match state.endpoint(&path) {
        Some(Endpoint::Hook(repo)) => webhook::handle_hook(&state, repo, request).await,
        Some(Endpoint::Status(repo, config)) => {
            status::handle_status(Arc::clone(repo), config, request).await
        }
        None => {
            debug!(path = %path, method = %request.method(), "No endpoint registered for path");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
