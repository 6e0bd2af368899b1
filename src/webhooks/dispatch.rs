//! Provider selection and action execution.

use axum::http::{Method, StatusCode};
use tracing::{debug, error, info, warn};

use super::providers::{Bitbucket, Generic, GitHub, GitLab, Gitee, Gogs, Travis};
use super::{HookAction, HookError, HookProvider, HookReply, HookRequest};
use crate::effects::GitInterpreter;
use crate::git::GitError;
use crate::repo::{PullOutcome, Repository};

struct Registered {
    provider: Box<dyn HookProvider>,
    auto_detect: bool,
}

/// The set of known providers, in auto-detection order.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Registered>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in provider.
    ///
    /// Auto-detection tries github, gitlab, bitbucket, travis, gogs and
    /// gitee in that order. `generic` accepts anything, so it is only used
    /// when configured explicitly.
    pub fn standard(client: reqwest::Client) -> Self {
        let mut registry = ProviderRegistry::new();
        registry.register(GitHub, true);
        registry.register(GitLab, true);
        registry.register(Bitbucket::new(client), true);
        registry.register(Travis, true);
        registry.register(Gogs, true);
        registry.register(Gitee, true);
        registry.register(Generic, false);
        registry
    }

    /// Adds a provider. A provider registered under an existing name
    /// replaces it.
    pub fn register(&mut self, provider: impl HookProvider + 'static, auto_detect: bool) {
        let name = provider.name();
        let entry = Registered {
            provider: Box::new(provider),
            auto_detect,
        };
        match self.providers.iter_mut().find(|r| r.provider.name() == name) {
            Some(existing) => *existing = entry,
            None => self.providers.push(entry),
        }
    }

    /// Looks a provider up by configuration name.
    pub fn get(&self, name: &str) -> Option<&dyn HookProvider> {
        self.providers
            .iter()
            .find(|r| r.provider.name() == name)
            .map(|r| r.provider.as_ref())
    }

    /// The first auto-detectable provider that recognises `request`.
    pub fn detect(&self, request: &HookRequest) -> Option<&dyn HookProvider> {
        self.providers
            .iter()
            .filter(|r| r.auto_detect)
            .find(|r| r.provider.does_handle(&request.headers))
            .map(|r| r.provider.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.providers.iter().map(|r| r.provider.name())
    }
}

/// Routes webhook requests to providers and runs the resulting actions.
pub struct Dispatcher {
    registry: ProviderRegistry,
}

impl Dispatcher {
    pub fn new(registry: ProviderRegistry) -> Self {
        Dispatcher { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Handles a request on `repo`'s hook path.
    ///
    /// Returns `Ok(None)` if the repository has no hook or no provider
    /// recognises the request; the caller then treats the request as
    /// unrouted. Ignored events come back as a plain 200 reply.
    pub async fn dispatch<G>(
        &self,
        repo: &Repository<G>,
        request: HookRequest,
    ) -> Result<Option<HookReply>, HookError>
    where
        G: GitInterpreter<Error = GitError> + Send + Sync,
    {
        let Some(hook) = repo.config().hook.as_ref() else {
            return Ok(None);
        };

        let provider = match hook.kind.as_deref() {
            Some(name) => {
                let provider = self
                    .registry
                    .get(name)
                    .ok_or_else(|| HookError::NotHandled(name.to_string()))?;
                if !provider.does_handle(&request.headers) {
                    return Err(HookError::NotHandled(name.to_string()));
                }
                provider
            }
            None => match self.registry.detect(&request) {
                Some(provider) => provider,
                None => {
                    info!(
                        "No compatible handler found. Consider enabling generic handler with 'type = \"generic\"'."
                    );
                    return Ok(None);
                }
            },
        };

        debug!(provider = provider.name(), repo = %repo.id(), "Handling webhook");
        match self
            .handle(provider, repo, hook.secret.as_deref(), &request)
            .await
        {
            Err(e) if e.is_ignored() => {
                info!("{e}");
                Ok(Some(HookReply::ok()))
            }
            other => other.map(Some),
        }
    }

    async fn handle<G>(
        &self,
        provider: &dyn HookProvider,
        repo: &Repository<G>,
        secret: Option<&str>,
        request: &HookRequest,
    ) -> Result<HookReply, HookError>
    where
        G: GitInterpreter<Error = GitError> + Send + Sync,
    {
        if request.method != Method::POST {
            return Err(HookError::MethodNotAllowed);
        }
        provider.verify(request, secret)?;

        if let Some(allowed) = provider.ip_allow_list() {
            match request.remote_addr {
                Some(ip) if !allowed.allows(ip).await => {
                    return Err(HookError::ForbiddenSource(ip));
                }
                Some(_) => {}
                None => debug!("No peer address, skipping IP check"),
            }
        }

        match provider.evaluate(request, &repo.config().branch)? {
            HookAction::Respond(body) => Ok(HookReply {
                status: StatusCode::OK,
                body: Some(body),
            }),
            HookAction::Pull => {
                info!("Received pull notification for the tracking branch, updating...");
                match repo.pull().await {
                    Ok(PullOutcome::Updated {
                        actions: Err(e), ..
                    }) => warn!(error = %e, "Post-sync actions failed"),
                    Ok(_) => {}
                    // The delivery itself was fine; the provider should not retry it.
                    Err(e) => error!(error = %e, "Pull after webhook failed"),
                }
                Ok(HookReply::ok())
            }
            HookAction::PullThenCheckout(commit) => {
                info!(commit = %commit, "Received build notification, updating...");
                repo.pull().await?;
                repo.checkout_commit(&commit).await?;
                Ok(HookReply::ok())
            }
        }
    }
}
