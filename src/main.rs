use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gitsync::config::Config;
use gitsync::git::GitEnvironment;
use gitsync::repo::Repository;
use gitsync::scheduler::Scheduler;
use gitsync::server::{AppState, build_router};
use gitsync::webhooks::{Dispatcher, ProviderRegistry};

/// Keeps local git working copies in sync with their remotes.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(short, long, env = "GITSYNC_CONFIG", default_value = "gitsync.toml")]
    config: PathBuf,

    /// Address to listen on; overrides `[server] listen`.
    #[arg(short, long, env = "GITSYNC_LISTEN")]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gitsync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let env = Arc::new(GitEnvironment::detect()?);

    let repos: Vec<Arc<Repository>> = config
        .repos
        .into_iter()
        .map(|repo| Arc::new(Repository::from_config(repo, Arc::clone(&env))))
        .collect();

    for repo in &repos {
        repo.prepare()
            .await
            .with_context(|| format!("preparing {}", repo.config().path.display()))?;
    }

    let scheduler = Scheduler::new();
    for repo in &repos {
        if repo.config().hook.is_none() {
            scheduler.start(Arc::clone(repo));
        }
        let repo = Arc::clone(repo);
        tokio::spawn(async move {
            if let Err(e) = repo.pull().await {
                error!(repo = %repo.id(), error = %e, "Initial pull failed");
            }
        });
    }

    let dispatcher = Dispatcher::new(ProviderRegistry::standard(reqwest::Client::new()));
    let state = AppState::new(repos.clone(), dispatcher);
    let app = build_router(state);

    let addr = cli.listen.unwrap_or(config.listen);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("listening on {}", addr);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Cannot listen for Ctrl-C");
            }
            info!("Shutting down");
            shutdown.cancel();
        }
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .await?;

    scheduler.shutdown().await;
    for repo in &repos {
        repo.halt_actions().await;
    }
    Ok(())
}
