use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::app::{router, AppContext};
use crate::auth::IdentityGate;
use crate::backend::{BackendResolver, HandlePool};
use crate::config::Settings;
use crate::plugin::PluginLoader;

#[derive(Parser, Debug)]
#[command(name = "ledger-gateway")]
#[command(about = "Authenticated HTTP gateway for pluggable ledger backends")]
#[command(version)]
pub struct Cli {
    #[arg(value_name = "SETTINGS", help = "Path to the YAML settings file")]
    pub settings: PathBuf,

    #[arg(long, help = "Listen address, overrides server.bind")]
    pub bind: Option<String>,

    #[arg(long, help = "Load settings and build one backend handle, then exit")]
    pub check: bool,
}

/// Start the gateway. Returns an error, without listening, if the backend module
/// or the identity provider cannot be set up.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = Settings::load(&cli.settings)
        .with_context(|| format!("failed to load settings from {}", cli.settings.display()))?;
    if let Some(bind) = cli.bind {
        settings.server.bind = bind;
    }

    let loader = PluginLoader::builtin();
    let resolver = BackendResolver::load(&loader, &settings.ledger)
        .with_context(|| format!("failed to load backend plugin {}", settings.ledger.plugin))?;
    let resolver = Arc::new(resolver);

    if cli.check {
        resolver
            .resolve()
            .await
            .context("backend handle construction failed")?;
        info!("Settings OK: backend plugin {} constructs handles", settings.ledger.plugin);
        return Ok(());
    }

    let gate = IdentityGate::discover(&settings.openid)
        .await
        .with_context(|| format!("failed to set up identity provider {}", settings.openid.provider))?;

    let pool = HandlePool::new(resolver, &settings.pool);
    let _reaper = pool.spawn_reaper();

    let app = router(AppContext::new(gate, pool), &settings.server);

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.server.bind))?;
    info!("Ledger gateway listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Ledger gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
