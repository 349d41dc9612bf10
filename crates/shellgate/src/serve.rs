//! `shellgate serve`: the remote gateway.

use std::{path::Path, sync::Arc};

use anyhow::Context as _;
use shellgate_core::{Assistant, HistoryStore, UnconfiguredAssistant};
use shellgate_executor::HttpAssistant;
use shellgate_session::{SessionDefaults, SessionRegistry};
use shellgate_transport::{Gateway, TokenAuthority, router};
use tokio::net::TcpListener;

use crate::config::{SECRET_VARS, ServerConfig};

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let history = open_history(config.history_db.as_deref()).await?;
    let assistant: Arc<dyn Assistant> = match &config.assistant {
        Some(settings) => {
            tracing::info!(endpoint = %settings.endpoint, model = %settings.model, "Assistant enabled");
            Arc::new(HttpAssistant::new(settings.clone()))
        }
        None => Arc::new(UnconfiguredAssistant),
    };

    let mut defaults = SessionDefaults::new(config.workdir.clone());
    defaults.hidden_vars = SECRET_VARS.iter().map(ToString::to_string).collect();
    let registry = Arc::new(SessionRegistry::new(defaults));

    let ttl = chrono::Duration::from_std(config.token_ttl).context("token lifetime out of range")?;
    let authority = TokenAuthority::new(config.secret.clone(), config.signing_key.as_bytes(), ttl)?;

    let gateway = Arc::new(Gateway::new(registry, history, assistant, authority));
    let app = router(gateway);

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(workdir = %config.workdir.display(), "Server listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

/// Open the configured history store, in memory when no path is given.
#[cfg(feature = "sqlite")]
pub async fn open_history(path: Option<&Path>) -> anyhow::Result<Arc<dyn HistoryStore>> {
    use shellgate_session::history::{MemoryHistory, SqliteHistory};

    Ok(match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Using SQLite history");
            Arc::new(SqliteHistory::open(path).await?)
        }
        None => Arc::new(MemoryHistory::new()),
    })
}

#[cfg(not(feature = "sqlite"))]
#[allow(clippy::unused_async)]
pub async fn open_history(path: Option<&Path>) -> anyhow::Result<Arc<dyn HistoryStore>> {
    use shellgate_session::history::MemoryHistory;

    if let Some(path) = path {
        tracing::warn!(
            path = %path.display(),
            "Built without the sqlite feature; history is kept in memory"
        );
    }
    Ok(Arc::new(MemoryHistory::new()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
