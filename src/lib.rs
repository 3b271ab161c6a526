pub mod error;
pub mod monitor;
pub mod service;
pub mod session;
pub mod turn;

use service::{AppContext, SessionBackend, SettingsStore};
use tracing::{info, warn};
use turn::Settings;

/// Runs until SIGINT/SIGTERM, then shuts down in order.
pub async fn run(settings: Settings, backend: Option<SessionBackend>) -> anyhow::Result<()> {
    let mut settings = settings;
    let overrides = SettingsStore::new(settings.json_config.clone()).load().await;
    if !overrides.is_empty() {
        info!("applying {} saved setting(s) from {}", overrides.len(), settings.json_config.display());
        settings.apply_overrides(&overrides);
    }

    let mut app = AppContext::new(settings);
    if let Some(backend) = backend {
        app = app.with_sessions(backend);
    }
    app.start().await?;

    shutdown_signal().await;
    info!("shutdown signal received");
    app.stop().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("could not listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
