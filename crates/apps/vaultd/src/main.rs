//! vaultd - Mailvault sync daemon
//!
//! Serves the full-sync HTTP API on top of the mail crate's coordinator.

use anyhow::{Context, Result};
use log::{error, info};
use mail::{GmailCredentials, JobRegistry, MailStore, SqliteMailStore, SyncCoordinator};
use std::sync::Arc;

mod error;
mod routes;
mod settings;
mod state;

use settings::DaemonConfig;
use state::{AppState, GmailTransportFactory};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let daemon_config = DaemonConfig::load().context("Failed to load vaultd.json")?;

    let db_path = daemon_config.database_path()?;
    info!("Opening database at {}", db_path.display());
    let store: Arc<dyn MailStore> = Arc::new(SqliteMailStore::new(&db_path)?);

    let encryptor = Arc::new(daemon_config.encryptor()?);
    let credentials = GmailCredentials::load().with_context(|| {
        match GmailCredentials::default_credentials_path() {
            Some(path) => format!(
                "Gmail credentials not found; place them at {} or set GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
                path.display()
            ),
            None => "Gmail credentials not found; set GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET"
                .to_string(),
        }
    })?;

    let coordinator = Arc::new(SyncCoordinator::new(
        store.clone(),
        encryptor,
        Arc::new(JobRegistry::new()),
        daemon_config.sync.clone(),
    ));

    let transports = Arc::new(GmailTransportFactory::new(credentials, store.clone()));
    let state = AppState {
        store,
        coordinator,
        transports,
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&daemon_config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", daemon_config.bind_addr))?;
    info!("[HTTP] Listening on http://{}", daemon_config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let term = async {
        if let Ok(mut s) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            s.recv().await;
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }
}
