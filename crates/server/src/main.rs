mod api;
mod bootstrap;
mod health;
mod notifier;
mod service;

use std::sync::Arc;

use anyhow::Result;

use signoff_core::config::{AppConfig, LoadOptions};
use signoff_core::identity::InMemoryIdentityGateway;
use signoff_core::notify::NotificationHook;
use signoff_db::store::SqlWorkflowStore;

use crate::notifier::WebhookNotifier;
use crate::service::WorkflowService;

fn init_logging(config: &AppConfig) {
    use signoff_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let notifier: Option<Arc<dyn NotificationHook>> =
        match WebhookNotifier::from_config(&app.config.notifier) {
            Ok(Some(webhook)) => Some(Arc::new(webhook)),
            Ok(None) => None,
            Err(error) => return Err(anyhow::anyhow!("notifier setup failed: {error}")),
        };
    tracing::info!(
        event_name = "system.server.notifier_mode",
        correlation_id = "bootstrap",
        workflow_id = "unknown",
        notifier_mode = if notifier.is_some() { "webhook" } else { "disabled" },
        "notification hook initialized"
    );

    let store = Arc::new(SqlWorkflowStore::new(app.db_pool.clone()));
    let identity = Arc::new(InMemoryIdentityGateway::new());
    let service = Arc::new(WorkflowService::new(store, identity, notifier));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        workflow_id = "unknown",
        bind_address = %address,
        "signoff-server started"
    );

    axum::serve(listener, api::router(service)).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        workflow_id = "unknown",
        "signoff-server stopping"
    );

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            workflow_id = "unknown",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
