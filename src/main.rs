mod api;
mod channels;
mod clock;
mod config;
mod db;
mod error;
mod health;
mod jenkins_client;
mod jenkins_types;
mod models;
mod monitor;
mod notifier;
mod state;

use crate::channels::{EmailChannel, WebhookChannel};
use crate::config::Config;
use crate::health::{HealthService, HealthThresholds};
use crate::jenkins_client::JenkinsClient;
use crate::monitor::{JobMonitor, MonitorSettings};
use crate::notifier::{NotificationChannel, Notifier};
use crate::state::AppState;
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

fn build_channels(config: &Config) -> Vec<Arc<dyn NotificationChannel>> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();

    if let Some(url) = config.notifications.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
        channels.push(Arc::new(WebhookChannel::new(url.trim())));
    }
    if let Some(smtp) = &config.notifications.smtp {
        match EmailChannel::new(smtp) {
            Ok(email) => channels.push(Arc::new(email)),
            Err(e) => error!("Email notifications disabled: {}", e),
        }
    }

    if channels.is_empty() {
        warn!("No notification channels configured; failures will only be logged");
    }
    channels
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::new().expect("Failed to load config");
    let config = Arc::new(config);

    let notifier = Arc::new(Notifier::new(build_channels(&config)));

    let health = match db::SqliteBuildStore::connect(&config.database.url).await {
        Ok(store) => Some(Arc::new(HealthService::new(
            Arc::new(store),
            HealthThresholds::from(&config.health),
        ))),
        Err(e) => {
            warn!("Build history unavailable ({}): {}", config.database.url, e);
            None
        }
    };

    let (jenkins, monitor) = match config.jenkins.credentials() {
        Ok(creds) => {
            let client = Arc::new(JenkinsClient::new(&creds, &config.jenkins));
            let mut settings = MonitorSettings::from_config(&config.monitor, config.jenkins.job_filter_regex.as_deref());
            settings.build_time_threshold_secs = Some(config.health.build_time_threshold_minutes * 60);

            let mut monitor = JobMonitor::new(client.clone(), notifier.clone(), settings);
            if let Some(health) = &health {
                monitor = monitor.with_health(health.clone());
            }
            let monitor = Arc::new(monitor);
            if config.monitor.enabled {
                monitor.start().await;
            }
            (Some(client), Some(monitor))
        }
        Err(e) => {
            warn!("{}; monitoring disabled", e);
            (None, None)
        }
    };

    let state = AppState {
        config: config.clone(),
        jenkins,
        monitor: monitor.clone(),
        notifier,
        health,
    };

    let app = api::app_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server running on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    if let Some(monitor) = monitor {
        monitor.stop().await;
    }
    info!("Shutdown complete");

    Ok(())
}
