//! Outreach: multi-step, multi-channel drip campaign service.
//!
//! Main entry point that wires the engine, starts the scheduler loop and
//! serves the marketing API.

use std::sync::Arc;

use campaign_api::ApiServer;
use campaign_channels::{ChannelRouter, InMemoryHistory, InMemoryTemplates};
use campaign_core::config::AppConfig;
use campaign_drip::{CampaignEngine, Collaborators, Scheduler};
use campaign_segmentation::InMemoryDirectory;
use clap::Parser;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "outreach")]
#[command(about = "Drip campaign scheduling and delivery service")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "OUTREACH__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "OUTREACH__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Scheduler tick interval in milliseconds (overrides config)
    #[arg(long, env = "OUTREACH__SCHEDULER__TICK_INTERVAL_MS")]
    tick_interval_ms: Option<u64>,

    /// Serve the API without running the scheduler loop
    #[arg(long, default_value_t = false)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outreach=info,campaign_drip=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Outreach starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(interval) = cli.tick_interval_ms {
        config.scheduler.tick_interval_ms = interval;
    }
    if cli.no_scheduler {
        config.scheduler.enabled = false;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        tick_interval_ms = config.scheduler.tick_interval_ms,
        scheduler = config.scheduler.enabled,
        channels = ?config.channels.enabled,
        "Configuration loaded"
    );

    // Production: swap the in-memory collaborators for the CRM directory,
    // template service, provider history feed and real channel senders.
    let collaborators = Collaborators {
        directory: Arc::new(InMemoryDirectory::new()),
        templates: Arc::new(InMemoryTemplates::new()),
        history: Arc::new(InMemoryHistory::new()),
        router: Arc::new(ChannelRouter::with_log_senders(config.channels.enabled.clone())),
    };
    let engine = Arc::new(CampaignEngine::new(config.scheduler.clone(), collaborators));

    let api_server = ApiServer::new(config.clone(), engine.clone());

    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    let scheduler = if config.scheduler.enabled {
        Some(Arc::new(Scheduler::new(engine.clone())).spawn())
    } else {
        info!("Scheduler disabled, serving API only");
        None
    };

    api_server.mark_ready();
    info!("Outreach is ready to serve traffic");

    api_server.start_http(shutdown_signal()).await?;

    if let Some(handle) = scheduler {
        handle.shutdown().await;
    }
    info!("Outreach shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
