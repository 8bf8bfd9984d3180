use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use flyer_finder::render::RendererPool;
use flyer_finder::render::chromium::ChromiumRenderer;
use flyer_finder::{DiscoveryOrchestrator, EngineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = EngineConfig::from_env()?;
    let city = std::env::var("FLYER_CITY").unwrap_or_else(|_| "Stockholm".to_string());
    info!("Starting flyer discovery for {} on {}", city, config.platform_base_url);

    let pool = match ChromiumRenderer::launch(&config.render, &config.politeness.user_agent).await {
        Ok(renderer) => RendererPool::new(Arc::new(renderer), config.render.max_sessions),
        Err(e) => {
            warn!("Rendering engine unavailable, continuing with static fetching only: {}", e);
            RendererPool::disabled()
        }
    };

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling discovery session");
            let _ = cancel_tx.send(true);
        }
    });

    let orchestrator = DiscoveryOrchestrator::new(config, pool.clone())?;
    let report = orchestrator.run_with_cancel(&city, cancel_rx).await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Err(e) = pool.shutdown().await {
        error!("Error shutting down rendering engine: {}", e);
    }
    Ok(())
}
