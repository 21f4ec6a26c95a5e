//! warmpool worker
//!
//! Keeps a pool of pre-built, idled instances on the hosting platform so that
//! users can claim one without waiting for a cold deploy. Every interval it
//! tops the pool up to its target size and retires instances built from an
//! outdated template.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warmpool_platform::{HttpPlatform, Platform, TemplateBundle};
use warmpool_worker::{config, pool::PoolWorker};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to POOL_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting warmpool worker");
    info!(
        api_url = %config.api_url,
        pool = %config.pool_name,
        pool_size = config.pool_size,
        batch_size = config.batch_size,
        check_interval_secs = config.check_interval.as_secs(),
        "Configuration loaded"
    );

    let bundle = TemplateBundle::open(&config.template_dir, config.template_version.clone())
        .with_context(|| format!("failed to load template from {}", config.template_dir.display()))?;
    info!(
        template_dir = %bundle.dir().display(),
        template_version = %bundle.version(),
        "Template loaded"
    );

    let platform: Arc<dyn Platform> = Arc::new(
        HttpPlatform::new(&config.api_url, &config.api_key)
            .context("failed to create platform client")?,
    );

    let worker = PoolWorker::new(platform, Arc::new(bundle), &config);
    let shutdown = CancellationToken::new();

    let mut worker_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut worker_handle => {
            return match result {
                Ok(Ok(())) => {
                    info!("Pool worker exited");
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Pool worker failed");
                    Err(e.into())
                }
                Err(e) => {
                    error!(error = %e, "Pool worker task panicked");
                    Err(e.into())
                }
            };
        }
    }

    shutdown.cancel();

    info!("Waiting for pool worker to shut down...");
    let shutdown_timeout = Duration::from_secs(30);
    match tokio::time::timeout(shutdown_timeout, worker_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "Pool worker failed during shutdown"),
        Ok(Err(e)) => error!(error = %e, "Pool worker task panicked"),
        Err(_) => warn!("Pool worker did not shut down in time"),
    }

    info!("warmpool worker shutdown complete");
    Ok(())
}
