//! Pool background worker.
//!
//! Runs the pool reconciliation loop on a periodic interval.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use warmpool_platform::{ensure_template_dir, BundleError, Platform, TemplateBundle};

use super::reconciler::PoolReconciler;
use crate::config::Config;

/// Errors that stop the worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("template unavailable: {0}")]
    Template(#[from] BundleError),
}

/// Worker that keeps the pool reconciled.
pub struct PoolWorker {
    reconciler: PoolReconciler,
    template_dir: PathBuf,
    interval: Duration,
}

impl PoolWorker {
    pub fn new(platform: Arc<dyn Platform>, bundle: Arc<TemplateBundle>, config: &Config) -> Self {
        Self {
            template_dir: bundle.dir().to_path_buf(),
            reconciler: PoolReconciler::new(platform, bundle, config),
            interval: config.check_interval,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Checks the pool once immediately, then once per interval. Cycles never
    /// overlap; a slow cycle delays the next tick instead of queueing ticks.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        info!(
            interval_secs = self.interval.as_secs(),
            template_dir = %self.template_dir.display(),
            "Starting pool worker"
        );

        ensure_template_dir(&self.template_dir)?;

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the startup cycle stands in for it.
        interval.tick().await;

        self.run_cycle(&shutdown).await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Pool worker shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {
                    self.run_cycle(&shutdown).await;
                }
            }
        }
    }

    /// Run a single reconciliation cycle, logging the outcome.
    async fn run_cycle(&self, shutdown: &CancellationToken) {
        match self.reconciler.reconcile(shutdown).await {
            Ok(report) => {
                info!(
                    current = report.current,
                    outdated = report.outdated,
                    added = report.deployed,
                    removed = report.removed,
                    removal_failures = report.removal_failures,
                    "Pool reconciliation complete"
                );
            }
            Err(e) if e.is_cancelled() => {
                info!(error = %e, "Pool reconciliation interrupted by shutdown");
            }
            Err(e) => {
                error!(error = %e, "Pool reconciliation failed");
            }
        }
    }
}
