//! Deploying new pool instances.
//!
//! A deploy is create → wait until built → scale to zero. Batches run as a
//! task group sharing one cancellation token: the first failure cancels the
//! token so sibling deploys stop spending platform resources.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use warmpool_platform::{
    Instance, InstanceId, InstanceState, Platform, PlatformError, TemplateBundle,
};

/// Errors from deploying a single instance.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("deploy cancelled")]
    Cancelled,

    #[error("failed to create instance: {0}")]
    Create(#[source] PlatformError),

    #[error("failed to poll instance {id}: {source}")]
    Poll {
        id: InstanceId,
        #[source]
        source: PlatformError,
    },

    #[error("instance {id} build ended in state {state}")]
    BuildFailed { id: InstanceId, state: InstanceState },

    #[error("timeout after {elapsed:?} waiting for instance {id} to build")]
    Timeout { id: InstanceId, elapsed: Duration },

    #[error("failed to scale instance {id} to idle: {source}")]
    Scale {
        id: InstanceId,
        #[source]
        source: PlatformError,
    },

    #[error("deploy task failed: {0}")]
    Task(String),
}

/// Outcome of a batch in which at least one deploy failed.
#[derive(Debug, Error)]
#[error("{source} ({} of {attempted} deployed, {cancelled} cancelled)", .deployed.len())]
pub struct BatchError {
    /// First failure observed in the batch.
    #[source]
    pub source: DeployError,

    pub attempted: usize,

    /// Deploys that finished before the batch was cancelled.
    pub deployed: Vec<Instance>,

    /// Deploys that stopped because the batch was cancelled.
    pub cancelled: usize,
}

impl BatchError {
    /// Returns true if nothing failed and the batch only stopped because its
    /// token was cancelled from outside.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, DeployError::Cancelled)
    }
}

/// Timing knobs for a deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploySettings {
    /// Delay between build status polls.
    pub health_poll_interval: Duration,

    /// Upper bound on waiting for a build.
    pub deploy_timeout: Duration,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            health_poll_interval: Duration::from_secs(5),
            deploy_timeout: Duration::from_secs(600),
        }
    }
}

/// Deploys instances from the template bundle.
#[derive(Clone)]
pub struct Deployer {
    platform: Arc<dyn Platform>,
    bundle: Arc<TemplateBundle>,
    pool: String,
    settings: DeploySettings,
}

impl Deployer {
    pub fn new(
        platform: Arc<dyn Platform>,
        bundle: Arc<TemplateBundle>,
        pool: impl Into<String>,
        settings: DeploySettings,
    ) -> Self {
        Self {
            platform,
            bundle,
            pool: pool.into(),
            settings,
        }
    }

    /// Deploy one instance and scale it to zero.
    ///
    /// Returns [`DeployError::Cancelled`] as soon as `cancel` fires. A remote
    /// instance created before cancellation is left as it is.
    pub async fn deploy_and_idle(&self, cancel: &CancellationToken) -> Result<Instance, DeployError> {
        self.deploy_cancellable(cancel, true).await
    }

    /// Deploy one instance and leave it serving.
    pub async fn deploy_running(&self, cancel: &CancellationToken) -> Result<Instance, DeployError> {
        self.deploy_cancellable(cancel, false).await
    }

    /// Deploy `count` instances concurrently.
    ///
    /// The first failure cancels `cancel`, every task is joined, and the first
    /// failure is returned. Succeeds only if every deploy succeeded. If
    /// `cancel` fires with no failure, the error is [`DeployError::Cancelled`].
    #[instrument(skip(self, cancel), fields(pool = %self.pool))]
    pub async fn deploy_batch(
        &self,
        count: usize,
        cancel: CancellationToken,
    ) -> Result<Vec<Instance>, BatchError> {
        let mut tasks = JoinSet::new();
        for _ in 0..count {
            let deployer = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { deployer.deploy_and_idle(&cancel).await });
        }

        let mut deployed = Vec::with_capacity(count);
        let mut first_error: Option<DeployError> = None;
        let mut cancelled = 0;

        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(DeployError::Task(e.to_string())));
            match result {
                Ok(instance) => deployed.push(instance),
                Err(DeployError::Cancelled) => cancelled += 1,
                Err(e) => {
                    if first_error.is_none() {
                        warn!(error = %e, "Deploy failed, cancelling the rest of the batch");
                        cancel.cancel();
                        first_error = Some(e);
                    } else {
                        warn!(error = %e, "Additional deploy failure in batch");
                    }
                }
            }
        }

        let source = match first_error {
            Some(source) => source,
            None if cancelled > 0 => {
                info!(cancelled, deployed = deployed.len(), "Deploy batch cancelled");
                DeployError::Cancelled
            }
            None => return Ok(deployed),
        };
        Err(BatchError {
            source,
            attempted: count,
            deployed,
            cancelled,
        })
    }

    async fn deploy_cancellable(
        &self,
        cancel: &CancellationToken,
        idle: bool,
    ) -> Result<Instance, DeployError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(pool = %self.pool, "Deploy abandoned on cancellation");
                Err(DeployError::Cancelled)
            }
            result = self.deploy(idle) => result,
        }
    }

    async fn deploy(&self, idle: bool) -> Result<Instance, DeployError> {
        let created = self
            .platform
            .create_instance(&self.pool, &self.bundle)
            .await
            .map_err(DeployError::Create)?;
        info!(
            instance_id = %created.id,
            template_version = %created.template_version,
            "Created instance"
        );

        let mut instance = self.wait_until_built(created).await?;

        if idle {
            self.platform
                .scale_instance(&instance.id, 0)
                .await
                .map_err(|source| DeployError::Scale {
                    id: instance.id.clone(),
                    source,
                })?;
            instance.state = InstanceState::Idle;
            info!(instance_id = %instance.id, "Instance built and idled");
        }

        Ok(instance)
    }

    async fn wait_until_built(&self, mut instance: Instance) -> Result<Instance, DeployError> {
        let start = Instant::now();

        loop {
            if instance.state.is_healthy() {
                return Ok(instance);
            }
            if instance.state.is_dead() {
                return Err(DeployError::BuildFailed {
                    id: instance.id,
                    state: instance.state,
                });
            }

            let elapsed = start.elapsed();
            if elapsed >= self.settings.deploy_timeout {
                return Err(DeployError::Timeout {
                    id: instance.id,
                    elapsed,
                });
            }

            tokio::time::sleep(self.settings.health_poll_interval).await;
            debug!(instance_id = %instance.id, "Polling build status");

            instance = self
                .platform
                .get_instance(&instance.id)
                .await
                .map_err(|source| DeployError::Poll {
                    id: instance.id.clone(),
                    source,
                })?;
        }
    }
}
