//! Pool reconciler.
//!
//! One reconciliation cycle:
//! - Lists the pool and classifies it against the current template version
//! - Deploys up to one batch of new instances if the pool is short
//! - Deletes up to one batch of outdated instances
//!
//! Nothing is remembered between cycles. The listing is the only input, so a
//! missed or failed cycle is repaired by the next one.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use warmpool_platform::{Instance, Platform, PlatformError, TemplateBundle, TemplateVersion};
use warmpool_reconcile::{PoolLimits, PoolSnapshot, ReconcilePlan};

use super::deployer::{BatchError, Deployer};
use super::remover::Remover;
use crate::config::Config;

/// Result type for reconciliation.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors that end a cycle early.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to list pool instances: {0}")]
    Fetch(#[from] PlatformError),

    #[error("failed to add {requested} instances to pool: {source}")]
    Deploy {
        requested: usize,
        #[source]
        source: BatchError,
    },
}

impl ReconcileError {
    /// Returns true if the cycle ended because the caller's token was
    /// cancelled, not because anything failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Deploy { source, .. } if source.is_cancelled())
    }
}

/// What one cycle saw and did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub current: usize,
    pub outdated: usize,
    pub planned_additions: usize,
    pub deployed: usize,
    pub planned_removals: usize,
    pub removed: usize,
    pub removal_failures: usize,
}

/// Reconciles the pool against the template.
pub struct PoolReconciler {
    platform: Arc<dyn Platform>,
    pool: String,
    version: TemplateVersion,
    limits: PoolLimits,
    deployer: Deployer,
    remover: Remover,
}

impl PoolReconciler {
    pub fn new(platform: Arc<dyn Platform>, bundle: Arc<TemplateBundle>, config: &Config) -> Self {
        let version = bundle.version().clone();
        let deployer = Deployer::new(
            Arc::clone(&platform),
            bundle,
            config.pool_name.clone(),
            config.deploy_settings(),
        );

        Self {
            remover: Remover::new(Arc::clone(&platform)),
            platform,
            pool: config.pool_name.clone(),
            version,
            limits: config.limits(),
            deployer,
        }
    }

    /// List the pool and split it by template version.
    pub async fn snapshot(&self) -> Result<PoolSnapshot<Instance>, PlatformError> {
        let instances = self.platform.list_instances(&self.pool).await?;
        Ok(PoolSnapshot::classify(instances, &self.version, |i| {
            &i.template_version
        }))
    }

    /// Run one reconciliation cycle.
    ///
    /// Deploys share a child of `cancel`; a failed deploy cancels only its
    /// own batch. Removal is never interrupted once started.
    #[instrument(skip(self, cancel), fields(pool = %self.pool, template_version = %self.version))]
    pub async fn reconcile(&self, cancel: &CancellationToken) -> ReconcileResult<CycleReport> {
        let snapshot = self.snapshot().await?;
        let plan = ReconcilePlan::compute(&snapshot, self.limits);

        let mut report = CycleReport {
            current: snapshot.current.len(),
            outdated: snapshot.outdated.len(),
            planned_additions: plan.additions,
            planned_removals: plan.removals,
            ..CycleReport::default()
        };
        debug!(
            current = report.current,
            outdated = report.outdated,
            pool_size = self.limits.pool_size,
            batch_size = self.limits.batch_size,
            "Pool state"
        );

        if plan.additions > 0 {
            info!(num = plan.additions, "Adding instances to pool");
            let deployed = self
                .deployer
                .deploy_batch(plan.additions, cancel.child_token())
                .await
                .map_err(|source| ReconcileError::Deploy {
                    requested: plan.additions,
                    source,
                })?;
            report.deployed = deployed.len();
        }

        // Uses the listing from before the deploys; anything it misses is
        // picked up next cycle.
        if plan.removals > 0 {
            info!(num = plan.removals, "Removing outdated instances from pool");
            let summary = self
                .remover
                .remove_all(&snapshot.outdated[..plan.removals])
                .await;
            report.removed = summary.removed;
            report.removal_failures = summary.failed;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use warmpool_platform::{InstanceId, InstanceState};
    use warmpool_testing::{instance, template_dir, CreateBehavior, FakePlatform};

    fn config(dir: &tempfile::TempDir, pool_size: usize, batch_size: usize) -> Config {
        Config {
            api_key: "test".to_string(),
            api_url: "http://127.0.0.1:0".to_string(),
            pool_name: "editor".to_string(),
            pool_size,
            batch_size,
            check_interval: Duration::from_secs(60),
            template_dir: dir.path().to_path_buf(),
            template_version: Some(TemplateVersion::new("v2")),
            deploy_timeout: Duration::from_secs(5),
            health_poll_interval: Duration::from_millis(5),
            log_level: "debug".to_string(),
        }
    }

    fn reconciler(platform: &Arc<FakePlatform>, config: &Config) -> PoolReconciler {
        let bundle = TemplateBundle::open(&config.template_dir, config.template_version.clone())
            .unwrap();
        PoolReconciler::new(platform.clone(), Arc::new(bundle), config)
    }

    #[tokio::test]
    async fn test_tops_up_and_retires() {
        let dir = template_dir();
        let config = config(&dir, 5, 2);
        let platform = Arc::new(FakePlatform::new().with_instances(vec![
            instance("cur-1", "v2", InstanceState::Idle),
            instance("old-1", "v1", InstanceState::Idle),
            instance("cur-2", "v2", InstanceState::Idle),
            instance("old-2", "v1", InstanceState::Idle),
            instance("cur-3", "v2", InstanceState::Idle),
            instance("old-3", "v0", InstanceState::Idle),
        ]));

        let report = reconciler(&platform, &config)
            .reconcile(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            report,
            CycleReport {
                current: 3,
                outdated: 3,
                planned_additions: 2,
                deployed: 2,
                planned_removals: 2,
                removed: 2,
                removal_failures: 0,
            }
        );
        // Oldest-listed outdated instances go first.
        assert_eq!(
            platform.deleted(),
            vec![InstanceId::new("old-1"), InstanceId::new("old-2")]
        );
        assert_eq!(platform.scaled().len(), 2);
    }

    #[tokio::test]
    async fn test_full_pool_is_noop() {
        let dir = template_dir();
        let config = config(&dir, 2, 2);
        let platform = Arc::new(FakePlatform::new().with_instances(vec![
            instance("cur-1", "v2", InstanceState::Idle),
            instance("cur-2", "v2", InstanceState::Idle),
            instance("cur-3", "v2", InstanceState::Running),
        ]));

        let report = reconciler(&platform, &config)
            .reconcile(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.planned_additions, 0);
        assert_eq!(report.planned_removals, 0);
        // Only the listing call.
        assert_eq!(platform.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_cycle() {
        let dir = template_dir();
        let config = config(&dir, 5, 2);
        let platform = Arc::new(FakePlatform::new().failing_list("platform down"));

        let err = reconciler(&platform, &config)
            .reconcile(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Fetch(_)));
        assert!(platform.created().is_empty());
        assert!(platform.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_failure_skips_removal() {
        let dir = template_dir();
        let config = config(&dir, 5, 2);
        let platform = Arc::new(
            FakePlatform::new()
                .with_instances(vec![instance("old-1", "v1", InstanceState::Idle)])
                .with_creates(vec![CreateBehavior::Fail("quota".into())]),
        );
        let cancel = CancellationToken::new();

        let err = reconciler(&platform, &config)
            .reconcile(&cancel)
            .await
            .unwrap_err();

        match err {
            ReconcileError::Deploy { requested, .. } => assert_eq!(requested, 2),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(platform.deleted().is_empty());
        // The batch token is a child; the caller's token stays live.
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_removal_failure_is_not_an_error() {
        let dir = template_dir();
        let config = config(&dir, 0, 2);
        let platform = Arc::new(
            FakePlatform::new()
                .with_instances(vec![
                    instance("old-1", "v1", InstanceState::Idle),
                    instance("old-2", "v1", InstanceState::Idle),
                ])
                .failing_delete("old-1"),
        );

        let report = reconciler(&platform, &config)
            .reconcile(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.removal_failures, 1);
        assert_eq!(platform.deleted(), vec![InstanceId::new("old-2")]);
    }

    #[tokio::test]
    async fn test_removal_uses_pre_deploy_snapshot() {
        let dir = template_dir();
        let config = config(&dir, 1, 1);
        let platform = Arc::new(
            FakePlatform::new().with_instances(vec![instance("old-1", "v1", InstanceState::Idle)]),
        );

        let report = reconciler(&platform, &config)
            .reconcile(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.deployed, 1);
        assert_eq!(report.removed, 1);
        // One list, then create + scale, then delete: no second listing.
        assert_eq!(platform.call_count(), 4);
    }

    #[tokio::test]
    async fn test_shutdown_during_deploy_is_cancellation() {
        let dir = template_dir();
        let config = config(&dir, 5, 2);
        let platform = Arc::new(
            FakePlatform::new()
                .with_instances(vec![instance("old-1", "v1", InstanceState::Idle)])
                .with_creates(vec![CreateBehavior::Hang, CreateBehavior::Hang]),
        );
        let reconciler = Arc::new(reconciler(&platform, &config));
        let shutdown = CancellationToken::new();

        let cycle = tokio::spawn({
            let reconciler = Arc::clone(&reconciler);
            let shutdown = shutdown.clone();
            async move { reconciler.reconcile(&shutdown).await }
        });
        while platform.call_count() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();

        let err = cycle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(platform.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_failure_is_not_cancellation() {
        let dir = template_dir();
        let config = config(&dir, 1, 1);
        let platform = Arc::new(
            FakePlatform::new().with_creates(vec![CreateBehavior::Fail("quota".into())]),
        );

        let err = reconciler(&platform, &config)
            .reconcile(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(!err.is_cancelled());
        assert!(!ReconcileError::Fetch(PlatformError::NotFound("x".into())).is_cancelled());
    }
}
