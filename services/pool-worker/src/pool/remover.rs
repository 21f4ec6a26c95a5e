//! Best-effort removal of outdated instances.

use std::sync::Arc;

use tracing::{error, info};
use warmpool_platform::{Instance, Platform};

/// Result of removing a batch of instances.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemovalSummary {
    pub removed: usize,
    pub failed: usize,
}

/// Deletes pool instances.
#[derive(Clone)]
pub struct Remover {
    platform: Arc<dyn Platform>,
}

impl Remover {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Delete one instance. Failures are logged, never returned.
    ///
    /// Returns true if the platform accepted the deletion.
    pub async fn remove(&self, instance: &Instance) -> bool {
        match self.platform.delete_instance(&instance.id).await {
            Ok(()) => {
                info!(
                    instance_id = %instance.id,
                    template_version = %instance.template_version,
                    "Removed outdated instance"
                );
                true
            }
            Err(e) => {
                error!(
                    instance_id = %instance.id,
                    error = %e,
                    "Failed to remove instance"
                );
                false
            }
        }
    }

    /// Delete instances one at a time, in order.
    pub async fn remove_all(&self, instances: &[Instance]) -> RemovalSummary {
        let mut summary = RemovalSummary::default();
        for instance in instances {
            if self.remove(instance).await {
                summary.removed += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }
}
