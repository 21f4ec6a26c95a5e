//! Warm pool maintenance.
//!
//! The pool module is responsible for:
//! - Classifying pool instances by template version
//! - Deploying new instances when the pool is short
//! - Retiring instances built from an outdated template
//! - Driving reconciliation on a fixed interval

mod deployer;
mod reconciler;
mod remover;
mod worker;

pub use deployer::{BatchError, DeployError, DeploySettings, Deployer};
pub use reconciler::{CycleReport, PoolReconciler, ReconcileError, ReconcileResult};
pub use remover::{RemovalSummary, Remover};
pub use worker::{PoolWorker, WorkerError};
