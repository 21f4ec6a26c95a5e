//! Remote instance records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warmpool_reconcile::TemplateVersion;

/// Platform-assigned instance identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wrap a platform identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Lifecycle state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Source uploaded, build in progress.
    Building,

    /// Built and scaled to zero.
    Idle,

    /// Built and serving.
    Running,

    /// Deletion requested or completed.
    Deleted,

    /// The build failed; the instance will never become healthy.
    Failed,
}

impl InstanceState {
    /// Returns true once the build finished successfully.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Idle | Self::Running)
    }

    /// Returns true if the instance can no longer become healthy.
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Deleted | Self::Failed)
    }

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pool instance as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,

    pub name: String,

    /// Public URL, known once the platform has assigned a route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,

    pub template_version: TemplateVersion,

    pub state: InstanceState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}
