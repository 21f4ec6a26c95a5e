//! # warmpool-platform
//!
//! Client side of the hosting platform that runs pool instances.
//!
//! ## Modules
//!
//! - `instance`: remote instance records as the platform reports them
//! - `bundle`: the template directory an instance is built from
//! - `client`: the [`Platform`] interface and its HTTP implementation
//!
//! The pool worker only ever talks to the platform through [`Platform`], so
//! tests substitute an in-memory implementation.

mod bundle;
mod client;
mod error;
mod instance;

pub use bundle::{ensure_template_dir, TemplateBundle};
pub use client::{HttpPlatform, Platform};
pub use error::{BundleError, PlatformError};
pub use instance::{Instance, InstanceId, InstanceState};

/// Re-export so consumers don't need a direct dependency for the version tag.
pub use warmpool_reconcile::TemplateVersion;
