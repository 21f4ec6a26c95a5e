//! Error types for platform calls and template bundles.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading or packing a template bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("template directory {} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("template path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the hosting platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("platform rejected credentials (status {status})")]
    Unauthorized { status: u16 },

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("platform API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("template bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PlatformError {
    /// Returns true if retrying on a later cycle may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
