//! Template bundles.
//!
//! A bundle is the directory new pool instances are built from. Its version
//! is a content hash over every regular file in the tree, so editing the
//! template retires the instances built from the previous contents.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;
use warmpool_reconcile::TemplateVersion;

use crate::error::BundleError;

/// Check that a template directory exists and is a directory.
pub fn ensure_template_dir(path: &Path) -> Result<(), BundleError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(BundleError::NotADirectory(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(BundleError::Missing(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// A template directory and its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateBundle {
    dir: PathBuf,
    version: TemplateVersion,
}

impl TemplateBundle {
    /// Load a bundle, deriving its version from the directory contents.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, BundleError> {
        let dir = dir.into();
        ensure_template_dir(&dir)?;

        let mut files = Vec::new();
        collect_files(&dir, &dir, &mut files)?;
        let version = TemplateVersion::from_files(files.iter().map(|(p, c)| (p, c)));

        debug!(
            dir = %dir.display(),
            files = files.len(),
            version = %version,
            "Loaded template bundle"
        );

        Ok(Self { dir, version })
    }

    /// Load a bundle with an explicit version tag.
    pub fn with_version(
        dir: impl Into<PathBuf>,
        version: TemplateVersion,
    ) -> Result<Self, BundleError> {
        let dir = dir.into();
        ensure_template_dir(&dir)?;
        Ok(Self { dir, version })
    }

    /// Load a bundle, using `version` when given and the content hash otherwise.
    pub fn open(
        dir: impl Into<PathBuf>,
        version: Option<TemplateVersion>,
    ) -> Result<Self, BundleError> {
        match version {
            Some(version) => Self::with_version(dir, version),
            None => Self::load(dir),
        }
    }

    /// Template directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Version tag stamped on instances built from this bundle.
    pub fn version(&self) -> &TemplateVersion {
        &self.version
    }

    /// Pack the template directory into a gzip tarball.
    ///
    /// Blocking; call from `spawn_blocking` in async contexts.
    pub fn archive(&self) -> Result<Vec<u8>, BundleError> {
        ensure_template_dir(&self.dir)?;

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        builder.append_dir_all(".", &self.dir)?;

        let encoder = builder.into_inner()?;
        Ok(encoder.finish()?)
    }
}

/// Recursively read regular files under `dir`, keyed by `/`-separated path
/// relative to `root`.
fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, Vec<u8>)>,
) -> Result<(), BundleError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");

            let mut contents = Vec::new();
            File::open(&path)?.read_to_end(&mut contents)?;
            out.push((relative, contents));
        }
    }

    Ok(())
}
