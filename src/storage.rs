//! Name-to-bytes access confined to the storage root.
//!
//! Resolution works like a base-path filesystem: the requested name is
//! normalised on its own (absolute names are re-rooted, `..` may not climb
//! above the root), joined to the root, and the canonical result must still
//! sit under the canonical root. Anything that would land outside, including
//! through a symlink, reads as "not found".

use std::{
    io,
    path::{Component, Path, PathBuf},
    time::SystemTime,
};

use tokio::fs::File;

use crate::error::{Error, Result};

/// The directory all served files must live under.
#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
}

/// An open file plus the metadata needed for conditional and range serving.
///
/// The descriptor is closed when this value is dropped.
#[derive(Debug)]
pub struct OpenedFile {
    pub file: File,
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Resolved location on disk.
    pub path: PathBuf,
}

impl StorageRoot {
    pub fn open(path: &Path) -> Result<Self> {
        let root = path.canonicalize().map_err(|e| {
            Error::Config(format!(
                "storage directory {} is not usable: {e}",
                path.display()
            ))
        })?;
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "storage path is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve `name` to a location under the root without touching disk.
    ///
    /// Returns `None` when `..` components would climb above the root.
    pub fn confine(&self, name: &str) -> Option<PathBuf> {
        let mut rel = PathBuf::new();
        for component in Path::new(name).components() {
            match component {
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if !rel.pop() {
                        return None;
                    }
                }
                Component::Normal(part) => rel.push(part),
            }
        }
        Some(self.root.join(rel))
    }

    /// Open `name` for reading.
    ///
    /// Fails with `NotFound` when the file is missing, is not a regular file,
    /// or resolves outside the root, and with `Access` on any other I/O error.
    pub async fn open_file(&self, name: &str) -> Result<OpenedFile> {
        let not_found = || Error::NotFound {
            kind: "file",
            name: name.to_string(),
        };

        let Some(candidate) = self.confine(name) else {
            tracing::warn!(name, "rejected path escaping the storage root");
            return Err(not_found());
        };

        let resolved = match tokio::fs::canonicalize(&candidate).await {
            Ok(p) => p,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(not_found());
            }
            Err(e) => return Err(access(&candidate, e)),
        };
        if !resolved.starts_with(&self.root) {
            tracing::warn!(name, "rejected symlink escaping the storage root");
            return Err(not_found());
        }

        let file = match File::open(&resolved).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(not_found());
            }
            Err(e) => return Err(access(&resolved, e)),
        };
        let meta = file.metadata().await.map_err(|e| access(&resolved, e))?;
        if !meta.is_file() {
            return Err(not_found());
        }

        Ok(OpenedFile {
            file,
            size: meta.len(),
            modified: meta.modified().ok(),
            path: resolved,
        })
    }
}

fn access(path: &Path, source: io::Error) -> Error {
    Error::Access {
        path: path.to_path_buf(),
        source,
    }
}
