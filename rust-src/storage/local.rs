//! Filesystem-backed store.
//!
//! A container is a directory under the store root; a key is a relative path
//! inside it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::{ColdStore, StoreError};


/// Store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}


impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `(container, key)` to a path, refusing anything that would
    /// land outside the container directory.
    pub fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, StoreError> {
        check_segment(container, "container must be a single path segment")?;

        if key.is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: "key is empty",
            });
        }
        let key_path = Path::new(key);
        if !key_path.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: "key must be a relative path without '..'",
            });
        }

        Ok(self.root.join(container).join(key_path))
    }
}


impl ColdStore for FsStore {
    fn exists(&self, container: &str, key: &str) -> Result<bool, StoreError> {
        let path = self.object_path(container, key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io { path, source: e }),
        }
    }

    fn read(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(container, key)?;
        debug!(path = %path.display(), "reading object");

        fs::read(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::NotFound {
                    container: container.to_string(),
                    key: key.to_string(),
                }
            } else {
                StoreError::Io { path, source: e }
            }
        })
    }

    fn write(
        &self,
        container: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError> {
        let path = self.object_path(container, key)?;
        debug!(path = %path.display(), bytes = bytes.len(), content_type, "writing object");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        // Write beside the target and rename so readers never see a partial object.
        let tmp_path = temp_path_for(&path);
        fs::write(&tmp_path, bytes).map_err(|e| StoreError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io { path, source: e }
        })
    }
}


fn check_segment(segment: &str, reason: &'static str) -> Result<(), StoreError> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StoreError::InvalidKey {
            key: segment.to_string(),
            reason,
        }),
    }
}


fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
}
