//! Cold storage for the persisted dataset.
//!
//! Objects are addressed by `(container, key)` and are always read and
//! written whole.

mod gcs;
mod local;

use std::fmt;
use std::path::PathBuf;

pub use gcs::GcsStore;
pub use local::FsStore;


/// Where the dataset lives in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub container: String,
    pub key: String,
}


impl ObjectLocation {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }
}


impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}


/// Errors raised by a [`ColdStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object {container}/{key} not found")]
    NotFound { container: String, key: String },

    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}


impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}


/// Whole-object blob store.
pub trait ColdStore {
    /// Whether an object exists at `(container, key)`.
    fn exists(&self, container: &str, key: &str) -> Result<bool, StoreError>;

    /// Read the full object. Fails with [`StoreError::NotFound`] if absent.
    fn read(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Replace the object unconditionally.
    fn write(
        &self,
        container: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError>;
}
