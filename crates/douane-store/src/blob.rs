//! Filesystem document store
//!
//! Documents live under a root directory and are addressed by relative
//! paths such as `tariffs/2024.pdf`. Paths that would leave the root are
//! refused.

use crate::StoreError;
use async_trait::async_trait;
use douane_domain::traits::DocumentStore;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Document store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    /// Create a store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative document path under the root
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        if path.trim().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StoreError::InvalidData(format!(
                "document path '{}' must be relative and stay inside the store",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    type Error = StoreError;

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, Self::Error> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => {
                debug!(path, bytes = bytes.len(), "document fetched");
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, path: &str, data: &[u8]) -> Result<(), Self::Error> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, data).await?;
        debug!(path, bytes = data.len(), "document stored");
        Ok(())
    }
}
