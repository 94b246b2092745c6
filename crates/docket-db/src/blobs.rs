//! Filesystem blob store for uploaded document bytes.
//!
//! Documents reference their content by a relative `storage_path`; this
//! backend resolves it beneath a root directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use docket_core::{BlobStore, Error, Result};

/// Filesystem implementation of [`BlobStore`].
#[derive(Debug, Clone)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a storage path, rejecting anything that could escape the root.
    fn full_path(&self, storage_path: &str) -> Result<PathBuf> {
        let relative = Path::new(storage_path);
        let safe = !storage_path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(Error::InvalidInput(format!(
                "Invalid storage path: {}",
                storage_path
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Round-trip a probe file to catch permission or mount problems at startup.
    pub async fn validate(&self) -> Result<()> {
        let probe = ".health-check/probe.bin";
        let data = b"docket-storage-health-check";
        self.write(probe, data).await?;
        let read_back = self.read(probe).await?;
        if read_back != data {
            return Err(Error::Internal("blob store read-back mismatch".to_string()));
        }
        let path = self.full_path(probe)?;
        fs::remove_file(&path).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn read(&self, storage_path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(storage_path)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound(format!(
                "blob {}",
                storage_path
            ))),
            Err(e) => {
                warn!(storage_path, error = %e, "blob_store: read failed");
                Err(e.into())
            }
        }
    }

    async fn write(&self, storage_path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(storage_path)?;
        debug!(storage_path, size = data.len(), "blob_store: write");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Temp file + rename keeps readers from seeing partial content.
        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "blob_store: rename failed");
            e
        })?;
        Ok(())
    }

    async fn exists(&self, storage_path: &str) -> Result<bool> {
        let full_path = self.full_path(storage_path)?;
        Ok(fs::try_exists(&full_path).await?)
    }
}
