//! Filesystem-backed [`FileStore`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{FileStore, PART_SUFFIX, StorageError, StoredFile, generated_name};
use crate::config::StorageConfig;

/// Writes uploads into a single root directory.
///
/// Every write goes to a hidden `.<uuid>.part` file in the root, is flushed to disk and is then
/// renamed onto its final name, so a file visible under its generated name is always complete.
/// If the write fails or its future is dropped (client disconnect), the part file is removed.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    public_path: String,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>, public_path: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_path: public_path.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.root.clone(), config.public_path.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove part files left behind by a process that died mid-write.
    ///
    /// Returns the number of files removed. A missing root is not an error.
    pub async fn sweep_partial_files(&self) -> Result<usize, StorageError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_part_file(name) {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = name, error = %e, "Failed to remove stale part file"),
            }
        }

        Ok(removed)
    }
}

fn is_part_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PART_SUFFIX)
}

#[async_trait]
impl FileStore for LocalFileStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()), err)]
    async fn store(&self, original_name: &str, bytes: Bytes) -> Result<StoredFile, StorageError> {
        let generated = generated_name(original_name)?;

        self.write_into_place(&generated, &bytes).await?;
        debug!(generated_name = %generated, "Stored file");

        Ok(StoredFile {
            relative_path: format!("{}/{}", self.public_path, generated),
            generated_name: generated,
            original_name: original_name.to_string(),
            byte_size: bytes.len() as u64,
        })
    }
}

impl LocalFileStore {
    /// Write `bytes` to a part file and rename it onto `name` inside the root.
    async fn write_into_place(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        // Idempotent, and tolerant of concurrent creation by other requests
        fs::create_dir_all(&self.root).await?;

        let part_path = self.root.join(format!(".{}{}", Uuid::new_v4(), PART_SUFFIX));
        let final_path = self.root.join(name);

        let part_guard = scopeguard::guard(part_path, |path| {
            if let Err(e) = std::fs::remove_file(&path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "Failed to remove abandoned part file");
            }
        });

        let mut file = fs::OpenOptions::new().write(true).create_new(true).open(&*part_guard).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&*part_guard, &final_path).await?;
        // Renamed into place - nothing left to clean up
        scopeguard::ScopeGuard::into_inner(part_guard);

        Ok(())
    }
}
