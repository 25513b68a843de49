use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs as tokio_fs;

use crate::core::{ContentAddress, IpfsError, Metadata, Result};
use crate::utils;
use super::MetadataStore;

static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// On-disk document for one address
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMetadata {
    address: ContentAddress,
    #[serde(with = "chrono::serde::ts_seconds")]
    updated_at: DateTime<Utc>,
    entries: Metadata,
}

/// Metadata persisted as one JSON file per address under a directory.
///
/// Files are written to a temporary sibling and renamed into place, so a
/// reader sees either the previous or the new document.
#[derive(Debug, Clone)]
pub struct FileMetadataStore {
    dir: PathBuf,
}

impl FileMetadataStore {
    /// Store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, address: &ContentAddress) -> PathBuf {
        // addresses are validated alphanumeric, so they are safe file names
        self.dir.join(format!("{}.json", address))
    }

    /// Temporary sibling unique to this process and write
    fn tmp_path_for(&self, address: &ContentAddress) -> PathBuf {
        let sequence = TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!("{}.json.{}.{}.tmp", address, std::process::id(), sequence))
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn set(&self, address: &ContentAddress, metadata: &Metadata) -> Result<()> {
        utils::ensure_dir_exists(&self.dir).await?;

        let document = StoredMetadata {
            address: address.clone(),
            updated_at: Utc::now(),
            entries: metadata.clone(),
        };
        let json = serde_json::to_string_pretty(&document)?;

        let path = self.path_for(address);
        let tmp = self.tmp_path_for(address);
        tokio_fs::write(&tmp, json).await?;
        if let Err(e) = tokio_fs::rename(&tmp, &path).await {
            let _ = tokio_fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        log::debug!("Stored {} metadata entries for {}", metadata.len(), address);
        Ok(())
    }

    async fn get(&self, address: &ContentAddress) -> Result<Option<Metadata>> {
        let path = self.path_for(address);
        let content = match tokio_fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let document: StoredMetadata = serde_json::from_str(&content).map_err(|e| {
            IpfsError::Validation(format!("corrupt metadata file {}: {}", path.display(), e))
        })?;
        Ok(Some(document.entries))
    }

    async fn remove(&self, address: &ContentAddress) -> Result<bool> {
        match tokio_fs::remove_file(self.path_for(address)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<ContentAddress>> {
        let mut entries = match tokio_fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut addresses = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem,
                None => continue,
            };
            match ContentAddress::parse(stem) {
                Ok(address) => addresses.push(address),
                Err(_) => log::warn!("Skipping unexpected file in metadata store: {}", path.display()),
            }
        }
        addresses.sort();
        Ok(addresses)
    }
}
