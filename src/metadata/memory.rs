use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::{ContentAddress, Metadata, Result};
use super::MetadataStore;

/// Metadata kept in process memory
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    entries: RwLock<BTreeMap<ContentAddress, Metadata>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn set(&self, address: &ContentAddress, metadata: &Metadata) -> Result<()> {
        self.entries.write().await.insert(address.clone(), metadata.clone());
        Ok(())
    }

    async fn get(&self, address: &ContentAddress) -> Result<Option<Metadata>> {
        Ok(self.entries.read().await.get(address).cloned())
    }

    async fn remove(&self, address: &ContentAddress) -> Result<bool> {
        Ok(self.entries.write().await.remove(address).is_some())
    }

    async fn list(&self) -> Result<Vec<ContentAddress>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
