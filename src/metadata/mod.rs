//! Client-side metadata attached to content addresses.
//!
//! IPFS has no slot for metadata, so the association lives in a separate
//! keyed store. Writes replace whatever was stored for the address before.

mod file;
mod memory;

pub use file::FileMetadataStore;
pub use memory::MemoryMetadataStore;

use async_trait::async_trait;

use crate::core::{ContentAddress, Metadata, Result};

/// Keyed store of metadata per content address
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Replace the metadata of `address`
    async fn set(&self, address: &ContentAddress, metadata: &Metadata) -> Result<()>;

    /// Metadata of `address`, if any was recorded
    async fn get(&self, address: &ContentAddress) -> Result<Option<Metadata>>;

    /// Forget `address`; returns whether anything was stored
    async fn remove(&self, address: &ContentAddress) -> Result<bool>;

    /// Every address with recorded metadata
    async fn list(&self) -> Result<Vec<ContentAddress>>;
}
