//! kova-ipfs-client: a resilient client for the HTTP API of an IPFS node,
//! with retries, batching, pinning, client-side metadata and progress hooks

pub mod commands;
pub mod core;
pub mod ipfs;
pub mod metadata;
pub mod progress;
pub mod transport;
pub mod utils;

// Re-export main components for easier consumption
pub use core::{
    BandwidthStats, BatchConfig, BatchResult, ClientConfig, ContentAddress, ErrorKind, IpfsError,
    Metadata, MetadataValue, NodeInfo, PinRecord, Result, RetryConfig, StoredItem,
};
pub use ipfs::{IpfsClient, IpfsClientBuilder};
pub use metadata::{FileMetadataStore, MemoryMetadataStore, MetadataStore};
pub use progress::{MetricsObserver, NoopObserver, ProgressEvent, ProgressObserver};
pub use transport::{HttpTransport, MemoryTransport, Transport};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
