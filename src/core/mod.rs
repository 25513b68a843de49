//! Types shared by every layer: errors, configuration, and the data model.

pub mod config;
pub mod error;
pub mod object;

pub use config::{set_key_in_file, BatchConfig, ClientConfig, RetryConfig};
pub use error::{ErrorKind, IpfsError, Result};
pub use object::{
    BandwidthStats, BatchResult, ContentAddress, Metadata, MetadataValue, NodeInfo, PinRecord,
    StoredItem,
};
