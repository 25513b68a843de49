//! Content store façade over an IPFS node

mod api;
mod batch;
mod cache;
mod client;

pub use cache::{ContentCache, MAX_CACHED_ENTRY};
pub use client::{IpfsClient, IpfsClientBuilder};
