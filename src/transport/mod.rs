//! HTTP round trips against the node's API and gateway endpoints.

mod http;
mod memory;
pub mod retry;

pub use http::HttpTransport;
pub use memory::MemoryTransport;
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::Result;
use crate::progress::ProgressTracker;

/// Upload and download chunk size used for progress checkpoints
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Which configured endpoint a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST <api_url>/api/v0/<path>`
    Api,
    /// `GET <gateway_url>/ipfs/<path>`
    Gateway,
}

/// Multipart file part of an upload
#[derive(Debug, Clone)]
pub struct UploadBody {
    pub data: Bytes,
    pub file_name: String,
}

/// One request to the node
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub endpoint: Endpoint,
    /// Command path such as `pin/add`, or the CID for gateway requests
    pub path: String,
    /// Query arguments, repeated keys allowed
    pub args: Vec<(String, String)>,
    pub body: Option<UploadBody>,
    /// Safe to send again after a transport failure
    pub idempotent: bool,
    pub progress: Option<ProgressTracker>,
}

impl ApiRequest {
    /// An API command
    pub fn api(path: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Api,
            path: path.into(),
            args: Vec::new(),
            body: None,
            idempotent: true,
            progress: None,
        }
    }

    /// A gateway retrieval of `cid`
    pub fn gateway(cid: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Gateway,
            ..Self::api(cid)
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, data: Bytes, file_name: impl Into<String>) -> Self {
        self.body = Some(UploadBody {
            data,
            file_name: file_name.into(),
        });
        self
    }

    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = false;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    /// First value of query argument `key`
    pub fn arg_value(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response of a completed round trip, whatever its status
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A single HTTP round trip.
///
/// Implementations report unreachable endpoints as `Connection` and elapsed
/// deadlines as `Timeout`; every response that arrives, including error
/// statuses, is returned as an [`ApiResponse`] for the caller to classify.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;

    /// Release pooled resources. Called once when the owning client closes.
    async fn shutdown(&self) {}
}
