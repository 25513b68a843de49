use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::time::Instant;

use crate::core::{
    BandwidthStats, BatchResult, ClientConfig, ContentAddress, ErrorKind, IpfsError, Metadata,
    NodeInfo, PinRecord, Result, StoredItem,
};
use crate::metadata::{FileMetadataStore, MetadataStore};
use crate::progress::{NoopObserver, ProgressObserver, ProgressTracker};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, RetryPolicy, Sleeper, Transport};
use crate::utils;
use super::api::{self, AddResponse, BandwidthResponse, IdResponse, PinLsResponse, PinsResponse, VersionResponse};
use super::batch::run_indexed;
use super::cache::ContentCache;

/// Client for an IPFS node's HTTP API.
///
/// Every operation goes through the configured [`Transport`]; idempotent
/// requests are retried under the [`RetryPolicy`], and a whole operation is
/// bounded by `operation_timeout_ms` when set. The client is cheap to share
/// by reference across tasks.
pub struct IpfsClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    metadata: Arc<dyn MetadataStore>,
    observer: Arc<dyn ProgressObserver>,
    cache: ContentCache,
}

/// Assembles an [`IpfsClient`] with replaceable collaborators
pub struct IpfsClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    metadata: Option<Arc<dyn MetadataStore>>,
    observer: Option<Arc<dyn ProgressObserver>>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl IpfsClientBuilder {
    /// Use `transport` instead of an HTTP connection pool
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(store);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Timer used between retry attempts
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Build the client without contacting the node
    pub fn build(self) -> Result<IpfsClient> {
        self.config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let metadata: Arc<dyn MetadataStore> = match self.metadata {
            Some(store) => store,
            None => Arc::new(FileMetadataStore::new(&self.config.metadata_dir)),
        };
        let mut retry = RetryPolicy::new(self.config.retry.clone());
        if let Some(sleeper) = self.sleeper {
            retry = retry.with_sleeper(sleeper);
        }

        Ok(IpfsClient {
            cache: ContentCache::new(self.config.cache_capacity),
            observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            config: self.config,
            transport,
            retry,
            metadata,
        })
    }

    /// Build the client and check that the node answers
    pub async fn connect(self) -> Result<IpfsClient> {
        let client = self.build()?;
        client.verify().await?;
        Ok(client)
    }
}

impl IpfsClient {
    /// Create a client without any network I/O
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Create a client and verify the node is reachable
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Self::builder(config).connect().await
    }

    pub fn builder(config: ClientConfig) -> IpfsClientBuilder {
        IpfsClientBuilder {
            config,
            transport: None,
            metadata: None,
            observer: None,
            sleeper: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Release pooled connections. Dropping the client has the same effect,
    /// without the log line.
    pub async fn close(self) {
        self.transport.shutdown().await;
        log::info!("Closed IPFS client for {}", utils::redact_url(&self.config.api_url));
    }

    async fn verify(&self) -> Result<()> {
        let url = utils::redact_url(&self.config.api_url);
        match self.node_info().await {
            Ok(info) => {
                log::info!("Connected to IPFS node {} ({}) at {}", info.id, info.agent_version, url);
                Ok(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::Connection | ErrorKind::Timeout) => Err(e),
            Err(e) => Err(IpfsError::Connection(format!(
                "{} did not answer as an IPFS node: {}",
                url, e
            ))),
        }
    }

    fn tracker(&self) -> ProgressTracker {
        ProgressTracker::new(self.observer.clone())
    }

    /// One round trip; non-2xx responses become classified errors
    async fn round_trip(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let response = self.transport.send(request).await?;
        if response.is_success() {
            return Ok(response);
        }
        let subject = request.arg_value("arg").unwrap_or(&request.path);
        Err(api::classify(&response, request.endpoint, subject))
    }

    /// Send `request` under the retry policy and operation deadline
    async fn execute(&self, operation: &str, request: ApiRequest) -> Result<ApiResponse> {
        let run = async {
            if request.idempotent {
                self.retry.run(operation, || self.round_trip(&request)).await
            } else {
                self.round_trip(&request).await
            }
        };

        match self.config.operation_timeout() {
            Some(limit) => tokio::time::timeout(limit, run).await.unwrap_or_else(|_| {
                Err(IpfsError::Timeout(format!(
                    "{} did not complete within {}ms",
                    operation,
                    limit.as_millis()
                )))
            }),
            None => run.await,
        }
    }

    fn check_payload(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(IpfsError::Validation("refusing to add empty content".to_string()));
        }
        if data.len() as u64 > self.config.max_add_size {
            return Err(IpfsError::Validation(format!(
                "content is {} but the limit is {}",
                utils::format_bytes(data.len() as u64),
                utils::format_bytes(self.config.max_add_size)
            )));
        }
        Ok(())
    }

    async fn add_item(&self, item: StoredItem, progress: Option<ProgressTracker>) -> Result<ContentAddress> {
        self.check_payload(&item.data)?;

        let name = item.name.as_deref().unwrap_or("data").to_string();
        let size = item.data.len() as u64;
        let request = ApiRequest::api("add")
            .arg("pin", self.config.pin_on_add.to_string())
            .body(item.data, name)
            .with_progress(progress);
        let response = self.execute("add", request).await?;

        let added: AddResponse = api::parse_json(&response)?;
        let address = ContentAddress::parse(&added.hash).map_err(|_| IpfsError::Remote {
            status: response.status,
            message: format!("node returned a malformed address: {:?}", added.hash),
        })?;
        log::debug!(
            "Added {} ({}, node reports {} bytes) as {}",
            added.name,
            utils::format_bytes(size),
            added.size.as_deref().unwrap_or("?"),
            address
        );

        if let Some(metadata) = &item.metadata {
            if let Err(e) = self.metadata.set(&address, metadata).await {
                log::warn!("Stored {} but could not record its metadata: {}", address, e);
                return Err(e.with_context(format!("content stored as {} but metadata not recorded", address)));
            }
        }
        Ok(address)
    }

    /// Store bytes on the node and return their address.
    ///
    /// If the item carries metadata and recording it fails, the content stays
    /// on the node and the returned error names its address.
    pub async fn add(&self, item: impl Into<StoredItem>) -> Result<ContentAddress> {
        self.add_item(item.into(), Some(self.tracker())).await
    }

    /// Store bytes and record `metadata` for the resulting address
    pub async fn add_with_metadata(
        &self,
        item: impl Into<StoredItem>,
        metadata: Metadata,
    ) -> Result<ContentAddress> {
        self.add(item.into().with_metadata(metadata)).await
    }

    /// Serialize `value` as JSON and store it
    pub async fn add_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<ContentAddress> {
        let json = serde_json::to_vec(value)?;
        self.add(StoredItem::new(json).named("data.json")).await
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IpfsError::Validation(format!("file not found: {}", path.display())));
            }
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            return Err(IpfsError::Validation(format!(
                "{} is a directory; add it with add_directory",
                path.display()
            )));
        }
        if meta.len() > self.config.max_add_size {
            return Err(IpfsError::Validation(format!(
                "{} is {} but the limit is {}",
                path.display(),
                utils::format_bytes(meta.len()),
                utils::format_bytes(self.config.max_add_size)
            )));
        }
        Ok(Bytes::from(tokio::fs::read(path).await?))
    }

    async fn add_path(
        &self,
        path: &Path,
        name: String,
        progress: Option<ProgressTracker>,
    ) -> Result<ContentAddress> {
        let data = self.read_file(path).await?;
        self.add_item(StoredItem::new(data).named(name), progress).await
    }

    /// Store the contents of a file
    pub async fn add_file(&self, path: impl AsRef<Path>) -> Result<ContentAddress> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data".to_string());
        self.add_path(path, name, Some(self.tracker())).await
    }

    /// Store every regular file below `root`, each as its own batch item.
    ///
    /// Fails as a whole only if `root` cannot be listed. Per-file failures,
    /// and nested directories that cannot be read, are reported next to their
    /// path.
    pub async fn add_directory(
        &self,
        root: impl AsRef<Path>,
    ) -> Result<Vec<(PathBuf, Result<ContentAddress>)>> {
        let root = root.as_ref();
        let utils::FileListing { files, unreadable } = utils::collect_files(root).await?;
        log::info!("Adding {} files from {}", files.len(), root.display());

        let deadline = self.config.batch_deadline().map(|d| Instant::now() + d);
        let results = run_indexed(
            files.clone(),
            self.config.batch.parallelism,
            deadline,
            &self.tracker(),
            |path: PathBuf| async move {
                let name = path
                    .strip_prefix(root)
                    .unwrap_or(path.as_path())
                    .to_string_lossy()
                    .into_owned();
                self.add_path(&path, name, None).await
            },
        )
        .await;

        let mut entries: Vec<_> = files.into_iter().zip(results).collect();
        entries.extend(unreadable.into_iter().map(|(path, e)| (path, Err(e))));
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn fetch_api(&self, address: &ContentAddress, progress: Option<ProgressTracker>) -> Result<Bytes> {
        let request = ApiRequest::api("cat")
            .arg("arg", address.as_str())
            .with_progress(progress);
        Ok(self.execute("cat", request).await?.body)
    }

    async fn fetch_gateway(
        &self,
        address: &ContentAddress,
        progress: Option<ProgressTracker>,
    ) -> Result<Bytes> {
        if self.config.gateway_url.is_none() {
            return Err(IpfsError::Validation("no gateway_url configured".to_string()));
        }
        let request = ApiRequest::gateway(address.as_str()).with_progress(progress);
        Ok(self.execute("gateway get", request).await?.body)
    }

    async fn get_inner(&self, address: &ContentAddress, progress: Option<ProgressTracker>) -> Result<Bytes> {
        if let Some(data) = self.cache.get(address) {
            log::debug!("Cache hit for {}", address);
            return Ok(data);
        }

        let data = if self.config.prefer_gateway {
            self.fetch_gateway(address, progress).await?
        } else {
            match self.fetch_api(address, progress.clone()).await {
                Ok(data) => data,
                Err(e)
                    if self.config.gateway_fallback
                        && self.config.gateway_url.is_some()
                        && matches!(e.kind(), ErrorKind::Connection | ErrorKind::Timeout) =>
                {
                    log::warn!("API retrieval of {} failed ({}); trying the gateway", address, e);
                    self.fetch_gateway(address, progress).await?
                }
                Err(e) => return Err(e),
            }
        };

        self.cache.insert(address.clone(), data.clone());
        Ok(data)
    }

    /// Retrieve the content behind `address`
    pub async fn get(&self, address: &ContentAddress) -> Result<Bytes> {
        self.get_inner(address, Some(self.tracker())).await
    }

    /// Retrieve through the configured gateway only, bypassing the cache
    pub async fn get_via_gateway(&self, address: &ContentAddress) -> Result<Bytes> {
        self.fetch_gateway(address, Some(self.tracker())).await
    }

    /// Retrieve `address` into a file, creating parent directories.
    /// Returns the number of bytes written.
    pub async fn get_to_file(&self, address: &ContentAddress, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let data = self.get(address).await?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            utils::ensure_dir_exists(parent).await?;
        }
        tokio::fs::write(path, &data).await?;
        log::debug!("Wrote {} to {}", address, path.display());
        Ok(data.len() as u64)
    }

    /// Retrieve and decode JSON content. Content that is not JSON but is
    /// valid UTF-8 comes back as a JSON string.
    pub async fn get_json(&self, address: &ContentAddress) -> Result<serde_json::Value> {
        let data = self.get(address).await?;
        if let Ok(value) = serde_json::from_slice(&data) {
            return Ok(value);
        }
        match std::str::from_utf8(&data) {
            Ok(text) => Ok(serde_json::Value::String(text.to_string())),
            Err(_) => Err(IpfsError::Validation(format!(
                "{} is neither JSON nor UTF-8 text",
                address
            ))),
        }
    }

    /// Pin `address` recursively. Pinning a pinned address is a no-op.
    pub async fn pin(&self, address: &ContentAddress) -> Result<()> {
        let request = ApiRequest::api("pin/add")
            .arg("arg", address.as_str())
            .arg("recursive", "true")
            .non_idempotent();
        let response = self.execute("pin", request).await?;
        let pins: PinsResponse = api::parse_json(&response)?;
        log::debug!("Pinned {} ({} roots)", address, pins.pins.map_or(0, |p| p.len()));
        Ok(())
    }

    /// Unpin `address`. Unpinning an address that is not pinned succeeds.
    pub async fn unpin(&self, address: &ContentAddress) -> Result<()> {
        let request = ApiRequest::api("pin/rm")
            .arg("arg", address.as_str())
            .arg("recursive", "true")
            .non_idempotent();
        match self.execute("unpin", request).await {
            Ok(_) => {
                log::debug!("Unpinned {}", address);
                Ok(())
            }
            Err(IpfsError::Remote { message, .. }) if message.contains("not pinned") => {
                log::debug!("{} was not pinned", address);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Pinned state of `address`
    pub async fn pin_status(&self, address: &ContentAddress) -> Result<PinRecord> {
        let request = ApiRequest::api("pin/ls").arg("arg", address.as_str());
        let pinned = match self.execute("pin status", request).await {
            // the node may list the root under another CID encoding
            Ok(response) => !api::parse_json::<PinLsResponse>(&response)?.keys.is_empty(),
            Err(IpfsError::Remote { message, .. }) if message.contains("not pinned") => false,
            Err(e) => return Err(e),
        };
        Ok(PinRecord {
            address: address.clone(),
            pinned,
        })
    }

    pub async fn is_pinned(&self, address: &ContentAddress) -> Result<bool> {
        Ok(self.pin_status(address).await?.pinned)
    }

    /// Recursively pinned addresses, sorted
    pub async fn list_pins(&self) -> Result<Vec<ContentAddress>> {
        let request = ApiRequest::api("pin/ls").arg("type", "recursive");
        let response = self.execute("list pins", request).await?;
        let listing: PinLsResponse = api::parse_json(&response)?;

        let mut pins = Vec::with_capacity(listing.keys.len());
        for (key, entry) in listing.keys {
            match ContentAddress::parse(&key) {
                Ok(address) => pins.push(address),
                Err(_) => log::warn!("Ignoring malformed {} pin {:?}", entry.kind, key),
            }
        }
        pins.sort();
        Ok(pins)
    }

    /// Identity of the node
    pub async fn node_info(&self) -> Result<NodeInfo> {
        let response = self.execute("id", ApiRequest::api("id")).await?;
        Ok(api::parse_json::<IdResponse>(&response)?.into())
    }

    /// Version string reported by the node
    pub async fn version(&self) -> Result<String> {
        let response = self.execute("version", ApiRequest::api("version")).await?;
        Ok(api::parse_json::<VersionResponse>(&response)?.version)
    }

    /// Bandwidth counters of the node
    pub async fn stats(&self) -> Result<BandwidthStats> {
        let response = self.execute("stats", ApiRequest::api("stats/bw")).await?;
        Ok(api::parse_json::<BandwidthResponse>(&response)?.into())
    }

    /// Whether the node answers right now. A single attempt; never fails.
    pub async fn is_connected(&self) -> bool {
        match self.round_trip(&ApiRequest::api("id")).await {
            Ok(_) => true,
            Err(e) => {
                log::debug!("Node at {} is not reachable: {}", utils::redact_url(&self.config.api_url), e);
                false
            }
        }
    }

    /// Store many items concurrently under the configured batch deadline
    pub async fn add_batch<I>(&self, items: I) -> BatchResult<ContentAddress>
    where
        I: IntoIterator,
        I::Item: Into<StoredItem>,
    {
        let deadline = self.config.batch_deadline().map(|d| Instant::now() + d);
        self.add_batch_inner(items, deadline).await
    }

    /// Like [`add_batch`](Self::add_batch), with an explicit deadline
    pub async fn add_batch_until<I>(&self, items: I, deadline: Instant) -> BatchResult<ContentAddress>
    where
        I: IntoIterator,
        I::Item: Into<StoredItem>,
    {
        self.add_batch_inner(items, Some(deadline)).await
    }

    async fn add_batch_inner<I>(&self, items: I, deadline: Option<Instant>) -> BatchResult<ContentAddress>
    where
        I: IntoIterator,
        I::Item: Into<StoredItem>,
    {
        let items: Vec<StoredItem> = items.into_iter().map(Into::into).collect();
        log::debug!("Adding batch of {} items", items.len());
        run_indexed(
            items,
            self.config.batch.parallelism,
            deadline,
            &self.tracker(),
            |item| self.add_item(item, None),
        )
        .await
    }

    /// Retrieve many addresses concurrently under the configured batch deadline
    pub async fn get_batch(&self, addresses: &[ContentAddress]) -> BatchResult<Bytes> {
        let deadline = self.config.batch_deadline().map(|d| Instant::now() + d);
        self.get_batch_inner(addresses, deadline).await
    }

    /// Like [`get_batch`](Self::get_batch), with an explicit deadline
    pub async fn get_batch_until(&self, addresses: &[ContentAddress], deadline: Instant) -> BatchResult<Bytes> {
        self.get_batch_inner(addresses, Some(deadline)).await
    }

    async fn get_batch_inner(&self, addresses: &[ContentAddress], deadline: Option<Instant>) -> BatchResult<Bytes> {
        log::debug!("Retrieving batch of {} addresses", addresses.len());
        run_indexed(
            addresses.iter().collect(),
            self.config.batch.parallelism,
            deadline,
            &self.tracker(),
            |address| self.get_inner(address, None),
        )
        .await
    }

    /// Retrieve many addresses into `dir`, one file named after each address.
    /// Each entry succeeds or fails on its own.
    pub async fn get_batch_to_dir(
        &self,
        addresses: &[ContentAddress],
        dir: impl AsRef<Path>,
    ) -> Result<BatchResult<PathBuf>> {
        let dir = dir.as_ref();
        utils::ensure_dir_exists(dir).await?;
        let deadline = self.config.batch_deadline().map(|d| Instant::now() + d);

        Ok(run_indexed(
            addresses.iter().collect(),
            self.config.batch.parallelism,
            deadline,
            &self.tracker(),
            |address| async move {
                let data = self.get_inner(address, None).await?;
                let path = dir.join(address.as_str());
                tokio::fs::write(&path, &data).await?;
                Ok(path)
            },
        )
        .await)
    }

    /// Replace the metadata recorded for `address`
    pub async fn set_metadata(&self, address: &ContentAddress, metadata: &Metadata) -> Result<()> {
        self.metadata.set(address, metadata).await
    }

    pub async fn get_metadata(&self, address: &ContentAddress) -> Result<Option<Metadata>> {
        self.metadata.get(address).await
    }

    /// Forget the metadata of `address`; returns whether any was recorded
    pub async fn remove_metadata(&self, address: &ContentAddress) -> Result<bool> {
        self.metadata.remove(address).await
    }

    /// Addresses with recorded metadata
    pub async fn list_metadata(&self) -> Result<Vec<ContentAddress>> {
        self.metadata.list().await
    }
}

impl std::fmt::Debug for IpfsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpfsClient")
            .field("api_url", &utils::redact_url(&self.config.api_url))
            .field("retry", &self.retry)
            .field("cached", &self.cache.len())
            .finish()
    }
}
