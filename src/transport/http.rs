use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client as HttpClient};
use url::Url;

use crate::core::{ClientConfig, IpfsError, Result};
use crate::progress::{Direction, ProgressTracker};
use crate::utils;
use super::{ApiRequest, ApiResponse, Endpoint, Transport, CHUNK_SIZE};

/// Transport over a pooled reqwest client.
///
/// Cloning is cheap and clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
    api_base: Url,
    gateway_base: Option<Url>,
}

impl HttpTransport {
    /// Build the HTTP client with the configured timeouts and pool limits
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout())
            .user_agent(concat!("kova-ipfs-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IpfsError::Validation(format!("failed to create HTTP client: {}", e)))?;

        let api_base = directory_url(config.api_base()?);
        let gateway_base = config.gateway_base()?.map(directory_url);

        log::debug!(
            "HTTP transport ready: api={} gateway={}",
            utils::redact_url(api_base.as_str()),
            gateway_base
                .as_ref()
                .map(|u| utils::redact_url(u.as_str()))
                .unwrap_or_else(|| "-".to_string())
        );

        Ok(Self {
            http,
            api_base,
            gateway_base,
        })
    }

    /// Full URL a request is sent to
    pub fn url_for(&self, request: &ApiRequest) -> Result<Url> {
        let mut url = match request.endpoint {
            Endpoint::Api => self.api_base.join(&format!("api/v0/{}", request.path))?,
            Endpoint::Gateway => {
                let base = self
                    .gateway_base
                    .as_ref()
                    .ok_or_else(|| IpfsError::Validation("no gateway_url configured".to_string()))?;
                base.join(&format!("ipfs/{}", request.path))?
            }
        };
        if !request.args.is_empty() {
            url.query_pairs_mut().extend_pairs(request.args.iter());
        }
        Ok(url)
    }
}

/// Make sure `join` appends below the configured path instead of replacing its last segment
fn directory_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Split `data` into chunks and report each one as it is handed to the connection
fn upload_body(data: Bytes, progress: Option<ProgressTracker>) -> Body {
    let total = data.len() as u64;
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(|start| data.slice(start..(start + CHUNK_SIZE).min(data.len())))
        .collect();

    let mut sent = 0u64;
    let chunks = stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len() as u64;
        if let Some(progress) = &progress {
            progress.chunk(Direction::Upload, chunk.len() as u64, sent, Some(total));
        }
        Ok::<Bytes, std::io::Error>(chunk)
    }));
    Body::wrap_stream(chunks)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.url_for(request)?;
        log::debug!("{} {}", request.path, utils::redact_url(url.as_str()));

        let mut builder = match request.endpoint {
            Endpoint::Api => self.http.post(url),
            Endpoint::Gateway => self.http.get(url),
        };

        if let Some(body) = &request.body {
            let length = body.data.len() as u64;
            let part = Part::stream_with_length(upload_body(body.data.clone(), request.progress.clone()), length)
                .file_name(body.file_name.clone())
                .mime_str("application/octet-stream")?;
            builder = builder.multipart(Form::new().part("file", part));
        }

        let mut response = builder.send().await?;
        let status = response.status().as_u16();
        let total = response.content_length();
        let report_download = request.body.is_none() && response.status().is_success();

        let mut buffer = BytesMut::with_capacity(total.unwrap_or(0).min(CHUNK_SIZE as u64 * 4) as usize);
        while let Some(chunk) = response.chunk().await? {
            buffer.extend_from_slice(&chunk);
            if report_download {
                if let Some(progress) = &request.progress {
                    progress.chunk(Direction::Download, chunk.len() as u64, buffer.len() as u64, total);
                }
            }
        }

        log::debug!("{} -> {} ({} bytes)", request.path, status, buffer.len());
        Ok(ApiResponse::new(status, buffer.freeze()))
    }

    async fn shutdown(&self) {
        log::debug!("HTTP transport for {} shutting down", utils::redact_url(self.api_base.as_str()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(api: &str, gateway: Option<&str>) -> HttpTransport {
        let config = ClientConfig {
            api_url: api.to_string(),
            gateway_url: gateway.map(str::to_string),
            ..ClientConfig::default()
        };
        HttpTransport::new(&config).unwrap()
    }

    #[test]
    fn api_urls_carry_command_and_args() {
        let t = transport("http://127.0.0.1:5001", None);
        let request = ApiRequest::api("pin/add").arg("arg", "bafkabc").arg("recursive", "true");
        assert_eq!(
            t.url_for(&request).unwrap().as_str(),
            "http://127.0.0.1:5001/api/v0/pin/add?arg=bafkabc&recursive=true"
        );

        let bare = ApiRequest::api("id");
        assert_eq!(t.url_for(&bare).unwrap().as_str(), "http://127.0.0.1:5001/api/v0/id");
    }

    #[test]
    fn base_path_prefix_is_preserved() {
        let t = transport("https://proxy.example/ipfs-node", Some("https://gw.example/sub"));
        assert_eq!(
            t.url_for(&ApiRequest::api("version")).unwrap().as_str(),
            "https://proxy.example/ipfs-node/api/v0/version"
        );
        assert_eq!(
            t.url_for(&ApiRequest::gateway("bafkabc")).unwrap().as_str(),
            "https://gw.example/sub/ipfs/bafkabc"
        );
    }

    #[test]
    fn gateway_request_without_gateway_is_invalid() {
        let t = transport("http://127.0.0.1:5001", None);
        let err = t.url_for(&ApiRequest::gateway("bafkabc")).unwrap_err();
        assert!(matches!(err, IpfsError::Validation(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_connection_error() {
        // port 9 (discard) is closed on test hosts
        let config = ClientConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            connect_timeout_ms: 500,
            request_timeout_ms: 1_000,
            ..ClientConfig::default()
        };
        let t = HttpTransport::new(&config).unwrap();
        let err = t.send(&ApiRequest::api("id")).await.unwrap_err();
        assert!(
            matches!(err, IpfsError::Connection(_) | IpfsError::Timeout(_)),
            "got {:?}",
            err
        );
    }

    /// Accept one connection, answer it with `status` and `body`, and hand
    /// back the raw request
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 8192];
            while !request_complete(&request) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            request
        });
        (url, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let head_end = match request.windows(4).position(|w| w == b"\r\n\r\n") {
            Some(pos) => pos + 4,
            None => return false,
        };
        let head = String::from_utf8_lossy(&request[..head_end]).to_ascii_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok());
        match content_length {
            Some(len) => request.len() >= head_end + len,
            None if head.contains("transfer-encoding: chunked") => request.ends_with(b"0\r\n\r\n"),
            None => true,
        }
    }

    fn split_request(raw: &[u8]) -> (String, String) {
        let text = String::from_utf8_lossy(raw).into_owned();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        (head.to_ascii_lowercase(), body.to_string())
    }

    #[tokio::test]
    async fn add_posts_a_multipart_upload() {
        let (url, server) = serve_once("200 OK", r#"{"Name":"reading.txt","Hash":"bafkabc","Size":"10"}"#).await;
        let t = transport(&url, None);
        let metrics = std::sync::Arc::new(crate::progress::MetricsObserver::new());

        let request = ApiRequest::api("add")
            .arg("pin", "true")
            .body(Bytes::from_static(b"hello node"), "reading.txt")
            .with_progress(Some(ProgressTracker::new(metrics.clone())));
        let response = t.send(&request).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], br#"{"Name":"reading.txt","Hash":"bafkabc","Size":"10"}"#);

        let (head, body) = split_request(&server.await.unwrap());
        assert!(head.starts_with("post /api/v0/add?pin=true http/1.1"), "{}", head);
        assert!(head.contains("content-type: multipart/form-data; boundary="), "{}", head);
        assert!(head.contains("user-agent: kova-ipfs-client/"), "{}", head);
        assert!(body.contains("name=\"file\""), "{}", body);
        assert!(body.contains("filename=\"reading.txt\""), "{}", body);
        assert!(body.contains("hello node"), "{}", body);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_uploaded, 10);
        assert_eq!(snapshot.bytes_downloaded, 0);
    }

    #[tokio::test]
    async fn gateway_get_reports_download_progress() {
        let (url, server) = serve_once("200 OK", "sensor payload").await;
        let t = transport("http://127.0.0.1:5001", Some(&url));
        let metrics = std::sync::Arc::new(crate::progress::MetricsObserver::new());

        let request = ApiRequest::gateway("bafkabc").with_progress(Some(ProgressTracker::new(metrics.clone())));
        let response = t.send(&request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"sensor payload");

        let (head, _) = split_request(&server.await.unwrap());
        assert!(head.starts_with("get /ipfs/bafkabc http/1.1"), "{}", head);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_downloaded, 14);
        assert_eq!(snapshot.last_percent, 100);
    }

    #[tokio::test]
    async fn error_statuses_are_passed_through() {
        let (url, server) =
            serve_once("500 Internal Server Error", r#"{"Message":"pin: not pinned","Code":0,"Type":"error"}"#).await;
        let t = transport(&url, None);

        let request = ApiRequest::api("pin/rm").arg("arg", "bafkabc");
        let response = t.send(&request).await.unwrap();
        assert_eq!(response.status, 500);
        assert!(!response.is_success());
        assert_eq!(&response.body[..], br#"{"Message":"pin: not pinned","Code":0,"Type":"error"}"#);

        let (head, _) = split_request(&server.await.unwrap());
        assert!(head.starts_with("post /api/v0/pin/rm?arg=bafkabc http/1.1"), "{}", head);
    }
}
