use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use sha1::{Digest, Sha1};

use crate::core::{IpfsError, Result};
use crate::progress::Direction;
use super::{ApiRequest, ApiResponse, Endpoint, Transport, CHUNK_SIZE};

/// In-process stand-in for an IPFS node.
///
/// Answers the same commands and error bodies as the daemon's HTTP API for
/// everything the client issues. Addresses are derived from content (SHA-1,
/// hex, `bafk` prefix), so identical bytes always map to the same address.
/// Faults can be injected: going offline, rejecting specific payloads, and
/// adding latency.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    blocks: HashMap<String, Bytes>,
    pins: BTreeSet<String>,
    rejected: Vec<Bytes>,
    offline: bool,
    latency: Option<Duration>,
    calls: u64,
    total_in: u64,
    total_out: u64,
}

fn error_body(message: impl Into<String>) -> Bytes {
    let body = json!({ "Message": message.into(), "Code": 0, "Type": "error" });
    Bytes::from(body.to_string())
}

fn json_body(value: serde_json::Value) -> Bytes {
    Bytes::from(value.to_string())
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the node assigns to `data`
    pub fn address_of(data: &[u8]) -> String {
        let digest = Sha1::digest(data);
        format!("bafk{}", hex::encode(digest))
    }

    /// Make every request fail as if the endpoint were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Refuse uploads of exactly these bytes with a node-side error
    pub fn reject(&self, data: impl Into<Bytes>) {
        self.state.lock().rejected.push(data.into());
    }

    /// Delay every response
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Requests received so far, failed ones included
    pub fn call_count(&self) -> u64 {
        self.state.lock().calls
    }

    pub fn contains(&self, cid: &str) -> bool {
        self.state.lock().blocks.contains_key(cid)
    }

    pub fn is_pinned(&self, cid: &str) -> bool {
        self.state.lock().pins.contains(cid)
    }

    pub fn pin_count(&self) -> usize {
        self.state.lock().pins.len()
    }

    fn required_arg<'a>(request: &'a ApiRequest) -> std::result::Result<&'a str, ApiResponse> {
        request
            .arg_value("arg")
            .ok_or_else(|| ApiResponse::new(400, error_body("argument \"ipfs-path\" is required")))
    }

    fn handle(&self, request: &ApiRequest) -> ApiResponse {
        match request.endpoint {
            Endpoint::Gateway => self.gateway(&request.path),
            Endpoint::Api => {
                let outcome = match request.path.as_str() {
                    "add" => Ok(self.add(request)),
                    "cat" => Self::required_arg(request).map(|cid| self.cat(cid)),
                    "pin/add" => Self::required_arg(request).map(|cid| self.pin_add(cid)),
                    "pin/rm" => Self::required_arg(request).map(|cid| self.pin_rm(cid)),
                    "pin/ls" => Ok(self.pin_ls(request.arg_value("arg"))),
                    "id" => Ok(ApiResponse::new(
                        200,
                        json_body(json!({
                            "ID": "12D3KooWMemoryNode",
                            "PublicKey": "",
                            "Addresses": [],
                            "AgentVersion": concat!("kova-memory/", env!("CARGO_PKG_VERSION")),
                            "ProtocolVersion": "ipfs/0.1.0",
                        })),
                    )),
                    "version" => Ok(ApiResponse::new(200, json_body(json!({ "Version": "0.0.0-memory" })))),
                    "stats/bw" => {
                        let state = self.state.lock();
                        Ok(ApiResponse::new(
                            200,
                            json_body(json!({
                                "TotalIn": state.total_in,
                                "TotalOut": state.total_out,
                                "RateIn": 0.0,
                                "RateOut": 0.0,
                            })),
                        ))
                    }
                    _ => Ok(ApiResponse::new(404, Bytes::from_static(b"404 page not found"))),
                };
                outcome.unwrap_or_else(|response| response)
            }
        }
    }

    fn add(&self, request: &ApiRequest) -> ApiResponse {
        let body = match &request.body {
            Some(body) => body,
            None => return ApiResponse::new(400, error_body("file argument 'path' is required")),
        };

        if self.state.lock().rejected.iter().any(|r| r == &body.data) {
            return ApiResponse::new(500, error_body("content rejected by node policy"));
        }

        if let Some(progress) = &request.progress {
            let total = body.data.len() as u64;
            let mut sent = 0u64;
            for chunk in body.data.chunks(CHUNK_SIZE) {
                sent += chunk.len() as u64;
                progress.chunk(Direction::Upload, chunk.len() as u64, sent, Some(total));
            }
        }

        let cid = Self::address_of(&body.data);
        let pin = request.arg_value("pin") != Some("false");
        let mut state = self.state.lock();
        state.total_in += body.data.len() as u64;
        state.blocks.insert(cid.clone(), body.data.clone());
        if pin {
            state.pins.insert(cid.clone());
        }

        ApiResponse::new(
            200,
            json_body(json!({
                "Name": body.file_name,
                "Hash": cid,
                "Size": body.data.len().to_string(),
            })),
        )
    }

    fn not_found(cid: &str) -> ApiResponse {
        ApiResponse::new(
            500,
            error_body(format!("block was not found locally (offline): ipld: could not find {}", cid)),
        )
    }

    fn cat(&self, cid: &str) -> ApiResponse {
        let data = {
            let mut state = self.state.lock();
            match state.blocks.get(cid).cloned() {
                Some(data) => {
                    state.total_out += data.len() as u64;
                    data
                }
                None => return Self::not_found(cid),
            }
        };
        ApiResponse::new(200, data)
    }

    fn gateway(&self, cid: &str) -> ApiResponse {
        match self.state.lock().blocks.get(cid) {
            Some(data) => ApiResponse::new(200, data.clone()),
            None => ApiResponse::new(
                404,
                Bytes::from(format!("ipfs resolve -r /ipfs/{}: no link named \"{}\"", cid, cid)),
            ),
        }
    }

    fn pin_add(&self, cid: &str) -> ApiResponse {
        let mut state = self.state.lock();
        if !state.blocks.contains_key(cid) {
            return Self::not_found(cid);
        }
        state.pins.insert(cid.to_string());
        ApiResponse::new(200, json_body(json!({ "Pins": [cid] })))
    }

    fn pin_rm(&self, cid: &str) -> ApiResponse {
        if self.state.lock().pins.remove(cid) {
            ApiResponse::new(200, json_body(json!({ "Pins": [cid] })))
        } else {
            ApiResponse::new(500, error_body("not pinned or pinned indirectly"))
        }
    }

    fn pin_ls(&self, cid: Option<&str>) -> ApiResponse {
        let state = self.state.lock();
        let keys: serde_json::Map<String, serde_json::Value> = match cid {
            Some(cid) if !state.pins.contains(cid) => {
                return ApiResponse::new(500, error_body(format!("path '{}' is not pinned", cid)));
            }
            Some(cid) => std::iter::once(cid.to_string())
                .map(|k| (k, json!({ "Type": "recursive" })))
                .collect(),
            None => state
                .pins
                .iter()
                .map(|k| (k.clone(), json!({ "Type": "recursive" })))
                .collect(),
        };
        ApiResponse::new(200, json_body(json!({ "Keys": keys })))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let (offline, latency) = {
            let mut state = self.state.lock();
            state.calls += 1;
            (state.offline, state.latency)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if offline {
            return Err(IpfsError::Connection("memory node is offline".to_string()));
        }

        let response = self.handle(request);
        let is_content = request.endpoint == Endpoint::Gateway || request.path == "cat";
        if is_content && response.is_success() {
            if let Some(progress) = &request.progress {
                let len = response.body.len() as u64;
                progress.chunk(Direction::Download, len, len, Some(len));
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(response: &ApiResponse) -> String {
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        value["Message"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn add_is_content_addressed() {
        let node = MemoryTransport::new();
        let request = ApiRequest::api("add").body(Bytes::from_static(b"hello"), "data");

        let first = node.send(&request).await.unwrap();
        let second = node.send(&request).await.unwrap();
        assert_eq!(first.body, second.body);

        let parsed: serde_json::Value = serde_json::from_slice(&first.body).unwrap();
        assert_eq!(parsed["Hash"], MemoryTransport::address_of(b"hello"));
        assert_eq!(parsed["Size"], "5");
        assert!(node.is_pinned(&MemoryTransport::address_of(b"hello")));
    }

    #[tokio::test]
    async fn unknown_cat_uses_daemon_error_shape() {
        let node = MemoryTransport::new();
        let response = node.send(&ApiRequest::api("cat").arg("arg", "bafkmissing")).await.unwrap();
        assert_eq!(response.status, 500);
        assert!(message(&response).contains("not found"));
    }

    #[tokio::test]
    async fn offline_node_refuses_connections() {
        let node = MemoryTransport::new();
        node.set_offline(true);
        let err = node.send(&ApiRequest::api("id")).await.unwrap_err();
        assert!(matches!(err, IpfsError::Connection(_)));
        assert_eq!(node.call_count(), 1);
    }

    #[tokio::test]
    async fn unpin_of_unpinned_reports_not_pinned() {
        let node = MemoryTransport::new();
        let response = node.send(&ApiRequest::api("pin/rm").arg("arg", "bafkabc")).await.unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(message(&response), "not pinned or pinned indirectly");
    }
}
