//! Response bodies of the node's HTTP API and classification of failures.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::core::{BandwidthStats, IpfsError, NodeInfo, Result};
use crate::transport::{ApiResponse, Endpoint};

/// `/api/v0/add`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AddResponse {
    pub hash: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: Option<String>,
}

/// `/api/v0/pin/add` and `/api/v0/pin/rm`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct PinsResponse {
    #[serde(default)]
    pub pins: Option<Vec<String>>,
}

/// `/api/v0/pin/ls`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct PinLsResponse {
    #[serde(default)]
    pub keys: BTreeMap<String, PinLsEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PinLsEntry {
    #[serde(rename = "Type")]
    pub kind: String,
}

/// `/api/v0/id`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct IdResponse {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
    #[serde(default)]
    pub agent_version: String,
    #[serde(default)]
    pub protocol_version: String,
}

impl From<IdResponse> for NodeInfo {
    fn from(r: IdResponse) -> Self {
        NodeInfo {
            id: r.id,
            agent_version: r.agent_version,
            protocol_version: r.protocol_version,
            addresses: r.addresses.unwrap_or_default(),
        }
    }
}

/// `/api/v0/version`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct VersionResponse {
    pub version: String,
}

/// `/api/v0/stats/bw`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct BandwidthResponse {
    #[serde(default)]
    pub total_in: u64,
    #[serde(default)]
    pub total_out: u64,
    #[serde(default)]
    pub rate_in: f64,
    #[serde(default)]
    pub rate_out: f64,
}

impl From<BandwidthResponse> for BandwidthStats {
    fn from(r: BandwidthResponse) -> Self {
        BandwidthStats {
            total_in: r.total_in,
            total_out: r.total_out,
            rate_in: r.rate_in,
            rate_out: r.rate_out,
        }
    }
}

/// Error body the daemon sends with non-2xx statuses
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    message: String,
}

/// Decode a JSON response. Commands that stream several objects (newline
/// delimited) yield their last object, which carries the final result.
pub(crate) fn parse_json<T: DeserializeOwned>(response: &ApiResponse) -> Result<T> {
    let text = std::str::from_utf8(&response.body).map_err(|_| IpfsError::Remote {
        status: response.status,
        message: "response body is not UTF-8".to_string(),
    })?;
    let last = text
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");
    serde_json::from_str(last).map_err(|e| IpfsError::Remote {
        status: response.status,
        message: format!("unexpected response body: {}", e),
    })
}

/// Human-readable message of a failed response
pub(crate) fn error_message(response: &ApiResponse) -> String {
    match serde_json::from_slice::<ErrorResponse>(&response.body) {
        Ok(err) => err.message,
        Err(_) => {
            let text = String::from_utf8_lossy(&response.body).trim().to_string();
            if text.is_empty() {
                format!("HTTP status {}", response.status)
            } else {
                text
            }
        }
    }
}

/// Map a non-2xx response onto an error kind.
///
/// The daemon answers most failures with status 500 and a JSON message, so
/// the message decides between "unknown address" and a generic node error.
pub(crate) fn classify(response: &ApiResponse, endpoint: Endpoint, subject: &str) -> IpfsError {
    let message = error_message(response);
    let lower = message.to_lowercase();
    let status = response.status;

    // an unknown API command, not an unknown address
    if endpoint == Endpoint::Api && status == 404 {
        return IpfsError::Remote { status, message };
    }

    let missing = (endpoint == Endpoint::Gateway && (status == 404 || status == 410))
        || lower.contains("not found")
        || lower.contains("could not find")
        || lower.contains("no link named");
    if missing {
        return IpfsError::NotFound(format!("{}: {}", subject, message));
    }

    if status == 400 || lower.contains("invalid cid") || lower.contains("invalid path") {
        return IpfsError::Validation(format!("{}: {}", subject, message));
    }

    if status == 408 {
        return IpfsError::Timeout(format!("{}: {}", subject, message));
    }

    IpfsError::Remote { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn response(status: u16, body: &str) -> ApiResponse {
        ApiResponse::new(status, body.to_string())
    }

    #[test]
    fn add_response_takes_last_line() {
        let body = "{\"Name\":\"a\",\"Hash\":\"QmA\",\"Size\":\"1\"}\n{\"Name\":\"b\",\"Hash\":\"QmB\",\"Size\":\"2\"}\n";
        let parsed: AddResponse = parse_json(&response(200, body)).unwrap();
        assert_eq!(parsed.hash, "QmB");
        assert_eq!(parsed.name, "b");
        assert_eq!(parsed.size.as_deref(), Some("2"));
    }

    #[test]
    fn garbage_body_is_a_remote_error() {
        let err = parse_json::<AddResponse>(&response(200, "<html>")).unwrap_err();
        assert!(matches!(err, IpfsError::Remote { status: 200, .. }));
    }

    #[test]
    fn pin_ls_keys() {
        let body = r#"{"Keys":{"QmA":{"Type":"recursive"},"QmB":{"Type":"direct"}}}"#;
        let parsed: PinLsResponse = parse_json(&response(200, body)).unwrap();
        assert_eq!(parsed.keys.len(), 2);
        assert_eq!(parsed.keys["QmB"].kind, "direct");
    }

    #[test]
    fn id_with_null_addresses() {
        let body = r#"{"ID":"12D3Koo","PublicKey":"x","Addresses":null,"AgentVersion":"kubo/0.24.0","ProtocolVersion":"ipfs/0.1.0"}"#;
        let info: NodeInfo = parse_json::<IdResponse>(&response(200, body)).unwrap().into();
        assert_eq!(info.id, "12D3Koo");
        assert!(info.addresses.is_empty());
        assert_eq!(info.agent_version, "kubo/0.24.0");
    }

    #[rstest]
    #[case(Endpoint::Api, 500, r#"{"Message":"block was not found locally (offline): ipld: could not find QmX","Code":0,"Type":"error"}"#, "NotFoundError")]
    #[case(Endpoint::Api, 500, r#"{"Message":"merkledag: not found","Code":0,"Type":"error"}"#, "NotFoundError")]
    #[case(Endpoint::Gateway, 404, "ipfs resolve -r /ipfs/QmX: no link named", "NotFoundError")]
    #[case(Endpoint::Api, 404, "404 page not found", "IPFSError")]
    #[case(Endpoint::Api, 400, r#"{"Message":"argument \"ipfs-path\" is required","Code":1,"Type":"error"}"#, "ValidationError")]
    #[case(Endpoint::Api, 500, r#"{"Message":"invalid cid: selected encoding not supported","Code":0,"Type":"error"}"#, "ValidationError")]
    #[case(Endpoint::Api, 500, r#"{"Message":"not pinned or pinned indirectly","Code":0,"Type":"error"}"#, "IPFSError")]
    #[case(Endpoint::Api, 503, "", "IPFSError")]
    fn classification(#[case] endpoint: Endpoint, #[case] status: u16, #[case] body: &str, #[case] kind: &str) {
        let err = classify(&response(status, body), endpoint, "QmX");
        assert_eq!(err.kind().as_str(), kind, "{:?}", err);
    }

    #[test]
    fn empty_error_body_mentions_status() {
        assert_eq!(error_message(&response(503, "")), "HTTP status 503");
    }
}
