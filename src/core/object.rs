use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::{IpfsError, Result};

/// Longest address accepted; real CIDs stay well below this
const MAX_ADDRESS_LEN: usize = 256;

/// Content identifier returned by the node after a store operation.
///
/// Opaque to the client. Construction validates the shape only: non-empty and
/// ASCII alphanumeric, which covers the base58btc and base32 multibase
/// alphabets the node emits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentAddress(String);

impl ContentAddress {
    /// Validate and wrap an address string
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IpfsError::Validation("content address is empty".to_string()));
        }
        if s.len() > MAX_ADDRESS_LEN {
            return Err(IpfsError::Validation(format!(
                "content address is {} characters long (max {})",
                s.len(),
                MAX_ADDRESS_LEN
            )));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(IpfsError::Validation(format!("malformed content address: {}", s)));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentAddress {
    type Err = IpfsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentAddress {
    type Error = IpfsError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ContentAddress> for String {
    fn from(addr: ContentAddress) -> Self {
        addr.0
    }
}

/// Scalar value stored in client-side metadata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    /// Interpret a command-line string, preferring the narrowest scalar type
    pub fn parse_lossy(raw: &str) -> Self {
        if let Ok(b) = raw.parse::<bool>() {
            MetadataValue::Bool(b)
        } else if let Ok(i) = raw.parse::<i64>() {
            MetadataValue::Integer(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            MetadataValue::Float(f)
        } else {
            MetadataValue::Text(raw.to_string())
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Integer(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        MetadataValue::Float(x)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Client-defined key/value pairs attached to a content address, ordered by key
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Option<MetadataValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    /// Parse `key=value` pairs as given on the command line
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut metadata = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| IpfsError::Validation(format!("expected key=value, got '{}'", pair)))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(IpfsError::Validation(format!("empty metadata key in '{}'", pair)));
            }
            metadata.insert(key, MetadataValue::parse_lossy(value.trim()));
        }
        Ok(metadata)
    }
}

/// Logical unit handed to the client for storage
#[derive(Clone, Debug, Default)]
pub struct StoredItem {
    /// Payload bytes
    pub data: Bytes,
    /// File name sent with the multipart upload, if any
    pub name: Option<String>,
    /// Metadata to record once the node returns an address
    pub metadata: Option<Metadata>,
}

impl StoredItem {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            name: None,
            metadata: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl From<Bytes> for StoredItem {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for StoredItem {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for StoredItem {
    fn from(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }
}

impl From<String> for StoredItem {
    fn from(data: String) -> Self {
        Self::new(data)
    }
}

impl From<&str> for StoredItem {
    fn from(data: &str) -> Self {
        Self::new(Bytes::copy_from_slice(data.as_bytes()))
    }
}

/// Pinned state of a content address on the node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRecord {
    pub address: ContentAddress,
    pub pinned: bool,
}

/// Per-item outcomes of a batch, in input order
#[derive(Debug)]
pub struct BatchResult<T> {
    items: Vec<Result<T>>,
}

impl<T> BatchResult<T> {
    pub(crate) fn new(items: Vec<Result<T>>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Result<T>> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Result<T>> {
        self.items.iter()
    }

    pub fn success_count(&self) -> usize {
        self.items.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.items.len() - self.success_count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.items.iter().all(|r| r.is_ok())
    }

    pub fn into_results(self) -> Vec<Result<T>> {
        self.items
    }
}

impl<T> IntoIterator for BatchResult<T> {
    type Item = Result<T>;
    type IntoIter = std::vec::IntoIter<Result<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Identity of the node behind the API endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub agent_version: String,
    pub protocol_version: String,
    pub addresses: Vec<String>,
}

/// Bandwidth counters reported by the node
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct BandwidthStats {
    pub total_in: u64,
    pub total_out: u64,
    pub rate_in: f64,
    pub rate_out: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG")]
    #[case("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi")]
    fn accepts_cid_shapes(#[case] raw: &str) {
        let addr = ContentAddress::parse(raw).unwrap();
        assert_eq!(addr.as_str(), raw);
        assert_eq!(addr.to_string(), raw);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("Qm/../etc")]
    #[case("bafy with spaces")]
    fn rejects_malformed_addresses(#[case] raw: &str) {
        let err = ContentAddress::parse(raw).unwrap_err();
        assert!(matches!(err, IpfsError::Validation(_)));
    }

    #[test]
    fn rejects_overlong_address() {
        let raw = "a".repeat(MAX_ADDRESS_LEN + 1);
        assert!(ContentAddress::parse(&raw).is_err());
    }

    #[test]
    fn address_serde_validates() {
        let ok: ContentAddress = serde_json::from_str("\"bafkabc\"").unwrap();
        assert_eq!(ok.as_str(), "bafkabc");
        assert!(serde_json::from_str::<ContentAddress>("\"not/valid\"").is_err());
    }

    #[test]
    fn metadata_from_pairs_infers_scalars() {
        let md = Metadata::from_pairs(["sensor=temp-01", "count=42", "ratio=0.5", "ok=true"]).unwrap();
        assert_eq!(md.get("sensor"), Some(&MetadataValue::Text("temp-01".into())));
        assert_eq!(md.get("count"), Some(&MetadataValue::Integer(42)));
        assert_eq!(md.get("ratio"), Some(&MetadataValue::Float(0.5)));
        assert_eq!(md.get("ok"), Some(&MetadataValue::Bool(true)));

        let keys: Vec<_> = md.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["count", "ok", "ratio", "sensor"]);
    }

    #[test]
    fn metadata_from_pairs_rejects_missing_separator() {
        assert!(Metadata::from_pairs(["novalue"]).is_err());
        assert!(Metadata::from_pairs(["=value"]).is_err());
    }

    #[test]
    fn metadata_json_roundtrip_keeps_scalar_types() {
        let md = Metadata::new().with("a", 1i64).with("b", "x").with("c", false);
        let json = serde_json::to_string(&md).unwrap();
        assert_eq!(json, r#"{"a":1,"b":"x","c":false}"#);
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, md);
    }

    #[test]
    fn batch_result_counts() {
        let batch: BatchResult<u8> = BatchResult::new(vec![
            Ok(1),
            Err(IpfsError::Timeout("t".into())),
            Ok(3),
        ]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.success_count(), 2);
        assert_eq!(batch.failure_count(), 1);
        assert!(!batch.all_succeeded());
    }
}
