use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::{IpfsError, Result};

/// Prefix of environment variables that override file settings,
/// e.g. `KOVA_IPFS_RETRY__MAX_ATTEMPTS=5`
pub const ENV_PREFIX: &str = "KOVA_IPFS";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the node's HTTP API (without `/api/v0`)
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Base URL of a read-only gateway (without `/ipfs`)
    #[serde(default)]
    pub gateway_url: Option<String>,

    /// Route `get` through the gateway instead of the API
    #[serde(default)]
    pub prefer_gateway: bool,

    /// Retry `get` against the gateway when the API is unreachable
    #[serde(default = "default_gateway_fallback")]
    pub gateway_fallback: bool,

    /// TCP/TLS connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Total timeout of a single HTTP round trip in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Deadline for one whole operation including retries; unset means none
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,

    /// Largest payload `add` accepts, in bytes
    #[serde(default = "default_max_add_size")]
    pub max_add_size: u64,

    /// Ask the node to pin content as part of `add`
    #[serde(default = "default_pin_on_add")]
    pub pin_on_add: bool,

    /// Idle connections kept per host in the pool
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Seconds an idle pooled connection is kept alive
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,

    /// Entries in the read cache; 0 disables caching
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Directory of the on-disk metadata store
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

/// Retry policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Upper bound on attempts, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomise half of each delay
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

/// Batch dispatch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Requests of one batch allowed in flight at once
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Deadline for a whole batch in milliseconds; unset means none
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

fn default_api_url() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_gateway_fallback() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_add_size() -> u64 {
    64 * 1024 * 1024 // 64 MiB
}

fn default_pin_on_add() -> bool {
    true
}

fn default_pool_max_idle_per_host() -> usize {
    8
}

fn default_pool_idle_timeout_secs() -> u64 {
    90
}

fn default_cache_capacity() -> usize {
    128
}

fn default_metadata_dir() -> PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".local/share"));
    path.push("kova-ipfs");
    path.push("metadata");
    path
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_jitter() -> bool {
    true
}

fn default_parallelism() -> usize {
    4
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            gateway_url: None,
            prefer_gateway: false,
            gateway_fallback: default_gateway_fallback(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            operation_timeout_ms: None,
            max_add_size: default_max_add_size(),
            pin_on_add: default_pin_on_add(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
            cache_capacity: default_cache_capacity(),
            metadata_dir: default_metadata_dir(),
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            deadline_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl ClientConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration file location
    pub fn default_location() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        path.push("kova-ipfs");
        path.push("config.toml");
        path
    }

    /// Load the layered configuration: defaults, then the TOML file if it
    /// exists, then `KOVA_IPFS_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_location);

        let settings = config::Config::builder()
            .add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        log::debug!("Loaded configuration (file: {})", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, without environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| IpfsError::Validation(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| IpfsError::Validation(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the client cannot operate with
    pub fn validate(&self) -> Result<()> {
        self.api_base()?;
        self.gateway_base()?;

        if self.prefer_gateway && self.gateway_url.is_none() {
            return Err(IpfsError::Validation(
                "prefer_gateway is set but gateway_url is not".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(IpfsError::Validation("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(IpfsError::Validation(
                "retry.max_delay_ms must not be smaller than retry.base_delay_ms".to_string(),
            ));
        }
        if self.batch.parallelism == 0 {
            return Err(IpfsError::Validation("batch.parallelism must be at least 1".to_string()));
        }
        if self.max_add_size == 0 {
            return Err(IpfsError::Validation("max_add_size must be at least 1".to_string()));
        }
        if self.request_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(IpfsError::Validation("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Parsed API base URL
    pub fn api_base(&self) -> Result<Url> {
        parse_http_url("api_url", &self.api_url)
    }

    /// Parsed gateway base URL, if one is configured
    pub fn gateway_base(&self) -> Result<Option<Url>> {
        self.gateway_url
            .as_deref()
            .map(|raw| parse_http_url("gateway_url", raw))
            .transpose()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch.deadline_ms.map(Duration::from_millis)
    }

    /// Look up a dotted key (`retry.max_attempts`) in this configuration
    pub fn get_key(&self, key: &str) -> Result<toml::Value> {
        let root = toml::Value::try_from(self)
            .map_err(|e| IpfsError::Validation(format!("failed to serialize config: {}", e)))?;

        let mut current = &root;
        for segment in key.split('.') {
            current = current
                .get(segment)
                .ok_or_else(|| IpfsError::Validation(format!("unknown or unset configuration key: {}", key)))?;
        }
        Ok(current.clone())
    }
}

fn parse_http_url(field: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| IpfsError::Validation(format!("{} '{}': {}", field, raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(IpfsError::Validation(format!(
            "{} must use http or https, not {}",
            field, other
        ))),
    }
}

/// Set a dotted key in the TOML file at `path`, creating the file if needed.
///
/// The raw value is typed the way TOML would read it (integer, float, bool),
/// falling back to a string when the typed value does not fit the field. The
/// resulting document must deserialize into a valid [`ClientConfig`] before
/// anything is written.
pub fn set_key_in_file(path: &Path, key: &str, raw: &str) -> Result<ClientConfig> {
    let mut document = match std::fs::read_to_string(path) {
        Ok(content) => content
            .parse::<toml::Table>()
            .map_err(|e| IpfsError::Validation(format!("failed to parse {}: {}", path.display(), e)))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
        Err(e) => return Err(e.into()),
    };

    let segments: Vec<&str> = key.split('.').map(str::trim).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(IpfsError::Validation(format!("malformed configuration key: {}", key)));
    }

    let mut last_err = None;
    for candidate in [infer_toml_value(raw), toml::Value::String(raw.to_string())] {
        let mut trial = document.clone();
        insert_dotted(&mut trial, &segments, candidate)?;

        match toml::Value::Table(trial.clone()).try_into::<ClientConfig>() {
            Ok(config) => match config.validate().and_then(|()| config.get_key(key).map(|_| ())) {
                Ok(()) => {
                    document = trial;
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    let content = toml::to_string_pretty(&document)
                        .map_err(|e| IpfsError::Validation(format!("failed to serialize config: {}", e)))?;
                    std::fs::write(path, content)?;
                    log::info!("Set {} in {}", key, path.display());
                    return Ok(config);
                }
                Err(e) => last_err = Some(e),
            },
            Err(e) => last_err = Some(IpfsError::Validation(format!("{} = {}: {}", key, raw, e))),
        }
    }

    Err(last_err.unwrap_or_else(|| IpfsError::Validation(format!("cannot set {}", key))))
}

fn infer_toml_value(raw: &str) -> toml::Value {
    if let Ok(i) = raw.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        toml::Value::Float(f)
    } else if let Ok(b) = raw.parse::<bool>() {
        toml::Value::Boolean(b)
    } else {
        toml::Value::String(raw.to_string())
    }
}

fn insert_dotted(table: &mut toml::Table, segments: &[&str], value: toml::Value) -> Result<()> {
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| IpfsError::Validation("empty configuration key".to_string()))?;

    let mut current = table;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        current = match entry {
            toml::Value::Table(t) => t,
            _ => {
                return Err(IpfsError::Validation(format!(
                    "configuration key segment '{}' is not a table",
                    segment
                )))
            }
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}
