//! Collector configuration with validation.
//!
//! Loaded from TOML. Durations accept `"500ms"`, `"30s"`, `"1m"` or plain
//! seconds.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main collector configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Ingress bridge (HTTP push endpoint)
    pub input: InputConfig,
    /// Egress client (HTTP republisher)
    pub output: OutputConfig,
    /// Relay between the two
    pub pipeline: PipelineConfig,
}

impl CollectorConfig {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.input.validate()?;
        self.output.validate()?;

        if self.pipeline.max_in_flight == 0 {
            return Err(ConfigError::InvalidLimit(
                "pipeline.max_in_flight cannot be 0".into(),
            ));
        }

        Ok(())
    }
}

/// How the tenant filter obtains the caller's claims
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimsSourceKind {
    /// Decode the bearer JWT payload
    #[default]
    BearerJwt,
    /// Reuse the claims of the introspection verdict
    Introspection,
}

/// Ingress bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Listen address (default: 0.0.0.0:4196)
    pub address: String,
    /// Route served by the bridge (default: /)
    pub path: String,
    /// OAuth2 token introspection endpoint (required)
    pub introspect_url: String,
    /// Introspection verdict cache
    pub cache: CacheConfig,
    /// Where tenant memberships are read from
    pub claims_source: ClaimsSourceKind,
    /// Max request body size in bytes (default: 2MB)
    pub max_body_size: usize,
    /// Optional end-to-end bound on a request (unset = wait on the client)
    #[serde(with = "humantime_serde::option")]
    pub request_timeout: Option<Duration>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:4196".to_string(),
            path: "/".to_string(),
            introspect_url: String::new(),
            cache: CacheConfig::default(),
            claims_source: ClaimsSourceKind::default(),
            max_body_size: 2 * 1024 * 1024, // 2MB
            request_timeout: None,
        }
    }
}

impl InputConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.introspect_url.is_empty() {
            return Err(ConfigError::Missing("input.introspect_url"));
        }
        if self.address.is_empty() {
            return Err(ConfigError::Missing("input.address"));
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "input.path must start with '/', got {:?}",
                self.path
            )));
        }
        if self.max_body_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "input.max_body_size cannot be 0".into(),
            ));
        }
        if matches!(self.request_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::InvalidTimeout(
                "input.request_timeout cannot be 0".into(),
            ));
        }
        self.cache.validate()
    }
}

/// Introspection cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of frequency counters used by the admission policy
    pub num_counters: usize,
    /// Total cost budget (each verdict costs 1)
    pub max_cost: u64,
    /// Reads buffered before being folded into the frequency counters
    pub buffer_items: usize,
    /// Time-to-live of a cached verdict, fixed at insertion
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            num_counters: 10_000,
            max_cost: 1_000,
            buffer_items: 64,
            ttl: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_counters == 0 {
            return Err(ConfigError::InvalidLimit(
                "cache.num_counters cannot be 0".into(),
            ));
        }
        if self.max_cost == 0 {
            return Err(ConfigError::InvalidLimit("cache.max_cost cannot be 0".into()));
        }
        if self.buffer_items == 0 {
            return Err(ConfigError::InvalidLimit(
                "cache.buffer_items cannot be 0".into(),
            ));
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::InvalidTimeout("cache.ttl cannot be 0".into()));
        }
        Ok(())
    }
}

/// Egress client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Remote endpoint messages are POSTed to (required)
    pub url: String,
    /// Tenant stamped on every outgoing request (required)
    pub organization: String,
    /// Machine credential exchange
    pub auth: AuthConfig,
    /// TLS options for the egress client
    pub tls: TlsConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            organization: String::new(),
            auth: AuthConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl OutputConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Missing("output.url"));
        }
        if self.organization.is_empty() {
            return Err(ConfigError::Missing("output.organization"));
        }
        if self.auth.url.is_empty() {
            return Err(ConfigError::Missing("output.auth.url"));
        }
        if self.auth.token.is_empty() {
            return Err(ConfigError::Missing("output.auth.token"));
        }
        Ok(())
    }
}

/// Machine-to-machine credential exchange
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Exchange endpoint (required)
    pub url: String,
    /// Long-lived secret exchanged for a bearer token (required)
    pub token: String,
    /// Refresh when the held token expires within this margin
    #[serde(with = "humantime_serde")]
    pub refresh_margin: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            refresh_margin: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("refresh_margin", &self.refresh_margin)
            .finish()
    }
}

/// TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Accept any server certificate (DANGER)
    pub skip_cert_verify: bool,
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent egress writes
    pub max_in_flight: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_in_flight: 10 }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config: {0}")]
    Read(String),
    /// Document is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// Required field left empty
    #[error("missing required field: {0}")]
    Missing(&'static str),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::{format_duration, parse_duration};
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&format_duration(*d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }

    fn format_duration(duration: Duration) -> String {
        if duration.subsec_millis() != 0 {
            format!("{}ms", duration.as_millis())
        } else {
            format!("{}s", duration.as_secs())
        }
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .trim()
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(|_| "invalid hours")
        } else {
            // Plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
