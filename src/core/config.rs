//! Client configuration.
//!
//! Configuration is built in code with `Default` plus `with_*` setters, or
//! loaded from a TOML document. Values can then be overridden from the
//! environment:
//!
//! 1. TOML file (`ClientConfig::from_file`) or defaults
//! 2. `SCANLINE_*` environment variables (`ClientConfig::apply_env_overrides`)
//! 3. `validate()`

use crate::connection::ReconnectPolicy;
use crate::core::error::ScanError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default location of the engine's scan socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/avast/scan.sock";

/// Default request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Where the engine listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SocketAddress {
    /// A local (Unix domain) stream socket.
    Unix(PathBuf),
    /// A TCP `host:port` address.
    Tcp(String),
}

impl Default for SocketAddress {
    fn default() -> Self {
        Self::Unix(PathBuf::from(DEFAULT_SOCKET_PATH))
    }
}

impl FromStr for SocketAddress {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScanError::configuration("socket address is empty"));
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            return Ok(Self::Tcp(addr.to_string()));
        }
        if let Some(path) = s.strip_prefix("unix://").or_else(|| s.strip_prefix("unix:")) {
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if s.starts_with('/') || s.starts_with('.') {
            return Ok(Self::Unix(PathBuf::from(s)));
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(s.to_string()))
            }
            _ => Ok(Self::Unix(PathBuf::from(s))),
        }
    }
}

impl TryFrom<String> for SocketAddress {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SocketAddress> for String {
    fn from(value: SocketAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Configuration for a scan client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Address of the engine's scan socket.
    pub socket_address: SocketAddress,

    /// Deadline for a single scan or info request, measured from when it starts.
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,

    /// Timeout for a single connection attempt.
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Longest response line accepted before the partial line is discarded.
    pub max_line_length: usize,

    /// Capacity of the channel between the socket reader and the aggregator.
    pub record_buffer: usize,

    /// How connection attempts are retried within one `connect()`.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_address: SocketAddress::default(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            connect_timeout: Duration::from_secs(5),
            max_line_length: 64 * 1024, // 64 KiB
            record_buffer: 256,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given socket address.
    pub fn with_socket_address(mut self, address: SocketAddress) -> Self {
        self.socket_address = address;
        self
    }

    /// Uses a Unix socket at `path`.
    pub fn with_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_address = SocketAddress::Unix(path.into());
        self
    }

    /// Uses a TCP connection to `address` (`host:port`).
    pub fn with_tcp(mut self, address: impl Into<String>) -> Self {
        self.socket_address = SocketAddress::Tcp(address.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the maximum response line length.
    pub fn with_max_line_length(mut self, length: usize) -> Self {
        self.max_line_length = length;
        self
    }

    /// Sets the reader-to-aggregator channel capacity.
    pub fn with_record_buffer(mut self, capacity: usize) -> Self {
        self.record_buffer = capacity;
        self
    }

    /// How long a connection may stay silent before it is torn down.
    pub fn idle_timeout(&self) -> Duration {
        self.connect_timeout + self.request_timeout
    }

    /// Parses a configuration from a TOML string. Missing keys take defaults.
    pub fn parse(toml_str: &str) -> Result<Self, ScanError> {
        toml::from_str(toml_str).map_err(|e| ScanError::configuration(e.to_string()))
    }

    /// Loads and validates a configuration from a TOML file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScanError::configuration(format!("config file not found: {}", path.display()))
            } else {
                ScanError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides values from `SCANLINE_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SCANLINE_SOCKET_ADDRESS") {
            match val.parse() {
                Ok(address) => self.socket_address = address,
                Err(e) => tracing::warn!(
                    env_key = "SCANLINE_SOCKET_ADDRESS",
                    value = val.as_str(),
                    error = %e,
                    "ignoring invalid socket address from env var"
                ),
            }
        }
        override_millis(&mut self.request_timeout, "SCANLINE_REQUEST_TIMEOUT_MS");
        override_millis(&mut self.connect_timeout, "SCANLINE_CONNECT_TIMEOUT_MS");
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.request_timeout.is_zero() {
            return Err(ScanError::configuration("request timeout must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ScanError::configuration("connect timeout must be non-zero"));
        }
        if self.record_buffer == 0 {
            return Err(ScanError::configuration("record buffer must be non-zero"));
        }
        if self.max_line_length < 64 {
            return Err(ScanError::configuration(
                "max line length must be at least 64 bytes",
            ));
        }
        if let SocketAddress::Unix(path) = &self.socket_address {
            if path.as_os_str().is_empty() {
                return Err(ScanError::configuration("socket path is empty"));
            }
        }
        Ok(())
    }
}

fn override_millis(target: &mut Duration, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = Duration::from_millis(parsed),
            Err(_) => tracing::warn!(
                env_key,
                value = val.as_str(),
                "failed to parse milliseconds from env var, ignoring"
            ),
        }
    }
}

/// Serde helper for Duration serialization as milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
