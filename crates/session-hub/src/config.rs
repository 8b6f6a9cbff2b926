//! Session hub configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default management API / WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default prefix for minted join URLs.
pub const DEFAULT_JOIN_URL_BASE: &str = "/faculty/video-conference";

/// Default header carrying the caller identity authenticated upstream.
pub const DEFAULT_IDENTITY_HEADER: &str = "x-authenticated-user";

/// Default bounded outbound queue size per connection.
pub const DEFAULT_CONNECTION_QUEUE_CAPACITY: usize = 200;

/// Default time an empty room is kept around for reconnects.
pub const DEFAULT_ROOM_IDLE_TIMEOUT_SECONDS: u64 = 30;

/// Default HTTP request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Default hub instance ID prefix.
pub const DEFAULT_HUB_ID_PREFIX: &str = "hub";

/// Which [`SessionStore`](crate::store::SessionStore) backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::InvalidValue(format!(
                "HUB_STORE_BACKEND must be 'redis' or 'memory', got '{other}'"
            ))),
        }
    }
}

/// What a room does when a connection's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Close the slow connection; it will reconnect and resync from the roster.
    #[default]
    Disconnect,
    /// Drop the event for that connection only.
    Drop,
}

impl OverflowPolicy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            OverflowPolicy::Disconnect => "disconnect",
            OverflowPolicy::Drop => "drop",
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disconnect" => Ok(OverflowPolicy::Disconnect),
            "drop" => Ok(OverflowPolicy::Drop),
            other => Err(ConfigError::InvalidValue(format!(
                "HUB_OVERFLOW_POLICY must be 'disconnect' or 'drop', got '{other}'"
            ))),
        }
    }
}

/// Log output format for the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Session hub configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Store backend (default: redis).
    pub store_backend: StoreBackend,

    /// Redis connection URL. Required for the redis backend.
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: Option<SecretString>,

    /// Management API and WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this hub instance.
    pub hub_id: String,

    /// Prefix for join URLs minted when a session starts.
    pub join_url_base: String,

    /// Header carrying the authenticated caller id.
    pub identity_header: String,

    /// Bounded outbound queue per connection.
    pub connection_queue_capacity: usize,

    /// Behavior when a connection's outbound queue is full.
    pub overflow_policy: OverflowPolicy,

    /// How long an empty room is retained before it is collected.
    pub room_idle_timeout: Duration,

    /// HTTP request timeout.
    pub request_timeout: Duration,

    pub log_format: LogFormat,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("store_backend", &self.store_backend)
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("hub_id", &self.hub_id)
            .field("join_url_base", &self.join_url_base)
            .field("identity_header", &self.identity_header)
            .field("connection_queue_capacity", &self.connection_queue_capacity)
            .field("overflow_policy", &self.overflow_policy)
            .field("room_idle_timeout", &self.room_idle_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_number<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{name} must be a non-negative integer, got '{raw}'"))
        }),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let store_backend = vars
            .get("HUB_STORE_BACKEND")
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or(StoreBackend::Redis);

        let redis_url = vars.get("REDIS_URL").cloned().map(SecretString::from);
        if store_backend == StoreBackend::Redis && redis_url.is_none() {
            return Err(ConfigError::MissingEnvVar("REDIS_URL".to_string()));
        }

        let bind_address = vars
            .get("HUB_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("HUB_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let join_url_base = vars
            .get("HUB_JOIN_URL_BASE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_JOIN_URL_BASE.to_string());

        let identity_header = vars
            .get("HUB_IDENTITY_HEADER")
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_IDENTITY_HEADER.to_string());
        if axum::http::HeaderName::from_bytes(identity_header.as_bytes()).is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "HUB_IDENTITY_HEADER is not a valid header name: '{identity_header}'"
            )));
        }

        let connection_queue_capacity = parse_number(
            vars,
            "HUB_CONNECTION_QUEUE_CAPACITY",
            DEFAULT_CONNECTION_QUEUE_CAPACITY,
        )?;
        if connection_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "HUB_CONNECTION_QUEUE_CAPACITY must be greater than zero".to_string(),
            ));
        }

        let overflow_policy = vars
            .get("HUB_OVERFLOW_POLICY")
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or_default();

        let room_idle_timeout = Duration::from_secs(parse_number(
            vars,
            "HUB_ROOM_IDLE_TIMEOUT_SECONDS",
            DEFAULT_ROOM_IDLE_TIMEOUT_SECONDS,
        )?);

        let request_timeout = Duration::from_secs(parse_number(
            vars,
            "HUB_REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?);

        let log_format = match vars.get("HUB_LOG_FORMAT").map(|s| s.trim().to_ascii_lowercase()) {
            Some(ref f) if f == "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        // Generate hub instance ID
        let hub_id = vars.get("HUB_ID").cloned().unwrap_or_else(|| {
            let hostname = vars
                .get("HOSTNAME")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_HUB_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            store_backend,
            redis_url,
            bind_address,
            health_bind_address,
            hub_id,
            join_url_base,
            identity_header,
            connection_queue_capacity,
            overflow_policy,
            room_idle_timeout,
            request_timeout,
            log_format,
        })
    }
}
