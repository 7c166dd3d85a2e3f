//! Configuration of clusters, pools, endpoints and connections.
//!
//! All types implement [`Default`]. With the `serde` feature enabled they
//! also implement `serde::Deserialize`, so they can be loaded from any
//! format the caller picks; durations are given as `{ secs, nanos }`.

use std::time::Duration;

use cassette_cql::frame::response::event::Event;
use cassette_cql::frame::Compression;
use tokio::sync::mpsc;

use crate::errors::ConfigError;

const DEFAULT_PORT: u16 = 9042;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sizing and maintenance of a connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Number of connections opened when the pool is created, and the floor
    /// below which idle eviction never goes.
    pub min_connections: usize,

    /// Hard ceiling on connections managed by the pool, idle and busy together.
    pub max_connections: usize,

    /// Damping factor of idle eviction: one pass destroys at most
    /// `(max_connections - min_connections) / eviction_divisor` idle
    /// connections.
    pub eviction_divisor: usize,

    /// How many times `borrow` polls for an idle connection or room to create
    /// one before giving up. Borrow never waits for capacity.
    pub max_borrow_attempts: usize,

    /// Delay before the first eviction pass.
    pub eviction_due_interval: Duration,

    /// Delay between eviction passes.
    pub eviction_periodic_interval: Duration,

    /// Keep idle connections in separate buckets per bound keyspace.
    ///
    /// When disabled, a single idle set is used and a borrowed connection is
    /// switched to the requested keyspace if needed.
    pub partition_by_keyspace: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 16,
            eviction_divisor: 4,
            max_borrow_attempts: 8,
            eviction_due_interval: Duration::from_secs(30),
            eviction_periodic_interval: Duration::from_secs(60),
            partition_by_keyspace: false,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroMaxConnections);
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::MinAboveMax {
                min: self.min_connections,
                max: self.max_connections,
            });
        }
        if self.eviction_divisor == 0 {
            return Err(ConfigError::ZeroEvictionDivisor);
        }
        Ok(())
    }

    /// Upper bound of idle connections destroyed by one eviction pass. Zero
    /// when the spread between the bounds is below the divisor.
    pub(crate) fn eviction_quota(&self) -> usize {
        let spread = self.max_connections.saturating_sub(self.min_connections);
        spread / self.eviction_divisor.max(1)
    }
}

/// Timing of blacklist recovery probes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EndpointManagerConfig {
    /// Delay before the first pass once recovery is armed, and the retry
    /// delay after a pass that failed unexpectedly.
    pub recovery_due_interval: Duration,

    /// Delay between passes while endpoints stay blacklisted.
    pub recovery_periodic_interval: Duration,
}

impl Default for EndpointManagerConfig {
    fn default() -> Self {
        Self {
            recovery_due_interval: Duration::from_secs(1),
            recovery_periodic_interval: Duration::from_secs(10),
        }
    }
}

/// One node of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct EndpointConfig {
    /// Host name or IP literal.
    pub address: String,
    #[cfg_attr(feature = "serde", serde(default = "default_port"))]
    pub port: u16,
    /// Falls back to [`ClusterConfig::connect_timeout`] when unset.
    #[cfg_attr(feature = "serde", serde(default))]
    pub connect_timeout: Option<Duration>,
}

#[cfg(feature = "serde")]
fn default_port() -> u16 {
    DEFAULT_PORT
}

impl EndpointConfig {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            connect_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout);
        self
    }
}

impl From<&str> for EndpointConfig {
    /// Parses `host` or `host:port`.
    fn from(value: &str) -> Self {
        match value.rsplit_once(':') {
            Some((address, port)) if !address.contains(':') => match port.parse() {
                Ok(port) => EndpointConfig::new(address, port),
                Err(_) => EndpointConfig::new(value, DEFAULT_PORT),
            },
            _ => EndpointConfig::new(value, DEFAULT_PORT),
        }
    }
}

/// Username and password sent in answer to AUTHENTICATE.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct PlainCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for PlainCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Settings of a single native protocol connection.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConnectionConfig {
    /// Body compression requested in STARTUP. Falls back to none when the
    /// server does not support it.
    pub compression: Option<Compression>,
    pub credentials: Option<PlainCredentials>,
    pub tcp_nodelay: bool,
    pub tcp_keepalive_interval: Option<Duration>,
    /// Receives events pushed by the server. When set, connections REGISTER
    /// for all event types during the handshake.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub event_sender: Option<mpsc::Sender<Event>>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            compression: None,
            credentials: None,
            tcp_nodelay: true,
            tcp_keepalive_interval: None,
            event_sender: None,
        }
    }
}

/// Everything needed to build a [`Cluster`](crate::Cluster).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct ClusterConfig {
    /// Name the cluster is registered and logged under.
    pub name: String,
    pub endpoints: Vec<EndpointConfig>,
    /// Attempts of one `execute` call before the last error is returned.
    #[cfg_attr(feature = "serde", serde(default = "default_max_retries"))]
    pub max_retries: usize,
    #[cfg_attr(feature = "serde", serde(default))]
    pub pool: PoolConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub endpoint_manager: EndpointManagerConfig,
    /// Default connect timeout of the endpoints.
    #[cfg_attr(feature = "serde", serde(default = "default_connect_timeout"))]
    pub connect_timeout: Duration,
}

fn default_max_retries() -> usize {
    3
}

#[cfg(feature = "serde")]
fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

impl ClusterConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoints: Vec::new(),
            max_retries: default_max_retries(),
            pool: PoolConfig::default(),
            endpoint_manager: EndpointManagerConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<EndpointConfig>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_endpoint_manager(mut self, endpoint_manager: EndpointManagerConfig) -> Self {
        self.endpoint_manager = endpoint_manager;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints(self.name.clone()));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroMaxRetries);
        }
        self.pool.validate()
    }
}
