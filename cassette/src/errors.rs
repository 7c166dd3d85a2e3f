//! Errors returned by the driver.

use std::error::Error as StdError;
use std::sync::Arc;

use cassette_cql::frame::frame_errors::{
    CqlEventParseError, CqlRequestSerializationError, CqlResponseParseError, FrameError,
};
use cassette_cql::frame::response::error::DbError;
use cassette_cql::frame::response::CqlResponseKind;
use thiserror::Error;

/// An error that occurred while opening a connection: connecting the socket
/// or performing the STARTUP handshake.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Connect timeout elapsed before the socket was established.
    #[error("Connect timeout elapsed")]
    ConnectTimeout,

    /// Input/Output error occurred.
    #[error(transparent)]
    IoError(Arc<std::io::Error>),

    /// The endpoint's address did not resolve to any socket address.
    #[error("Address {0} did not resolve to any socket address")]
    AddressResolution(String),

    /// The server asked for authentication, but no credentials were configured.
    #[error("Server requires authentication with {authenticator}, but no credentials were configured")]
    MissingCredentials { authenticator: String },

    /// A request sent during the handshake failed.
    #[error("Handshake request failed: {0}")]
    Handshake(#[from] RequestError),

    /// The server answered a handshake request with a response of an
    /// unexpected kind.
    #[error("Unexpected response to handshake request: {0}")]
    UnexpectedHandshakeResponse(CqlResponseKind),
}

impl From<std::io::Error> for ConnectionError {
    fn from(value: std::io::Error) -> Self {
        ConnectionError::IoError(Arc::new(value))
    }
}

/// Error that caused a connection to break.
///
/// A broken connection never recovers: it reports itself closed and must be
/// discarded.
#[derive(Error, Debug, Clone)]
#[error("Connection broken, reason: {0}")]
pub struct BrokenConnectionError(Arc<dyn StdError + Sync + Send>);

impl BrokenConnectionError {
    /// Retrieve an error reason by downcasting to specific type.
    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

/// A reason why a connection broke.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BrokenConnectionErrorKind {
    /// Reading a frame from the socket failed.
    #[error("Failed to read a frame: {0}")]
    FrameError(#[from] FrameError),

    /// Writing a request to the socket failed.
    #[error("Failed to write a request: {0}")]
    WriteError(std::io::Error),

    /// A frame arrived on a stream nobody was waiting on.
    #[error("Received response on stream {received}, while waiting on {expected:?}")]
    UnexpectedStreamId { received: i8, expected: Option<i8> },

    /// An event pushed by the server could not be decoded.
    #[error("Failed to decode an event: {0}")]
    CqlEventParseError(#[from] CqlEventParseError),

    /// The connection was closed by the client.
    #[error("Connection closed by the client")]
    ClosedByClient,

    /// A request was dropped before its response arrived. The stale response
    /// would be mistaken for the answer to the next request.
    #[error("Request cancelled while awaiting its response")]
    RequestCancelled,
}

impl From<BrokenConnectionErrorKind> for BrokenConnectionError {
    fn from(value: BrokenConnectionErrorKind) -> Self {
        BrokenConnectionError(Arc::new(value))
    }
}

/// An error of a single request sent over a connection.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum RequestError {
    /// The database sent an ERROR response.
    #[error("Database returned an error: {0}, Error message: {1}")]
    DbError(DbError, String),

    /// The connection broke while the request was in flight.
    #[error(transparent)]
    BrokenConnection(#[from] BrokenConnectionError),

    /// Another request is already in flight on this connection.
    #[error("Connection is busy with another request")]
    Busy,

    /// The server's response violated the protocol.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection is not open.
    #[error("Connection is closed")]
    Closed,

    /// The request could not be serialized.
    #[error("Failed to serialize request: {0}")]
    Serialization(#[from] CqlRequestSerializationError),

    /// Keyspace name given to `use_keyspace` is not valid.
    #[error(transparent)]
    BadKeyspaceName(#[from] BadKeyspaceName),
}

/// A response that broke the rules of the protocol.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// The response body could not be decoded.
    #[error("Failed to decode response: {0}")]
    ResponseParse(#[from] CqlResponseParseError),

    /// Decompressing the body or reading its tracing id failed.
    #[error("Failed to read response body extensions: {0}")]
    BodyExtensions(Arc<FrameError>),

    /// The response kind does not answer the request that was sent.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(CqlResponseKind),

    /// The result kind does not answer the request that was sent.
    #[error("Unexpected result kind: {0}")]
    UnexpectedResult(&'static str),

    /// The server switched to a different keyspace than requested.
    #[error("Keyspace name mismatch; expected: {expected_keyspace_name_lowercase}, received: {result_keyspace_name_lowercase}")]
    KeyspaceNameMismatch {
        expected_keyspace_name_lowercase: String,
        result_keyspace_name_lowercase: String,
    },

    /// `system.local` did not contain a cluster name.
    #[error("system.local returned no cluster name")]
    MissingClusterName,
}

/// Invalid keyspace name given to `use_keyspace()`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BadKeyspaceName {
    /// Keyspace name is empty
    #[error("Keyspace name is empty")]
    Empty,

    /// Keyspace name too long, must be up to 48 characters
    #[error("Keyspace name too long, must be up to 48 characters, found {1} characters. Bad keyspace name: '{0}'")]
    TooLong(String, usize),

    /// Illegal character - only alphanumeric and underscores allowed.
    #[error("Illegal character found: '{1}', only alphanumeric and underscores allowed. Bad keyspace name: '{0}'")]
    IllegalCharacter(String, char),
}

/// Errors of the endpoint manager.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// Every configured endpoint is blacklisted.
    #[error("Cluster {cluster} is down: no endpoint available among [{endpoints}]")]
    ClusterDown { cluster: String, endpoints: String },
}

/// Errors of borrowing a connection from the pool.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// No idle connection was found and no new one could be created within
    /// the allowed number of polls.
    #[error("No connection available after {attempts} attempts")]
    NoConnectionAvailable { attempts: usize },

    /// A new connection was needed, but all endpoints are blacklisted.
    #[error(transparent)]
    NoEndpointAvailable(#[from] EndpointError),

    /// The server rejected the requested keyspace, or its name is invalid.
    #[error("Failed to switch connection to keyspace {keyspace}: {error}")]
    UseKeyspace { keyspace: String, error: RequestError },
}

impl PoolError {
    /// Whether the pool itself failed, as opposed to the request for it.
    /// Only fatal errors warrant rebuilding the cluster state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PoolError::NoConnectionAvailable { .. } | PoolError::NoEndpointAvailable(_)
        )
    }
}

/// Error returned by `Cluster::execute`.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ExecutionError<E> {
    /// No connection could be borrowed. A rebuild of the cluster state was
    /// requested if the error is [fatal](PoolError::is_fatal).
    #[error("Failed to borrow a connection: {0}")]
    Pool(#[from] PoolError),

    /// The unit of work failed, with no retries left.
    #[error("Request failed after {attempts} attempt(s): {error}")]
    Request { error: E, attempts: usize },
}

/// Invalid cluster or pool configuration.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Cluster {0} has no endpoints configured")]
    NoEndpoints(String),
    #[error("max_connections must be positive")]
    ZeroMaxConnections,
    #[error("min_connections ({min}) is greater than max_connections ({max})")]
    MinAboveMax { min: usize, max: usize },
    #[error("eviction_divisor must be positive")]
    ZeroEvictionDivisor,
    #[error("max_retries must be positive")]
    ZeroMaxRetries,
}

/// Errors of the cluster registry.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Cluster {0} is already registered")]
    AlreadyRegistered(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
