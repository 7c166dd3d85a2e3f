//! Body of an `ERROR` frame: a code, a message and code specific fields.

use crate::frame::frame_errors::{CqlErrorParseError, LowLevelDeserializationError};
use crate::frame::types;
use crate::Consistency;
use bytes::Bytes;
use thiserror::Error;

/// A decoded ERROR frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub error: DbError,
    /// Human readable message sent by the server.
    pub reason: String,
}

/// Reads the trailing fields of one error kind, tagging failures with the
/// kind and field name.
struct Fields<'a, 'b> {
    kind: &'static str,
    buf: &'a mut &'b [u8],
}

impl<'a, 'b> Fields<'a, 'b> {
    fn of(kind: &'static str, buf: &'a mut &'b [u8]) -> Self {
        Self { kind, buf }
    }

    fn tag<T>(
        &self,
        field: &'static str,
        res: Result<T, LowLevelDeserializationError>,
    ) -> Result<T, CqlErrorParseError> {
        res.map_err(|err| CqlErrorParseError::MalformedErrorField {
            db_error: self.kind,
            field,
            err,
        })
    }

    fn int(&mut self, field: &'static str) -> Result<i32, CqlErrorParseError> {
        let res = types::read_int(self.buf);
        self.tag(field, res)
    }

    fn flag(&mut self, field: &'static str) -> Result<bool, CqlErrorParseError> {
        let res = types::read_byte(self.buf);
        self.tag(field, res).map(|byte| byte != 0)
    }

    fn consistency(&mut self) -> Result<Consistency, CqlErrorParseError> {
        let res = types::read_consistency(self.buf);
        self.tag("CONSISTENCY", res)
    }

    fn string(&mut self, field: &'static str) -> Result<String, CqlErrorParseError> {
        let res = types::read_string(self.buf).map(str::to_owned);
        self.tag(field, res)
    }

    fn short_bytes(&mut self, field: &'static str) -> Result<Bytes, CqlErrorParseError> {
        let res = types::read_short_bytes(self.buf).map(Bytes::copy_from_slice);
        self.tag(field, res)
    }
}

impl Error {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CqlErrorParseError> {
        let code = types::read_int(buf).map_err(CqlErrorParseError::ErrorCodeParseError)?;
        let reason = types::read_string(buf)
            .map_err(CqlErrorParseError::ReasonParseError)?
            .to_owned();

        let error = match code {
            0x0000 => DbError::ServerError,
            0x000A => DbError::ProtocolError,
            0x0100 => DbError::BadCredentials,
            0x1000 => {
                let mut f = Fields::of("UNAVAILABLE", buf);
                DbError::Unavailable {
                    consistency: f.consistency()?,
                    required: f.int("REQUIRED")?,
                    alive: f.int("ALIVE")?,
                }
            }
            0x1001 => DbError::Overloaded,
            0x1002 => DbError::IsBootstrapping,
            0x1003 => DbError::TruncateError,
            0x1100 => {
                let mut f = Fields::of("WRITE_TIMEOUT", buf);
                DbError::WriteTimeout {
                    consistency: f.consistency()?,
                    received: f.int("RECEIVED")?,
                    required: f.int("BLOCKFOR")?,
                    write_type: WriteType::from(f.string("WRITE_TYPE")?.as_str()),
                }
            }
            0x1200 => {
                let mut f = Fields::of("READ_TIMEOUT", buf);
                DbError::ReadTimeout {
                    consistency: f.consistency()?,
                    received: f.int("RECEIVED")?,
                    required: f.int("BLOCKFOR")?,
                    data_present: f.flag("DATA_PRESENT")?,
                }
            }
            0x2000 => DbError::SyntaxError,
            0x2100 => DbError::Unauthorized,
            0x2200 => DbError::Invalid,
            0x2300 => DbError::ConfigError,
            0x2400 => {
                let mut f = Fields::of("ALREADY_EXISTS", buf);
                DbError::AlreadyExists {
                    keyspace: f.string("KEYSPACE")?,
                    table: f.string("TABLE")?,
                }
            }
            0x2500 => DbError::Unprepared {
                statement_id: Fields::of("UNPREPARED", buf).short_bytes("STATEMENT_ID")?,
            },
            other => DbError::Other(other),
        };

        Ok(Error { error, reason })
    }
}

/// Error kinds a node can answer a request with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DbError {
    #[error("Statement could not be parsed")]
    SyntaxError,

    #[error("Statement is well formed but was rejected as invalid")]
    Invalid,

    /// `table` is empty when a keyspace was being created.
    #[error("Keyspace or table already exists (keyspace: {keyspace}, table: {table})")]
    AlreadyExists { keyspace: String, table: String },

    #[error("Server rejected the credentials")]
    BadCredentials,

    #[error("Authenticated user is not allowed to run this statement")]
    Unauthorized,

    #[error("Statement rejected because of a configuration problem")]
    ConfigError,

    /// Too few replicas were alive to even try the request.
    #[error(
        "Too few live replicas for consistency {consistency}: \
        {alive} alive, {required} required"
    )]
    Unavailable {
        consistency: Consistency,
        required: i32,
        alive: i32,
    },

    #[error("Coordinator is overloaded")]
    Overloaded,

    #[error("Coordinator is still bootstrapping")]
    IsBootstrapping,

    #[error("Truncate failed")]
    TruncateError,

    /// Replicas did not answer a read in time. `data_present` tells whether
    /// the replica asked for data was among those that did.
    #[error(
        "Read timed out at consistency {consistency}: {received} of {required} \
        responses (data present: {data_present})"
    )]
    ReadTimeout {
        consistency: Consistency,
        received: i32,
        required: i32,
        data_present: bool,
    },

    #[error(
        "{write_type} write timed out at consistency {consistency}: \
        {received} of {required} acknowledgements"
    )]
    WriteTimeout {
        consistency: Consistency,
        received: i32,
        required: i32,
        write_type: WriteType,
    },

    /// The node does not know this prepared statement id and it has to be
    /// prepared again.
    #[error("Prepared statement is unknown to the node")]
    Unprepared { statement_id: Bytes },

    #[error("Server side failure")]
    ServerError,

    #[error("Server could not understand the request frame")]
    ProtocolError,

    /// A code this driver does not know about.
    #[error("Unknown server error code {0:#06x}")]
    Other(i32),
}

impl DbError {
    /// Wire code of this error.
    pub fn code(&self) -> i32 {
        match self {
            DbError::ServerError => 0x0000,
            DbError::ProtocolError => 0x000A,
            DbError::BadCredentials => 0x0100,
            DbError::Unavailable { .. } => 0x1000,
            DbError::Overloaded => 0x1001,
            DbError::IsBootstrapping => 0x1002,
            DbError::TruncateError => 0x1003,
            DbError::WriteTimeout { .. } => 0x1100,
            DbError::ReadTimeout { .. } => 0x1200,
            DbError::SyntaxError => 0x2000,
            DbError::Unauthorized => 0x2100,
            DbError::Invalid => 0x2200,
            DbError::ConfigError => 0x2300,
            DbError::AlreadyExists { .. } => 0x2400,
            DbError::Unprepared { .. } => 0x2500,
            DbError::Other(code) => *code,
        }
    }
}

/// Kind of write that timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteType {
    Simple,
    /// Logged batch; the batch log itself was written.
    Batch,
    UnloggedBatch,
    Counter,
    /// Timed out while writing the batch log.
    BatchLog,
    Other(String),
}

impl WriteType {
    pub fn as_str(&self) -> &str {
        match self {
            WriteType::Simple => "SIMPLE",
            WriteType::Batch => "BATCH",
            WriteType::UnloggedBatch => "UNLOGGED_BATCH",
            WriteType::Counter => "COUNTER",
            WriteType::BatchLog => "BATCH_LOG",
            WriteType::Other(name) => name,
        }
    }
}

impl From<&str> for WriteType {
    fn from(name: &str) -> WriteType {
        match name {
            "SIMPLE" => WriteType::Simple,
            "BATCH" => WriteType::Batch,
            "UNLOGGED_BATCH" => WriteType::UnloggedBatch,
            "COUNTER" => WriteType::Counter,
            "BATCH_LOG" => WriteType::BatchLog,
            other => WriteType::Other(other.to_owned()),
        }
    }
}

impl std::fmt::Display for WriteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
