//! Errors produced while encoding requests and decoding response frames.

use std::num::TryFromIntError;
use std::sync::Arc;

use thiserror::Error;

use super::{TryFromPrimitiveError, HEADER_SIZE, PROTOCOL_VERSION};

/// An error that occurred while reading a response frame from a stream.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    HeaderParse(#[from] FrameHeaderParseError),
    #[error("Frame is compressed, but no compression negotiated for connection.")]
    NoCompressionNegotiated,
    #[error("Connection was closed before body was read: missing {0} out of {1}")]
    ConnectionClosed(usize, usize),
    #[error("Frame decompression failed.")]
    FrameDecompression,
    #[error("Error decompressing lz4 data {0}")]
    Lz4DecompressError(#[from] lz4_flex::block::DecompressError),
    #[error("Malformed tracing id in frame body: {0}")]
    TracingIdParse(LowLevelDeserializationError),
    #[error(transparent)]
    StdIoError(#[from] std::io::Error),
}

/// An error that occurred while decoding the fixed-size frame header.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameHeaderParseError {
    #[error("Frame header must be exactly {HEADER_SIZE} bytes long, got {0}")]
    InvalidLength(usize),
    #[error("Received frame marked as coming from a client")]
    FrameFromClient,
    #[error("Received a frame from version {0}, but only {PROTOCOL_VERSION} is supported")]
    VersionNotSupported(u8),
}

/// A low-level error of reading a protocol primitive out of a buffer.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum LowLevelDeserializationError {
    #[error(transparent)]
    IoError(Arc<std::io::Error>),
    #[error(transparent)]
    TryFromIntError(#[from] TryFromIntError),
    #[error(transparent)]
    TryFromSliceError(#[from] std::array::TryFromSliceError),
    #[error("Not enough bytes! expected: {expected}, received: {received}")]
    TooFewBytesReceived { expected: usize, received: usize },
    #[error("Invalid value length: {0}")]
    InvalidValueLength(i32),
    #[error("Unknown consistency: {0}")]
    UnknownConsistency(#[from] TryFromPrimitiveError<u16>),
    #[error("Invalid inet bytes length: {0}. Accepted lengths are 4 and 16 bytes.")]
    InvalidInetLength(u8),
    #[error("UTF8 deserialization failed: {0}")]
    UTF8DeserializationError(#[from] std::str::Utf8Error),
}

impl From<std::io::Error> for LowLevelDeserializationError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(Arc::new(value))
    }
}

/// An error that occurred while serializing a request body.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CqlRequestSerializationError {
    #[error("Malformed STARTUP options: {0}")]
    StartupSerialization(TryFromIntError),
    #[error("Malformed CREDENTIALS map: {0}")]
    CredentialsSerialization(TryFromIntError),
    #[error("Failed to serialize statement contents: {0}")]
    StatementStringSerialization(TryFromIntError),
    #[error("Failed to serialize prepared statement id: {0}")]
    StatementIdSerialization(TryFromIntError),
    #[error("Failed to serialize bound values: {0}")]
    ValuesSerialization(TryFromIntError),
    #[error("Failed to serialize event types to register for: {0}")]
    EventTypesSerialization(TryFromIntError),
    #[error("Request body of {0} bytes does not fit in a frame")]
    BodyTooLarge(usize),
    #[error("Snappy compression of the request body failed")]
    SnapCompressError,
}

/// An error of decoding an ERROR response body.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CqlErrorParseError {
    #[error("Malformed error code: {0}")]
    ErrorCodeParseError(LowLevelDeserializationError),
    #[error("Malformed error reason: {0}")]
    ReasonParseError(LowLevelDeserializationError),
    #[error("Malformed error field {field} of DB error {db_error}: {err}")]
    MalformedErrorField {
        db_error: &'static str,
        field: &'static str,
        err: LowLevelDeserializationError,
    },
}

/// An error of decoding an AUTHENTICATE response body.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CqlAuthenticateParseError {
    #[error("Malformed authenticator name: {0}")]
    AuthNameParseError(LowLevelDeserializationError),
}

/// An error of decoding a SUPPORTED response body.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CqlSupportedParseError {
    #[error("Malformed options map: {0}")]
    OptionsMapDeserialization(LowLevelDeserializationError),
}

/// An error of decoding an EVENT response body.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CqlEventParseError {
    #[error("Malformed event type string: {0}")]
    EventTypeParseError(LowLevelDeserializationError),
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
    #[error("Malformed change type string: {0}")]
    ChangeTypeParseError(LowLevelDeserializationError),
    #[error("Unknown change type: {0}")]
    UnknownChangeType(String),
    #[error("Malformed schema change target: {0}")]
    SchemaChangeTargetParseError(LowLevelDeserializationError),
    #[error("Malformed node address: {0}")]
    NodeAddressParseError(LowLevelDeserializationError),
}

/// An error of decoding a CQL column type option.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CqlTypeParseError {
    #[error("Malformed type id: {0}")]
    TypeIdParseError(LowLevelDeserializationError),
    #[error("Malformed custom type name: {0}")]
    CustomTypeNameParseError(LowLevelDeserializationError),
    #[error("Type not yet implemented, id: {0:#06x}")]
    TypeNotImplemented(u16),
}

/// An error of decoding result set metadata.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ResultMetadataParseError {
    #[error("Malformed metadata flags: {0}")]
    FlagsParseError(LowLevelDeserializationError),
    #[error("Malformed column count: {0}")]
    ColumnCountParseError(LowLevelDeserializationError),
    #[error("Malformed global table spec: {0}")]
    GlobalTableSpecParseError(LowLevelDeserializationError),
    #[error("Malformed table spec of column {column_index}: {err}")]
    TableSpecParseError {
        column_index: usize,
        err: LowLevelDeserializationError,
    },
    #[error("Malformed name of column {column_index}: {err}")]
    ColumnNameParseError {
        column_index: usize,
        err: LowLevelDeserializationError,
    },
    #[error("Malformed type of column {column_index}: {err}")]
    ColumnTypeParseError {
        column_index: usize,
        err: CqlTypeParseError,
    },
}

/// An error reported while building rows out of a RESULT::Rows body.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum RowsParseError {
    #[error("Malformed rows count: {0}")]
    RowsCountParseError(LowLevelDeserializationError),
    #[error("Malformed cell in row {row_index}, column {column_index}: {err}")]
    CellParseError {
        row_index: usize,
        column_index: usize,
        err: LowLevelDeserializationError,
    },
    #[error("Result builder failed: {0}")]
    Custom(Arc<dyn std::error::Error + Send + Sync>),
}

/// An error of decoding a RESULT response body.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CqlResultParseError {
    #[error("Malformed RESULT response id: {0}")]
    ResultIdParseError(LowLevelDeserializationError),
    #[error("Unknown RESULT response id: {0}")]
    UnknownResultId(i32),
    #[error("RESULT:Set_keyspace response deserialization failed: {0}")]
    SetKeyspaceParseError(LowLevelDeserializationError),
    #[error("RESULT:Schema_change response deserialization failed: {0}")]
    SchemaChangeParseError(LowLevelDeserializationError),
    #[error("RESULT:Prepared response deserialization failed: {0}")]
    PreparedParseError(LowLevelDeserializationError),
    #[error("Malformed result metadata: {0}")]
    ResultMetadataParseError(#[from] ResultMetadataParseError),
    #[error("RESULT:Rows response deserialization failed: {0}")]
    RowsParseError(#[from] RowsParseError),
}

/// An error of decoding any response body.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CqlResponseParseError {
    #[error("Failed to deserialize ERROR response: {0}")]
    CqlErrorParseError(#[from] CqlErrorParseError),
    #[error("Failed to deserialize AUTHENTICATE response: {0}")]
    CqlAuthenticateParseError(#[from] CqlAuthenticateParseError),
    #[error("Failed to deserialize SUPPORTED response: {0}")]
    CqlSupportedParseError(#[from] CqlSupportedParseError),
    #[error("Failed to deserialize EVENT response: {0}")]
    CqlEventParseError(#[from] CqlEventParseError),
    #[error(transparent)]
    CqlResultParseError(#[from] CqlResultParseError),
    #[error("Unrecognized response opcode: {0}")]
    UnknownOpcode(#[from] TryFromPrimitiveError<u8>),
}
