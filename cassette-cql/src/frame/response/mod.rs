//! CQL responses sent by the server.

pub mod authenticate;
pub mod error;
pub mod event;
pub mod result;
pub mod supported;

pub use error::Error;
pub use supported::Supported;

use crate::frame::frame_errors::CqlResponseParseError;
use crate::frame::TryFromPrimitiveError;
use result::{RowsBuilder, Rows};

/// Possible CQL responses received from the server
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ResponseOpcode {
    /// Indicates an error processing a request.
    Error = 0x00,
    /// Indicates that the server is ready to process queries.
    Ready = 0x02,
    /// Indicates that the server requires authentication.
    Authenticate = 0x03,
    /// Indicates which startup options are supported by the server.
    Supported = 0x06,
    /// The result of a QUERY, PREPARE or EXECUTE.
    Result = 0x08,
    /// An event pushed by the server.
    Event = 0x0C,
}

impl TryFrom<u8> for ResponseOpcode {
    type Error = TryFromPrimitiveError<u8>;

    fn try_from(value: u8) -> Result<Self, TryFromPrimitiveError<u8>> {
        match value {
            0x00 => Ok(Self::Error),
            0x02 => Ok(Self::Ready),
            0x03 => Ok(Self::Authenticate),
            0x06 => Ok(Self::Supported),
            0x08 => Ok(Self::Result),
            0x0C => Ok(Self::Event),
            _ => Err(TryFromPrimitiveError {
                enum_name: "ResponseOpcode",
                primitive: value,
            }),
        }
    }
}

impl std::fmt::Display for ResponseOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ResponseOpcode::Error => "ERROR",
            ResponseOpcode::Ready => "READY",
            ResponseOpcode::Authenticate => "AUTHENTICATE",
            ResponseOpcode::Supported => "SUPPORTED",
            ResponseOpcode::Result => "RESULT",
            ResponseOpcode::Event => "EVENT",
        })
    }
}

/// A CQL response that has been received from the server.
#[derive(Debug)]
pub enum Response<T = Rows> {
    Error(Error),
    Ready,
    Result(result::Result<T>),
    Authenticate(authenticate::Authenticate),
    Supported(Supported),
    Event(event::Event),
}

impl<T> Response<T> {
    pub fn to_response_kind(&self) -> CqlResponseKind {
        match self {
            Response::Error(_) => CqlResponseKind::Error,
            Response::Ready => CqlResponseKind::Ready,
            Response::Result(_) => CqlResponseKind::Result,
            Response::Authenticate(_) => CqlResponseKind::Authenticate,
            Response::Supported(_) => CqlResponseKind::Supported,
            Response::Event(_) => CqlResponseKind::Event,
        }
    }

    /// Decodes a response body. Rows, if any, are handed to `builder`.
    pub fn deserialize<B>(
        opcode: ResponseOpcode,
        buf: &mut &[u8],
        builder: &mut B,
    ) -> Result<Response<T>, CqlResponseParseError>
    where
        B: RowsBuilder<Output = T>,
    {
        let response = match opcode {
            ResponseOpcode::Error => Response::Error(Error::deserialize(buf)?),
            ResponseOpcode::Ready => Response::Ready,
            ResponseOpcode::Authenticate => {
                Response::Authenticate(authenticate::Authenticate::deserialize(buf)?)
            }
            ResponseOpcode::Supported => Response::Supported(Supported::deserialize(buf)?),
            ResponseOpcode::Result => Response::Result(result::deserialize(buf, builder)?),
            ResponseOpcode::Event => Response::Event(event::Event::deserialize(buf)?),
        };

        Ok(response)
    }

    /// Splits off the ERROR case.
    pub fn into_non_error_response(self) -> Result<NonErrorResponse<T>, Error> {
        let non_error_response = match self {
            Response::Error(e) => return Err(e),
            Response::Ready => NonErrorResponse::Ready,
            Response::Result(res) => NonErrorResponse::Result(res),
            Response::Authenticate(auth) => NonErrorResponse::Authenticate(auth),
            Response::Supported(sup) => NonErrorResponse::Supported(sup),
            Response::Event(eve) => NonErrorResponse::Event(eve),
        };

        Ok(non_error_response)
    }
}

/// A CQL response that has been received from the server, excluding error responses.
#[derive(Debug)]
pub enum NonErrorResponse<T = Rows> {
    Ready,
    Result(result::Result<T>),
    Authenticate(authenticate::Authenticate),
    Supported(Supported),
    Event(event::Event),
}

impl<T> NonErrorResponse<T> {
    pub fn to_response_kind(&self) -> CqlResponseKind {
        match self {
            NonErrorResponse::Ready => CqlResponseKind::Ready,
            NonErrorResponse::Result(_) => CqlResponseKind::Result,
            NonErrorResponse::Authenticate(_) => CqlResponseKind::Authenticate,
            NonErrorResponse::Supported(_) => CqlResponseKind::Supported,
            NonErrorResponse::Event(_) => CqlResponseKind::Event,
        }
    }
}

/// Kind of a response, without its payload. Used in error messages.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CqlResponseKind {
    Error,
    Ready,
    Authenticate,
    Supported,
    Result,
    Event,
}

impl std::fmt::Display for CqlResponseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind_str = match self {
            CqlResponseKind::Error => "ERROR",
            CqlResponseKind::Ready => "READY",
            CqlResponseKind::Authenticate => "AUTHENTICATE",
            CqlResponseKind::Supported => "SUPPORTED",
            CqlResponseKind::Result => "RESULT",
            CqlResponseKind::Event => "EVENT",
        };

        f.write_str(kind_str)
    }
}
