pub mod compression;
pub mod frame_errors;
pub mod request;
pub mod response;
pub mod types;
pub mod window;

use crate::frame::frame_errors::{
    CqlRequestSerializationError, FrameError, FrameHeaderParseError,
};
use bytes::{Buf, Bytes};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use std::convert::TryFrom;

pub use compression::Compression;
use request::SerializableRequest;
use response::ResponseOpcode;
pub use window::{read_body, BodyWindow, FrameBody};

/// Size of the fixed frame header preceding every body.
pub const HEADER_SIZE: usize = 8;

/// The only protocol version spoken by this codec.
pub const PROTOCOL_VERSION: u8 = 0x01;

const DIRECTION_RESPONSE: u8 = 0x80;
const VERSION_MASK: u8 = 0x7F;

// Frame flags
pub const FLAG_COMPRESSION: u8 = 0x01;
pub const FLAG_TRACING: u8 = 0x02;

/// Which side of the connection sent a frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// The decoded 8-byte header of a frame.
///
/// The opcode is kept raw: the header itself does not know whether it belongs
/// to a request or to a response. Use [`FrameHeader::response_opcode`] to
/// interpret it on the receiving side.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub direction: Direction,
    pub version: u8,
    pub flags: u8,
    pub stream: i8,
    pub opcode: u8,
    pub length: u32,
}

impl FrameHeader {
    /// Encodes the header as it appears on the wire.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        let direction = match self.direction {
            Direction::Request => 0,
            Direction::Response => DIRECTION_RESPONSE,
        };
        raw[0] = direction | (self.version & VERSION_MASK);
        raw[1] = self.flags;
        raw[2] = self.stream as u8;
        raw[3] = self.opcode;
        raw[4..8].copy_from_slice(&self.length.to_be_bytes());
        raw
    }

    /// Decodes the header of a frame received from the server.
    ///
    /// Fails if `raw` is not exactly [`HEADER_SIZE`] bytes long, if the frame
    /// is not marked as a response, or if it was sent with an unsupported
    /// protocol version.
    pub fn decode(raw: &[u8]) -> Result<FrameHeader, FrameHeaderParseError> {
        if raw.len() != HEADER_SIZE {
            return Err(FrameHeaderParseError::InvalidLength(raw.len()));
        }
        let mut buf = raw;

        let version = buf.get_u8();
        if version & DIRECTION_RESPONSE != DIRECTION_RESPONSE {
            return Err(FrameHeaderParseError::FrameFromClient);
        }
        if version & VERSION_MASK != PROTOCOL_VERSION {
            return Err(FrameHeaderParseError::VersionNotSupported(
                version & VERSION_MASK,
            ));
        }

        let flags = buf.get_u8();
        let stream = buf.get_i8();
        let opcode = buf.get_u8();
        let length = buf.get_u32();

        Ok(FrameHeader {
            direction: Direction::Response,
            version: version & VERSION_MASK,
            flags,
            stream,
            opcode,
            length,
        })
    }

    pub fn response_opcode(&self) -> Result<ResponseOpcode, TryFromPrimitiveError<u8>> {
        ResponseOpcode::try_from(self.opcode)
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSION != 0
    }

    pub fn is_traced(&self) -> bool {
        self.flags & FLAG_TRACING != 0
    }

    /// Event frames are pushed by the server on negative stream ids.
    pub fn is_event(&self) -> bool {
        self.stream < 0
    }
}

/// A request frame ready to be written, header included.
pub struct SerializedRequest {
    data: Vec<u8>,
}

impl SerializedRequest {
    pub fn make<R: SerializableRequest>(
        req: &R,
        compression: Option<Compression>,
        tracing: bool,
    ) -> Result<SerializedRequest, CqlRequestSerializationError> {
        let mut flags = 0;
        let mut data = vec![0; HEADER_SIZE];

        if let Some(compression) = compression {
            flags |= FLAG_COMPRESSION;
            let body = req.to_bytes()?;
            compression::compress_append(&body, compression, &mut data)?;
        } else {
            req.serialize(&mut data)?;
        }

        if tracing {
            flags |= FLAG_TRACING;
        }

        let body_len = data.len() - HEADER_SIZE;
        let length = u32::try_from(body_len)
            .map_err(|_| CqlRequestSerializationError::BodyTooLarge(body_len))?;

        // Stream id is filled in by the connection right before sending.
        let header = FrameHeader {
            direction: Direction::Request,
            version: PROTOCOL_VERSION,
            flags,
            stream: 0,
            opcode: R::OPCODE as u8,
            length,
        };
        data[..HEADER_SIZE].copy_from_slice(&header.encode());

        Ok(Self { data })
    }

    pub fn set_stream(&mut self, stream: i8) {
        self.data[2] = stream as u8;
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data[..]
    }
}

/// Reads one complete response frame: the header and its buffered body.
pub async fn read_response_frame(
    reader: &mut (impl AsyncRead + Unpin),
) -> Result<(FrameHeader, Bytes), FrameError> {
    let mut raw_header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut raw_header[..]).await?;

    let header = FrameHeader::decode(&raw_header)?;

    match read_body(&header, reader, false).await? {
        FrameBody::Buffered(body) => Ok((header, body)),
        FrameBody::Streaming(window) => Ok((header, window.read_to_bytes().await?)),
    }
}

#[derive(Debug)]
pub struct ResponseBodyWithExtensions {
    pub trace_id: Option<Uuid>,
    pub body: Bytes,
}

/// Decompresses the body if needed and strips the tracing id, if present.
pub fn parse_response_body_extensions(
    flags: u8,
    compression: Option<Compression>,
    mut body: Bytes,
) -> Result<ResponseBodyWithExtensions, FrameError> {
    if flags & FLAG_COMPRESSION != 0 {
        if let Some(compression) = compression {
            body = compression::decompress(&body, compression)?.into();
        } else {
            return Err(FrameError::NoCompressionNegotiated);
        }
    }

    let trace_id = if flags & FLAG_TRACING != 0 {
        let buf = &mut &*body;
        let trace_id = types::read_uuid(buf).map_err(FrameError::TracingIdParse)?;
        body.advance(16);
        Some(trace_id)
    } else {
        None
    };

    Ok(ResponseBodyWithExtensions { trace_id, body })
}

/// An error type for parsing an enum value from a primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No discrimant in enum `{enum_name}` matches the value `{primitive:?}`")]
pub struct TryFromPrimitiveError<T: Copy + std::fmt::Debug> {
    enum_name: &'static str,
    primitive: T,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::frame_errors::FrameHeaderParseError;
    use crate::frame::request::Options;
    use assert_matches::assert_matches;

    fn response_header(stream: i8, opcode: u8, length: u32) -> FrameHeader {
        FrameHeader {
            direction: Direction::Response,
            version: PROTOCOL_VERSION,
            flags: FLAG_TRACING,
            stream,
            opcode,
            length,
        }
    }

    #[test]
    fn header_layout() {
        let header = response_header(5, ResponseOpcode::Result as u8, 0x0102_0304);
        assert_eq!(
            header.encode(),
            [0x81, FLAG_TRACING, 5, 0x08, 0x01, 0x02, 0x03, 0x04]
        );
    }

    #[test]
    fn header_round_trip() {
        for stream in [0, 1, 127, -1] {
            for length in [0, 1, u32::MAX] {
                let header = response_header(stream, ResponseOpcode::Event as u8, length);
                assert_eq!(FrameHeader::decode(&header.encode()).unwrap(), header);
            }
        }
    }

    #[test]
    fn header_rejects_wrong_length() {
        assert_matches!(
            FrameHeader::decode(&[0x81, 0, 0, 0, 0, 0, 0]),
            Err(FrameHeaderParseError::InvalidLength(7))
        );
        assert_matches!(
            FrameHeader::decode(&[0x81, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(FrameHeaderParseError::InvalidLength(9))
        );
    }

    #[test]
    fn header_rejects_requests_and_other_versions() {
        let mut request = response_header(0, 0x07, 0);
        request.direction = Direction::Request;
        assert_matches!(
            FrameHeader::decode(&request.encode()),
            Err(FrameHeaderParseError::FrameFromClient)
        );

        let mut v2 = response_header(0, 0x08, 0);
        v2.version = 2;
        assert_matches!(
            FrameHeader::decode(&v2.encode()),
            Err(FrameHeaderParseError::VersionNotSupported(2))
        );
    }

    #[test]
    fn unknown_opcode_is_reported_by_response_opcode() {
        let raw = [0x81, 0, 3, 0x42, 0, 0, 0, 0];
        let header = FrameHeader::decode(&raw).unwrap();
        assert_eq!(header.opcode, 0x42);
        assert!(header.response_opcode().is_err());

        let header = FrameHeader::decode(&[0x81, 0, 3, 0x08, 0, 0, 0, 0]).unwrap();
        assert_eq!(header.response_opcode().unwrap(), ResponseOpcode::Result);
    }

    #[test]
    fn serialized_request_header() {
        let mut req = SerializedRequest::make(&Options, None, false).unwrap();
        req.set_stream(42);
        assert_eq!(req.get_data(), &[0x01, 0x00, 42, 0x05, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn read_frame_with_tracing_id() {
        let trace_id = Uuid::new_v4();
        let mut body = Vec::new();
        body.extend_from_slice(trace_id.as_bytes());
        body.extend_from_slice(&1i32.to_be_bytes());

        let header = response_header(3, ResponseOpcode::Result as u8, body.len() as u32);
        let mut wire = header.encode().to_vec();
        wire.extend_from_slice(&body);
        // A second frame right behind must stay untouched.
        wire.extend_from_slice(&[0xAA; 4]);

        let mut reader = &wire[..];
        let (read_header, read_body) = read_response_frame(&mut reader).await.unwrap();
        assert_eq!(read_header, header);
        assert_eq!(reader, &[0xAA; 4]);

        let parsed = parse_response_body_extensions(read_header.flags, None, read_body).unwrap();
        assert_eq!(parsed.trace_id, Some(trace_id));
        assert_eq!(&parsed.body[..], &1i32.to_be_bytes());
    }

    #[tokio::test]
    async fn read_frame_truncated_body() {
        let header = response_header(0, ResponseOpcode::Ready as u8, 10);
        let mut wire = header.encode().to_vec();
        wire.extend_from_slice(&[0; 4]);

        let err = read_response_frame(&mut &wire[..]).await.unwrap_err();
        assert_matches!(err, FrameError::ConnectionClosed(6, 10));
    }

    #[test]
    fn compressed_body_without_negotiation() {
        let err =
            parse_response_body_extensions(FLAG_COMPRESSION, None, Bytes::from_static(b"x"))
                .unwrap_err();
        assert_matches!(err, FrameError::NoCompressionNegotiated);
    }
}
