//! CQL protocol-level representation of a `PREPARE` request.

use crate::frame::frame_errors::CqlRequestSerializationError;

use crate::{
    frame::request::{RequestOpcode, SerializableRequest},
    frame::types,
};

use super::{DeserializableRequest, RequestDeserializationError};

/// CQL protocol-level representation of an `PREPARE` request,
/// used to prepare a single statement for further execution.
pub struct Prepare<'a> {
    /// CQL statement string to prepare.
    pub query: std::borrow::Cow<'a, str>,
}

impl SerializableRequest for Prepare<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Prepare;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), CqlRequestSerializationError> {
        types::write_long_string(&self.query, buf)
            .map_err(CqlRequestSerializationError::StatementStringSerialization)?;
        Ok(())
    }
}

impl DeserializableRequest for Prepare<'_> {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, RequestDeserializationError> {
        Ok(Self {
            query: types::read_long_string(buf)?.to_owned().into(),
        })
    }
}
