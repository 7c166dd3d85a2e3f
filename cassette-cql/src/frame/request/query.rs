//! CQL protocol-level representation of a `QUERY` request.

use std::borrow::Cow;

use crate::frame::frame_errors::CqlRequestSerializationError;
use crate::{
    frame::request::{RequestOpcode, SerializableRequest},
    frame::types,
    Consistency,
};

use super::{DeserializableRequest, RequestDeserializationError};

/// An unprepared statement: the statement string followed by the
/// consistency it should be executed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query<'q> {
    pub contents: Cow<'q, str>,
    pub consistency: Consistency,
}

impl SerializableRequest for Query<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Query;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), CqlRequestSerializationError> {
        types::write_long_string(&self.contents, buf)
            .map_err(CqlRequestSerializationError::StatementStringSerialization)?;
        types::write_consistency(self.consistency, buf);
        Ok(())
    }
}

impl DeserializableRequest for Query<'_> {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, RequestDeserializationError> {
        let contents = Cow::Owned(types::read_long_string(buf)?.to_owned());
        let consistency = types::read_consistency(buf)?;
        Ok(Self {
            contents,
            consistency,
        })
    }
}
