//! CQL protocol-level representation of a `EXECUTE` request.

use bytes::Bytes;

use crate::frame::frame_errors::CqlRequestSerializationError;
use crate::{
    frame::request::{RequestOpcode, SerializableRequest},
    frame::types,
    Consistency,
};

use super::{DeserializableRequest, RequestDeserializationError};

/// CQL protocol-level representation of an `EXECUTE` request,
/// used to execute a single prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execute {
    /// ID of the prepared statement to execute.
    pub id: Bytes,
    /// Already serialized bound values, `None` binds null.
    pub values: Vec<Option<Bytes>>,
    pub consistency: Consistency,
}

impl SerializableRequest for Execute {
    const OPCODE: RequestOpcode = RequestOpcode::Execute;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), CqlRequestSerializationError> {
        types::write_short_bytes(&self.id[..], buf)
            .map_err(CqlRequestSerializationError::StatementIdSerialization)?;

        let values_len = u16::try_from(self.values.len())
            .map_err(CqlRequestSerializationError::ValuesSerialization)?;
        types::write_short(values_len, buf);
        for value in &self.values {
            types::write_bytes_opt(value.as_ref(), buf)
                .map_err(CqlRequestSerializationError::ValuesSerialization)?;
        }

        types::write_consistency(self.consistency, buf);
        Ok(())
    }
}

impl DeserializableRequest for Execute {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, RequestDeserializationError> {
        let id = Bytes::copy_from_slice(types::read_short_bytes(buf)?);
        let values_len = types::read_short(buf)?;
        let values = (0..values_len)
            .map(|_| types::read_bytes_opt(buf).map(|v| v.map(Bytes::copy_from_slice)))
            .collect::<Result<Vec<_>, _>>()?;
        let consistency = types::read_consistency(buf)?;
        Ok(Self {
            id,
            values,
            consistency,
        })
    }
}
