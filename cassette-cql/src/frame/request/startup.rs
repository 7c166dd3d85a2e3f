//! CQL protocol-level representation of a `STARTUP` request.

use std::{borrow::Cow, collections::HashMap};

use crate::frame::frame_errors::CqlRequestSerializationError;
use crate::{
    frame::request::{RequestOpcode, SerializableRequest},
    frame::types,
};

use super::{DeserializableRequest, RequestDeserializationError};

/// The CQL protocol-level representation of an `STARTUP` request,
/// used to establish the CQL connection.
pub struct Startup<'a> {
    /// The protocol options accepted by the client, e.g. CQL version and compression.
    pub options: HashMap<Cow<'a, str>, Cow<'a, str>>,
}

impl SerializableRequest for Startup<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Startup;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), CqlRequestSerializationError> {
        types::write_string_map(&self.options, buf)
            .map_err(CqlRequestSerializationError::StartupSerialization)?;
        Ok(())
    }
}

impl DeserializableRequest for Startup<'_> {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, RequestDeserializationError> {
        let options = types::read_string_map(buf)?
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Ok(Self { options })
    }
}
