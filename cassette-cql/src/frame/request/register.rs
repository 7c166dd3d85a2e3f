use crate::frame::{
    frame_errors::CqlRequestSerializationError,
    request::{RequestOpcode, SerializableRequest},
    response::event::EventType,
    types,
};

use super::{DeserializableRequest, RequestDeserializationError};

/// The CQL protocol-level representation of a `REGISTER` request.
pub struct Register {
    pub event_types_to_register_for: Vec<EventType>,
}

impl SerializableRequest for Register {
    const OPCODE: RequestOpcode = RequestOpcode::Register;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), CqlRequestSerializationError> {
        let event_types_list = self
            .event_types_to_register_for
            .iter()
            .map(|event| event.to_string())
            .collect::<Vec<_>>();

        types::write_string_list(&event_types_list, buf)
            .map_err(CqlRequestSerializationError::EventTypesSerialization)
    }
}

impl DeserializableRequest for Register {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, RequestDeserializationError> {
        // Unknown names are dropped, a mock server only cares about known ones.
        let event_types_to_register_for = types::read_string_list(buf)?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        Ok(Self {
            event_types_to_register_for,
        })
    }
}
