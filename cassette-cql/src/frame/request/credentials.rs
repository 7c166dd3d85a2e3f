//! CQL protocol-level representation of a `CREDENTIALS` request.

use std::collections::HashMap;

use crate::frame::frame_errors::CqlRequestSerializationError;
use crate::frame::request::{RequestOpcode, SerializableRequest};
use crate::frame::types;

use super::{DeserializableRequest, RequestDeserializationError};

pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";

/// Answer to an AUTHENTICATE response: a map of authenticator specific
/// credentials, `username` and `password` for the password authenticator.
pub struct Credentials {
    pub credentials: HashMap<String, String>,
}

impl Credentials {
    pub fn plain(username: &str, password: &str) -> Self {
        let mut credentials = HashMap::with_capacity(2);
        credentials.insert(USERNAME.to_owned(), username.to_owned());
        credentials.insert(PASSWORD.to_owned(), password.to_owned());
        Self { credentials }
    }
}

impl SerializableRequest for Credentials {
    const OPCODE: RequestOpcode = RequestOpcode::Credentials;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), CqlRequestSerializationError> {
        types::write_string_map(&self.credentials, buf)
            .map_err(CqlRequestSerializationError::CredentialsSerialization)
    }
}

impl DeserializableRequest for Credentials {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, RequestDeserializationError> {
        Ok(Self {
            credentials: types::read_string_map(buf)?,
        })
    }
}
