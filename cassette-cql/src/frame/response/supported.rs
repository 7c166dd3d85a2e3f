//! CQL protocol-level representation of a `SUPPORTED` response.

use crate::frame::frame_errors::CqlSupportedParseError;
use crate::frame::types;
use std::collections::HashMap;

/// The server's supported STARTUP options, e.g. `COMPRESSION` and `CQL_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supported {
    pub options: HashMap<String, Vec<String>>,
}

impl Supported {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CqlSupportedParseError> {
        let options = types::read_string_multimap(buf)
            .map_err(CqlSupportedParseError::OptionsMapDeserialization)?;

        Ok(Supported { options })
    }

    pub fn supports(&self, option: &str, value: &str) -> bool {
        self.options
            .get(option)
            .is_some_and(|values| values.iter().any(|v| v == value))
    }
}
