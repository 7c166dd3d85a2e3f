//! Defines the CQL binary protocol (v1 framing) used by the `cassette` driver.
//!
//! The crate is pure: it encodes requests, decodes frame headers, bodies,
//! results and typed server errors. Connection policy, pooling and retries
//! live in the `cassette` crate.

pub mod frame;

pub use crate::frame::types::Consistency;
