//! Nodes of a cluster and the logic for ruling out failed ones.

pub(crate) mod endpoint;
pub use endpoint::Endpoint;

pub(crate) mod endpoint_manager;
pub use endpoint_manager::EndpointManager;
