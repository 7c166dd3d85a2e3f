//! The user facing part of the driver: clusters, their registry and
//! configuration.

pub(crate) mod cluster;
pub use cluster::{Cluster, ClusterState, ExecutionFailure, RebuildListener, RebuildReason};

pub mod config;

pub(crate) mod registry;
pub use registry::ClusterRegistry;
