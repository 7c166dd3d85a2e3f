//! Async, pooled and fault-tolerant driver for CQL column stores.
//!
//! # Driver overview
//! ### Connecting
//! All driver activity revolves around a [`Cluster`]: a named set of
//! endpoints with a bounded [connection pool](network::ConnectionPool) in
//! front of them.
//!
//! ```rust,no_run
//! use cassette::client::config::{ClusterConfig, ConnectionConfig};
//! use cassette::Cluster;
//! use cassette_cql::Consistency;
//! use std::error::Error;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn Error>> {
//!     let config = ClusterConfig::new("analytics")
//!         .with_endpoint("127.0.0.1:9042")
//!         .with_endpoint("10.0.0.2");
//!     let cluster = Cluster::connect(config, ConnectionConfig::default()).await?;
//!
//!     cluster
//!         .query(Some("ks"), "INSERT INTO tab (a) VALUES (1)", Consistency::Quorum)
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Units of work
//! [`Cluster::execute`] runs a closure on a borrowed connection. The closure
//! tells the cluster whether a failure is worth retrying and whether the
//! connection survived it, through an [`ExecutionFailure`]:
//!
//! ```rust,no_run
//! # use cassette::{Cluster, CqlConnectionFactory, ExecutionFailure};
//! # use cassette_cql::Consistency;
//! # async fn check_only_compiles(cluster: &Cluster<CqlConnectionFactory>) -> Result<(), Box<dyn std::error::Error>> {
//! let result = cluster
//!     .execute(Some("ks"), |connection| async move {
//!         connection
//!             .query("SELECT a FROM tab", Consistency::One)
//!             .await
//!             .map_err(ExecutionFailure::from)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Failures
//! Endpoints that refuse connections are banned and probed in the
//! background until they answer again. When no connection can be borrowed,
//! or a unit of work fails on its last attempt, the cluster rebuilds its
//! endpoint manager and pool from the configuration.

pub mod client;
pub mod cluster;
pub mod errors;
pub mod network;
pub mod observability;
#[doc(hidden)]
pub mod utils;

pub use cassette_cql::frame::response::event::Event;
pub use cassette_cql::Consistency;

pub use client::{Cluster, ClusterRegistry, ExecutionFailure, RebuildListener, RebuildReason};
pub use cluster::Endpoint;
pub use network::{Connection, ConnectionFactory, CqlConnection, CqlConnectionFactory};
