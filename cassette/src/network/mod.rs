pub(crate) mod connection;
pub use connection::{Connection, ConnectionFactory, CqlConnection, CqlConnectionFactory};

pub(crate) mod connection_pool;
pub use connection_pool::{ConnectionPool, PoolStats, PooledConnection};
