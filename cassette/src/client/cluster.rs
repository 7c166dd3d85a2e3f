//! The entry point of the driver: runs units of work against pooled
//! connections with bounded retries.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};

use arc_swap::ArcSwap;
use bytes::Bytes;
use cassette_cql::frame::response::error::DbError;
use cassette_cql::frame::response::result::{self, Prepared, Rows};
use cassette_cql::Consistency;
use futures::future::RemoteHandle;
use futures::FutureExt;
use tracing::{debug, error, trace, warn};

use crate::client::config::{ClusterConfig, ConnectionConfig};
use crate::cluster::endpoint::Endpoint;
use crate::cluster::endpoint_manager::EndpointManager;
use crate::errors::{ConfigError, ExecutionError, RequestError};
use crate::network::connection::{ConnectionFactory, CqlConnectionFactory};
use crate::network::connection_pool::ConnectionPool;
use crate::observability::metrics::Metrics;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a failed unit of work should be handled.
///
/// Only the caller knows whether an error leaves the connection usable, so
/// the unit of work reports it along with the error.
#[derive(Debug, Clone)]
pub struct ExecutionFailure<E> {
    pub error: E,
    /// Try again on another borrowed connection.
    pub should_retry: bool,
    /// Return the connection to the pool instead of invalidating it.
    pub is_connection_healthy: bool,
}

impl<E> ExecutionFailure<E> {
    pub fn new(error: E, should_retry: bool, is_connection_healthy: bool) -> Self {
        Self {
            error,
            should_retry,
            is_connection_healthy,
        }
    }

    /// Retry; the connection is fine.
    pub fn retry(error: E) -> Self {
        Self::new(error, true, true)
    }

    /// Retry on a different connection; this one is invalidated.
    pub fn retry_on_new_connection(error: E) -> Self {
        Self::new(error, true, false)
    }

    /// Give up right away; the connection is fine.
    pub fn fatal(error: E) -> Self {
        Self::new(error, false, true)
    }
}

impl From<RequestError> for ExecutionFailure<RequestError> {
    fn from(error: RequestError) -> Self {
        let (should_retry, is_connection_healthy) = match &error {
            RequestError::DbError(db_error, _) => match db_error {
                DbError::Overloaded
                | DbError::IsBootstrapping
                | DbError::Unavailable { .. }
                | DbError::ReadTimeout { .. }
                | DbError::WriteTimeout { .. }
                | DbError::TruncateError
                | DbError::ServerError => (true, true),
                // The server could not make sense of our frames.
                DbError::ProtocolError => (false, false),
                _ => (false, true),
            },
            RequestError::Busy => (true, true),
            RequestError::BadKeyspaceName(_) | RequestError::Serialization(_) => (false, true),
            _ => (true, false),
        };
        Self::new(error, should_retry, is_connection_healthy)
    }
}

/// Why a rebuild of the cluster state was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RebuildReason {
    /// No connection could be borrowed from the pool.
    BorrowFailed,
    /// A unit of work failed on its last allowed attempt.
    RetriesExhausted,
    /// [`Cluster::rebuild`] was called.
    Requested,
}

/// Observes rebuilds of a cluster's endpoint manager and pool.
pub trait RebuildListener: Send + Sync + 'static {
    /// A rebuild was requested. Not called for requests made while a rebuild
    /// is already running.
    fn rebuild_started(&self, cluster: &str, reason: RebuildReason);

    /// The fresh state has been swapped in.
    fn rebuild_finished(&self, _cluster: &str) {}
}

/// Endpoint manager and pool of a cluster. Replaced as a whole on rebuild.
pub struct ClusterState<F: ConnectionFactory> {
    endpoint_manager: Arc<EndpointManager<F>>,
    pool: ConnectionPool<F>,
}

impl<F: ConnectionFactory> ClusterState<F> {
    async fn build(
        config: &ClusterConfig,
        endpoints: Vec<Arc<Endpoint>>,
        factory: Arc<F>,
    ) -> Self {
        let endpoint_manager = Arc::new(EndpointManager::new(
            config.name.clone(),
            endpoints,
            config.endpoint_manager.clone(),
            Arc::clone(&factory),
        ));
        let pool = ConnectionPool::new(
            config.name.clone(),
            config.pool.clone(),
            factory,
            Arc::clone(&endpoint_manager),
        )
        .await;
        Self {
            endpoint_manager,
            pool,
        }
    }

    pub fn endpoint_manager(&self) -> &Arc<EndpointManager<F>> {
        &self.endpoint_manager
    }

    pub fn pool(&self) -> &ConnectionPool<F> {
        &self.pool
    }
}

/// A named cluster: its configuration, endpoints and connection pool.
///
/// Cloning is cheap, clones share the same state.
pub struct Cluster<F: ConnectionFactory> {
    inner: Arc<ClusterInner<F>>,
}

impl<F: ConnectionFactory> Clone for Cluster<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ClusterInner<F: ConnectionFactory> {
    config: ClusterConfig,
    endpoints: Vec<Arc<Endpoint>>,
    factory: Arc<F>,
    state: ArcSwap<ClusterState<F>>,
    rebuilding: AtomicBool,
    rebuild_handle: StdMutex<Option<RemoteHandle<()>>>,
    listeners: StdMutex<Vec<Arc<dyn RebuildListener>>>,
    metrics: Arc<Metrics>,
}

impl Cluster<CqlConnectionFactory> {
    /// Creates a cluster speaking the native protocol.
    pub async fn connect(
        config: ClusterConfig,
        connection_config: ConnectionConfig,
    ) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(CqlConnectionFactory::new(connection_config))).await
    }

    /// Runs an unprepared statement with the default failure classification.
    pub async fn query(
        &self,
        keyspace: Option<&str>,
        cql: &str,
        consistency: Consistency,
    ) -> Result<result::Result<Rows>, ExecutionError<RequestError>> {
        self.execute(keyspace, |connection| async move {
            connection
                .query(cql, consistency)
                .await
                .map_err(ExecutionFailure::from)
        })
        .await
    }

    pub async fn prepare(
        &self,
        keyspace: Option<&str>,
        cql: &str,
    ) -> Result<Prepared, ExecutionError<RequestError>> {
        self.execute(keyspace, |connection| async move {
            connection.prepare(cql).await.map_err(ExecutionFailure::from)
        })
        .await
    }

    /// Executes a prepared statement with already serialized bound values.
    pub async fn execute_prepared(
        &self,
        keyspace: Option<&str>,
        prepared: &Prepared,
        values: Vec<Option<Bytes>>,
        consistency: Consistency,
    ) -> Result<result::Result<Rows>, ExecutionError<RequestError>> {
        self.execute(keyspace, |connection| {
            let values = values.clone();
            async move {
                connection
                    .execute(prepared, values, consistency)
                    .await
                    .map_err(ExecutionFailure::from)
            }
        })
        .await
    }
}

impl<F: ConnectionFactory> Cluster<F> {
    /// Validates the configuration, then builds the endpoint manager and the
    /// pool. The pool opens its minimum number of connections right away;
    /// unreachable endpoints do not fail construction.
    pub async fn new(config: ClusterConfig, factory: Arc<F>) -> Result<Self, ConfigError> {
        config.validate()?;

        let endpoints: Vec<Arc<Endpoint>> = config
            .endpoints
            .iter()
            .map(|endpoint| Arc::new(Endpoint::from_config(endpoint, config.connect_timeout)))
            .collect();
        let state = ClusterState::build(&config, endpoints.clone(), Arc::clone(&factory)).await;
        debug!(
            "[{}] Cluster created with {} endpoint(s)",
            config.name,
            endpoints.len()
        );

        Ok(Self {
            inner: Arc::new(ClusterInner {
                config,
                endpoints,
                factory,
                state: ArcSwap::from_pointee(state),
                rebuilding: AtomicBool::new(false),
                rebuild_handle: StdMutex::new(None),
                listeners: StdMutex::new(Vec::new()),
                metrics: Arc::new(Metrics::new()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Current endpoint manager and pool.
    pub fn state(&self) -> Arc<ClusterState<F>> {
        self.inner.state.load_full()
    }

    pub fn add_rebuild_listener(&self, listener: Arc<dyn RebuildListener>) {
        lock(&self.inner.listeners).push(listener);
    }

    pub fn is_rebuilding(&self) -> bool {
        self.inner.rebuilding.load(Ordering::SeqCst)
    }

    /// Requests a rebuild of the endpoint manager and the pool from the
    /// configuration. Does nothing while a rebuild is already running.
    pub fn rebuild(&self) {
        self.inner.request_rebuild(RebuildReason::Requested);
    }

    /// Runs `work` on a borrowed connection until it succeeds, reports a
    /// failure that should not be retried, or `max_retries` attempts were
    /// made.
    ///
    /// After each failed attempt the connection is released or invalidated
    /// according to [`ExecutionFailure::is_connection_healthy`]. Failing to
    /// borrow a connection fails the call at once. A failed last attempt and
    /// a [fatal](crate::errors::PoolError::is_fatal) borrow failure request a rebuild; a
    /// rejected keyspace does not.
    pub async fn execute<T, E, W, Fut>(
        &self,
        keyspace: Option<&str>,
        mut work: W,
    ) -> Result<T, ExecutionError<E>>
    where
        W: FnMut(Arc<F::Connection>) -> Fut,
        Fut: Future<Output = Result<T, ExecutionFailure<E>>>,
    {
        let inner = &self.inner;
        let name = &inner.config.name;
        let max_retries = inner.config.max_retries;
        inner.metrics.inc_executions();

        let state = inner.state.load_full();
        let mut attempts = 0;
        loop {
            attempts += 1;

            let connection = match state.pool.borrow(keyspace).await {
                Ok(connection) => connection,
                Err(err) => {
                    warn!("[{}] Failed to borrow a connection: {}", name, err);
                    inner.metrics.inc_borrow_failures();
                    inner.metrics.inc_failures();
                    if err.is_fatal() {
                        inner.request_rebuild(RebuildReason::BorrowFailed);
                    }
                    return Err(ExecutionError::Pool(err));
                }
            };

            let failure = match work(Arc::clone(connection.connection())).await {
                Ok(value) => {
                    state.pool.release(connection);
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            if failure.is_connection_healthy {
                state.pool.release(connection);
            } else {
                state.pool.invalidate(connection);
            }

            if !failure.should_retry || attempts >= max_retries {
                debug!(
                    "[{}] Giving up after {} attempt(s), retry allowed: {}",
                    name, attempts, failure.should_retry
                );
                inner.metrics.inc_failures();
                inner.request_rebuild(RebuildReason::RetriesExhausted);
                return Err(ExecutionError::Request {
                    error: failure.error,
                    attempts,
                });
            }

            trace!(
                "[{}] Attempt {} of {} failed, retrying",
                name,
                attempts,
                max_retries
            );
            inner.metrics.inc_retries();
        }
    }
}

impl<F: ConnectionFactory> ClusterInner<F> {
    fn listeners(&self) -> Vec<Arc<dyn RebuildListener>> {
        lock(&self.listeners).clone()
    }

    fn request_rebuild(self: &Arc<Self>, reason: RebuildReason) {
        if self
            .rebuilding
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            trace!(
                "[{}] Rebuild already in progress, ignoring {:?}",
                self.config.name,
                reason
            );
            return;
        }

        warn!("[{}] Rebuilding cluster state ({:?})", self.config.name, reason);
        for listener in self.listeners() {
            listener.rebuild_started(&self.config.name, reason);
        }

        let (fut, handle) = Self::rebuild(
            Arc::downgrade(self),
            self.config.clone(),
            self.endpoints.clone(),
            Arc::clone(&self.factory),
        )
        .remote_handle();
        tokio::spawn(fut);
        *lock(&self.rebuild_handle) = Some(handle);
    }

    async fn rebuild(
        cluster: Weak<Self>,
        config: ClusterConfig,
        endpoints: Vec<Arc<Endpoint>>,
        factory: Arc<F>,
    ) {
        let built = AssertUnwindSafe(ClusterState::build(&config, endpoints, factory))
            .catch_unwind()
            .await;

        let Some(cluster) = cluster.upgrade() else {
            return;
        };
        match built {
            Ok(state) => {
                cluster.state.store(Arc::new(state));
                cluster.metrics.inc_rebuilds();
                debug!("[{}] Cluster state rebuilt", config.name);
                for listener in cluster.listeners() {
                    listener.rebuild_finished(&config.name);
                }
            }
            Err(_) => error!("[{}] Rebuild panicked, keeping old state", config.name),
        }
        cluster.rebuilding.store(false, Ordering::SeqCst);
    }
}
