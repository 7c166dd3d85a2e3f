//! A bounded pool of connections to the nodes of one cluster.
//!
//! The pool never holds more than `max_connections` connections, idle and
//! busy together. Borrowing takes the most recently released idle connection
//! or opens a new one through the endpoint manager; it never waits for a busy
//! connection to come back. A background task periodically closes part of
//! the idle connections, never going below `min_connections`.

use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};

use futures::future::RemoteHandle;
use futures::FutureExt;
use tracing::{debug, error, trace, warn};

use crate::client::config::PoolConfig;
use crate::cluster::endpoint_manager::EndpointManager;
use crate::errors::{PoolError, RequestError};
use crate::network::connection::{Connection, ConnectionFactory};

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Number of connections in each state, taken at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections counted against `max_connections`, including ones that
    /// are being opened.
    pub managed: usize,
    pub idle: usize,
    pub busy: usize,
}

pub struct ConnectionPool<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
    _eviction_handle: RemoteHandle<()>,
}

struct Shared<F: ConnectionFactory> {
    name: String,
    config: PoolConfig,
    factory: Arc<F>,
    endpoints: Arc<EndpointManager<F>>,
    managed: AtomicUsize,
    busy: AtomicUsize,
    idle: StdMutex<IdleConnections<F::Connection>>,
}

/// Idle connections grouped by bucket. Without keyspace partitioning
/// everything lives in the `None` bucket.
struct IdleConnections<C> {
    buckets: HashMap<Option<String>, VecDeque<Arc<C>>>,
    len: usize,
}

impl<C> IdleConnections<C> {
    fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            len: 0,
        }
    }

    fn push(&mut self, bucket: Option<String>, connection: Arc<C>) {
        self.buckets.entry(bucket).or_default().push_back(connection);
        self.len += 1;
    }

    /// Most recently released connection of the bucket.
    fn take(&mut self, bucket: &Option<String>) -> Option<Arc<C>> {
        let connection = self.buckets.get_mut(bucket)?.pop_back()?;
        self.len -= 1;
        Some(connection)
    }

    /// Least recently released connection of the fullest bucket.
    fn take_oldest(&mut self) -> Option<Arc<C>> {
        let connection = self
            .buckets
            .values_mut()
            .max_by_key(|bucket| bucket.len())?
            .pop_front()?;
        self.len -= 1;
        Some(connection)
    }

    fn drain(&mut self) -> Vec<Arc<C>> {
        self.len = 0;
        self.buckets.drain().flat_map(|(_, bucket)| bucket).collect()
    }
}

/// Holds a slot of `managed` while a connection is being opened. The slot is
/// given back unless the connection made it into the pool.
struct Reservation<'a> {
    managed: &'a AtomicUsize,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.managed.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// A connection on its way out of the pool, neither idle nor busy. Destroyed
/// if dropped before being handed out, e.g. when `borrow` is cancelled.
struct Unsettled<'a, F: ConnectionFactory> {
    shared: &'a Shared<F>,
    connection: Arc<F::Connection>,
    settled: bool,
}

impl<F: ConnectionFactory> Unsettled<'_, F> {
    fn settle(mut self) -> Arc<F::Connection> {
        self.settled = true;
        Arc::clone(&self.connection)
    }
}

impl<F: ConnectionFactory> Drop for Unsettled<'_, F> {
    fn drop(&mut self) {
        if !self.settled {
            trace!(
                "[{}] Dropping connection to {} before handing it out",
                self.shared.name,
                self.connection.endpoint()
            );
            self.shared.destroy(&self.connection);
        }
    }
}

/// A connection borrowed from a [`ConnectionPool`].
///
/// Hand it back with [`ConnectionPool::release`] or
/// [`ConnectionPool::invalidate`]. A connection dropped without either is
/// invalidated.
pub struct PooledConnection<F: ConnectionFactory> {
    connection: Arc<F::Connection>,
    pool: Weak<Shared<F>>,
    settled: bool,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    pub fn connection(&self) -> &Arc<F::Connection> {
        &self.connection
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &F::Connection {
        &self.connection
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        match self.pool.upgrade() {
            Some(pool) => pool.invalidate(&self.connection),
            None => self.connection.close(),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Creates the pool, opens `min_connections` connections and starts the
    /// eviction task.
    ///
    /// Failing to open the initial connections is not an error: they are
    /// opened on demand later.
    pub async fn new(
        name: impl Into<String>,
        config: PoolConfig,
        factory: Arc<F>,
        endpoints: Arc<EndpointManager<F>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            name: name.into(),
            config,
            factory,
            endpoints,
            managed: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            idle: StdMutex::new(IdleConnections::new()),
        });

        shared.fill().await;

        let (fut, eviction_handle) = Arc::clone(&shared).eviction_loop().remote_handle();
        tokio::spawn(fut);

        Self {
            shared,
            _eviction_handle: eviction_handle,
        }
    }

    /// Borrows a connection bound to `keyspace`.
    ///
    /// Polls up to `max_borrow_attempts` times for an idle connection or
    /// room to open a new one, yielding between polls.
    pub async fn borrow(&self, keyspace: Option<&str>) -> Result<PooledConnection<F>, PoolError> {
        let shared = &self.shared;
        let bucket = shared.bucket_for(keyspace);
        let attempts = shared.config.max_borrow_attempts;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::task::yield_now().await;
            }

            if let Some(connection) = shared.take_open_idle(&bucket) {
                match shared.hand_out(connection, keyspace).await? {
                    Some(connection) => return Ok(connection),
                    None => continue,
                }
            }

            if let Some(connection) = shared.create_new_connection().await? {
                match shared.hand_out(connection, keyspace).await? {
                    Some(connection) => return Ok(connection),
                    None => continue,
                }
            }
            trace!(
                "[{}] Pool at capacity ({}), poll {} of {}",
                shared.name,
                shared.config.max_connections,
                attempt + 1,
                attempts
            );
        }

        debug!(
            "[{}] No connection available after {} attempts",
            shared.name, attempts
        );
        Err(PoolError::NoConnectionAvailable { attempts })
    }

    /// Returns a healthy connection to the idle set.
    pub fn release(&self, mut connection: PooledConnection<F>) {
        connection.settled = true;
        self.shared.release(&connection.connection);
    }

    /// Closes a connection that failed, bans its endpoint and frees its slot.
    pub fn invalidate(&self, mut connection: PooledConnection<F>) {
        connection.settled = true;
        self.shared.invalidate(&connection.connection);
    }

    pub fn stats(&self) -> PoolStats {
        let idle = lock(&self.shared.idle).len;
        PoolStats {
            managed: self.shared.managed.load(Ordering::SeqCst),
            idle,
            busy: self.shared.busy.load(Ordering::SeqCst),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn endpoint_manager(&self) -> &Arc<EndpointManager<F>> {
        &self.shared.endpoints
    }
}

impl<F: ConnectionFactory> Shared<F> {
    fn bucket_for(&self, keyspace: Option<&str>) -> Option<String> {
        if self.config.partition_by_keyspace {
            keyspace.map(str::to_owned)
        } else {
            None
        }
    }

    async fn fill(&self) {
        for _ in 0..self.config.min_connections {
            match self.create_new_connection().await {
                Ok(Some(connection)) => self.push_idle(connection),
                Ok(None) => break,
                Err(err) => {
                    warn!("[{}] Failed to fill the pool: {}", self.name, err);
                    break;
                }
            }
        }
        trace!(
            "[{}] Pool filled with {} connection(s)",
            self.name,
            self.managed.load(Ordering::SeqCst)
        );
    }

    fn push_idle(&self, connection: Arc<F::Connection>) {
        let bucket = self.bucket_for(connection.keyspace().as_deref());
        lock(&self.idle).push(bucket, connection);
    }

    /// Takes idle connections from the bucket until an open one turns up,
    /// destroying the closed ones on the way.
    fn take_open_idle(&self, bucket: &Option<String>) -> Option<Arc<F::Connection>> {
        loop {
            let connection = lock(&self.idle).take(bucket)?;
            if connection.is_open() {
                return Some(connection);
            }
            trace!(
                "[{}] Dropping closed idle connection to {}",
                self.name,
                connection.endpoint()
            );
            self.destroy(&connection);
        }
    }

    /// Opens a new connection if the pool has room for it. `Ok(None)` means
    /// the pool is at capacity.
    async fn create_new_connection(&self) -> Result<Option<Arc<F::Connection>>, PoolError> {
        let max = self.config.max_connections;
        if self
            .managed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |managed| {
                (managed < max).then_some(managed + 1)
            })
            .is_err()
        {
            return Ok(None);
        }
        let reservation = Reservation {
            managed: &self.managed,
            committed: false,
        };

        loop {
            let endpoint = self.endpoints.pick()?;
            let connection = Arc::new(self.factory.create(Arc::clone(&endpoint)));
            match connection.open().await {
                Ok(()) => {
                    trace!("[{}] Opened connection to {}", self.name, endpoint);
                    reservation.commit();
                    return Ok(Some(connection));
                }
                Err(err) => {
                    warn!(
                        "[{}] Failed to open connection to {}: {}",
                        self.name, endpoint, err
                    );
                    connection.close();
                    self.endpoints.ban(&endpoint);
                }
            }
        }
    }

    /// Binds the connection to the requested keyspace and marks it busy.
    ///
    /// `Ok(None)` means the connection broke while switching keyspaces; it
    /// has been destroyed and the caller polls again.
    async fn hand_out(
        self: &Arc<Self>,
        connection: Arc<F::Connection>,
        keyspace: Option<&str>,
    ) -> Result<Option<PooledConnection<F>>, PoolError> {
        let pending = Unsettled {
            shared: self.as_ref(),
            connection,
            settled: false,
        };

        if let Some(keyspace) = keyspace {
            if pending.connection.keyspace().as_deref() != Some(keyspace) {
                if let Err(error) = pending.connection.use_keyspace(keyspace).await {
                    debug!(
                        "[{}] Failed to switch connection to {} to keyspace {}: {}",
                        self.name,
                        pending.connection.endpoint(),
                        keyspace,
                        error
                    );
                    // Dropping `pending` destroys the connection.
                    return match error {
                        RequestError::BrokenConnection(_) | RequestError::Closed => Ok(None),
                        error => Err(PoolError::UseKeyspace {
                            keyspace: keyspace.to_owned(),
                            error,
                        }),
                    };
                }
            }
        }

        let connection = pending.settle();
        self.busy.fetch_add(1, Ordering::SeqCst);
        Ok(Some(PooledConnection {
            connection,
            pool: Arc::downgrade(self),
            settled: false,
        }))
    }

    fn release(&self, connection: &Arc<F::Connection>) {
        self.busy.fetch_sub(1, Ordering::SeqCst);
        if connection.is_open() {
            self.push_idle(Arc::clone(connection));
        } else {
            self.destroy(connection);
        }
    }

    fn invalidate(&self, connection: &Arc<F::Connection>) {
        self.busy.fetch_sub(1, Ordering::SeqCst);
        debug!(
            "[{}] Invalidating connection to {}",
            self.name,
            connection.endpoint()
        );
        self.endpoints.ban(connection.endpoint());
        self.destroy(connection);
    }

    /// Closes a connection that is neither idle nor busy and frees its slot.
    fn destroy(&self, connection: &Arc<F::Connection>) {
        connection.close();
        self.managed.fetch_sub(1, Ordering::SeqCst);
    }

    /// Closes up to the eviction quota of idle connections, keeping at least
    /// `min_connections` idle ones. Returns the number closed.
    fn evict_idle(&self) -> usize {
        let evicted: Vec<_> = {
            let mut idle = lock(&self.idle);
            let surplus = idle.len.saturating_sub(self.config.min_connections);
            let count = surplus.min(self.config.eviction_quota());
            (0..count).filter_map(|_| idle.take_oldest()).collect()
        };
        for connection in &evicted {
            self.destroy(connection);
        }
        evicted.len()
    }

    async fn eviction_loop(self: Arc<Self>) {
        tokio::time::sleep(self.config.eviction_due_interval).await;
        loop {
            match std::panic::catch_unwind(AssertUnwindSafe(|| self.evict_idle())) {
                Ok(0) => {}
                Ok(evicted) => debug!(
                    "[{}] Evicted {} idle connection(s)",
                    self.name, evicted
                ),
                Err(_) => error!("[{}] Eviction pass panicked", self.name),
            }
            tokio::time::sleep(self.config.eviction_periodic_interval).await;
        }
    }
}

impl<F: ConnectionFactory> Drop for Shared<F> {
    fn drop(&mut self) {
        let idle = lock(&self.idle).drain();
        for connection in idle {
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::config::EndpointManagerConfig;
    use crate::errors::EndpointError;
    use crate::utils::test_utils::{endpoints, setup_tracing, MockFactory};
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn pool_config(min: usize, max: usize) -> PoolConfig {
        PoolConfig {
            min_connections: min,
            max_connections: max,
            eviction_divisor: 4,
            max_borrow_attempts: 8,
            eviction_due_interval: Duration::from_secs(30),
            eviction_periodic_interval: Duration::from_secs(60),
            partition_by_keyspace: false,
        }
    }

    async fn pool(
        config: PoolConfig,
        endpoint_count: usize,
    ) -> (ConnectionPool<MockFactory>, Arc<MockFactory>) {
        let factory = MockFactory::new();
        let manager = Arc::new(EndpointManager::new(
            "test",
            endpoints(endpoint_count),
            EndpointManagerConfig::default(),
            Arc::clone(&factory),
        ));
        let pool = ConnectionPool::new("test", config, Arc::clone(&factory), manager).await;
        (pool, factory)
    }

    #[tokio::test]
    async fn fills_to_minimum_on_creation() {
        setup_tracing();
        let (pool, factory) = pool(pool_config(3, 8), 2).await;

        assert_eq!(factory.created(), 3);
        assert_eq!(
            pool.stats(),
            PoolStats {
                managed: 3,
                idle: 3,
                busy: 0
            }
        );
    }

    #[tokio::test]
    async fn released_connection_is_reused() {
        setup_tracing();
        let (pool, factory) = pool(pool_config(0, 4), 1).await;

        let conn = pool.borrow(None).await.unwrap();
        let first = Arc::clone(conn.connection());
        assert_eq!(pool.stats().busy, 1);
        pool.release(conn);

        let conn = pool.borrow(None).await.unwrap();
        assert!(Arc::ptr_eq(&first, conn.connection()));
        assert_eq!(factory.created(), 1);
        pool.release(conn);
        assert_eq!(
            pool.stats(),
            PoolStats {
                managed: 1,
                idle: 1,
                busy: 0
            }
        );
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn capacity_bound_under_concurrent_borrows() {
        setup_tracing();
        let (pool, factory) = pool(pool_config(0, 4), 3).await;

        let results = futures::future::join_all((0..16).map(|_| pool.borrow(None))).await;
        let (borrowed, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);

        assert_eq!(borrowed.len(), 4);
        for result in failed {
            assert_matches!(
                result.err(),
                Some(PoolError::NoConnectionAvailable { attempts: 8 })
            );
        }
        assert!(factory.open_peak() <= 4);
        assert_eq!(pool.stats().managed, 4);
        assert_eq!(pool.stats().busy, 4);

        for conn in borrowed {
            pool.release(conn.unwrap());
        }
        assert_eq!(pool.stats().idle, 4);
    }

    #[tokio::test]
    async fn eviction_keeps_the_floor() {
        setup_tracing();
        let (pool, _factory) = pool(pool_config(2, 10), 2).await;

        let mut borrowed = Vec::new();
        for _ in 0..10 {
            borrowed.push(pool.borrow(None).await.unwrap());
        }
        for conn in borrowed {
            pool.release(conn);
        }
        assert_eq!(pool.stats().idle, 10);

        // (10 - 2) / 4 per pass.
        assert_eq!(pool.shared.evict_idle(), 2);
        assert_eq!(pool.stats().idle, 8);
        for _ in 0..10 {
            pool.shared.evict_idle();
        }
        assert_eq!(
            pool.stats(),
            PoolStats {
                managed: 2,
                idle: 2,
                busy: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    #[ntest::timeout(10000)]
    async fn eviction_task_runs_periodically() {
        setup_tracing();
        let mut config = pool_config(1, 5);
        config.eviction_due_interval = Duration::from_secs(1);
        config.eviction_periodic_interval = Duration::from_secs(2);
        config.eviction_divisor = 2;
        let (pool, factory) = pool(config, 1).await;

        let mut borrowed = Vec::new();
        for _ in 0..5 {
            borrowed.push(pool.borrow(None).await.unwrap());
        }
        for conn in borrowed {
            pool.release(conn);
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(pool.stats().idle, 3);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(pool.stats().idle, 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(factory.open_now(), 1);
    }

    #[tokio::test]
    async fn single_set_rebinds_keyspace() {
        setup_tracing();
        let (pool, factory) = pool(pool_config(0, 4), 1).await;

        let conn = pool.borrow(Some("ks1")).await.unwrap();
        assert_eq!(conn.keyspace().as_deref(), Some("ks1"));
        pool.release(conn);

        let conn = pool.borrow(Some("ks2")).await.unwrap();
        assert_eq!(conn.keyspace().as_deref(), Some("ks2"));
        pool.release(conn);

        // Same keyspace again: no switch needed.
        let conn = pool.borrow(Some("ks2")).await.unwrap();
        pool.release(conn);

        assert_eq!(factory.created(), 1);
        assert_eq!(factory.keyspace_switches(), 2);
    }

    #[tokio::test]
    async fn partitioned_pool_never_rebinds() {
        setup_tracing();
        let mut config = pool_config(0, 4);
        config.partition_by_keyspace = true;
        let (pool, factory) = pool(config, 1).await;

        let conn = pool.borrow(Some("ks1")).await.unwrap();
        pool.release(conn);
        let conn = pool.borrow(Some("ks2")).await.unwrap();
        assert_eq!(conn.keyspace().as_deref(), Some("ks2"));
        pool.release(conn);
        assert_eq!(factory.created(), 2);

        let conn = pool.borrow(Some("ks1")).await.unwrap();
        assert_eq!(conn.keyspace().as_deref(), Some("ks1"));
        pool.release(conn);
        let conn = pool.borrow(None).await.unwrap();
        assert_eq!(conn.keyspace(), None);
        pool.release(conn);

        assert_eq!(factory.created(), 3);
        assert_eq!(factory.keyspace_switches(), 2);
        assert_eq!(pool.stats().idle, 3);
    }

    #[tokio::test]
    async fn invalid_keyspace_frees_the_slot() {
        setup_tracing();
        let (pool, _factory) = pool(pool_config(0, 2), 1).await;

        let err = pool.borrow(Some("bad keyspace")).await.err();
        assert_matches!(err, Some(PoolError::UseKeyspace { keyspace, .. }) if keyspace == "bad keyspace");
        assert_eq!(pool.stats().managed, 0);
        assert!(pool.endpoint_manager().blacklisted().is_empty());
    }

    #[tokio::test]
    async fn connection_broken_while_switching_keyspace_is_replaced() {
        setup_tracing();
        let (pool, factory) = pool(pool_config(1, 2), 1).await;
        factory.break_on_use_keyspace(1);

        let conn = pool.borrow(Some("ks")).await.unwrap();
        assert_eq!(conn.keyspace().as_deref(), Some("ks"));
        assert_eq!(factory.created(), 2);
        assert!(pool.endpoint_manager().blacklisted().is_empty());
        assert_eq!(
            pool.stats(),
            PoolStats {
                managed: 1,
                idle: 0,
                busy: 1
            }
        );
        pool.release(conn);
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn cancelled_borrow_frees_the_slot() {
        setup_tracing();
        // One idle connection, room for one more: both hand-out paths.
        let (pool, factory) = pool(pool_config(1, 2), 1).await;
        factory.set_use_keyspace_hangs(true);

        for _ in 0..2 {
            let borrow = pool.borrow(Some("ks"));
            assert!(tokio::time::timeout(Duration::from_millis(10), borrow)
                .await
                .is_err());
        }
        assert_eq!(factory.closed(), 2);
        assert_eq!(
            pool.stats(),
            PoolStats {
                managed: 0,
                idle: 0,
                busy: 0
            }
        );

        factory.set_use_keyspace_hangs(false);
        let conn = pool.borrow(Some("ks")).await.unwrap();
        pool.release(conn);
        assert_eq!(pool.stats().managed, 1);
    }

    #[tokio::test]
    async fn invalidate_bans_and_frees_the_slot() {
        setup_tracing();
        let (pool, factory) = pool(pool_config(0, 2), 2).await;

        let conn = pool.borrow(None).await.unwrap();
        let endpoint = Arc::clone(conn.endpoint());
        pool.invalidate(conn);

        assert!(pool.endpoint_manager().is_banned(&endpoint));
        assert_eq!(factory.closed(), 1);
        assert_eq!(
            pool.stats(),
            PoolStats {
                managed: 0,
                idle: 0,
                busy: 0
            }
        );
    }

    #[tokio::test]
    async fn dropped_connection_is_invalidated() {
        setup_tracing();
        let (pool, factory) = pool(pool_config(0, 2), 1).await;

        let conn = pool.borrow(None).await.unwrap();
        drop(conn);

        assert_eq!(factory.closed(), 1);
        assert_eq!(pool.stats().managed, 0);
        assert_eq!(pool.stats().busy, 0);
    }

    #[tokio::test]
    async fn closed_idle_connection_is_replaced() {
        setup_tracing();
        let (pool, factory) = pool(pool_config(0, 2), 1).await;

        let conn = pool.borrow(None).await.unwrap();
        let raw = Arc::clone(conn.connection());
        pool.release(conn);
        raw.break_connection();

        let conn = pool.borrow(None).await.unwrap();
        assert!(!Arc::ptr_eq(&raw, conn.connection()));
        assert_eq!(factory.created(), 2);
        pool.release(conn);
        assert_eq!(pool.stats().managed, 1);
    }

    #[tokio::test]
    async fn failed_open_bans_and_moves_on() {
        setup_tracing();
        let factory = MockFactory::new();
        let configured = endpoints(2);
        factory.set_down(&configured[0], true);
        let manager = Arc::new(EndpointManager::new(
            "test",
            configured.clone(),
            EndpointManagerConfig::default(),
            Arc::clone(&factory),
        ));
        let pool = ConnectionPool::new("test", pool_config(0, 2), factory, manager).await;

        let conn = pool.borrow(None).await.unwrap();
        assert_eq!(conn.endpoint(), &configured[1]);
        assert!(pool.endpoint_manager().is_banned(&configured[0]));
        pool.release(conn);
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn all_endpoints_down_is_fatal() {
        setup_tracing();
        let factory = MockFactory::new();
        let configured = endpoints(3);
        for endpoint in &configured {
            factory.set_down(endpoint, true);
        }
        let manager = Arc::new(EndpointManager::new(
            "test",
            configured,
            EndpointManagerConfig::default(),
            Arc::clone(&factory),
        ));
        // The initial fill fails too, without failing construction.
        let pool = ConnectionPool::new("test", pool_config(2, 4), factory, manager).await;
        assert_eq!(pool.stats().managed, 0);

        let err = pool.borrow(None).await.err();
        assert_matches!(
            err,
            Some(PoolError::NoEndpointAvailable(EndpointError::ClusterDown { .. }))
        );
        assert_eq!(pool.stats().managed, 0);
    }
}
