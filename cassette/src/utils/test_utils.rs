//! In-memory connections for exercising the pool, the endpoint manager and
//! the cluster without a database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::endpoint::Endpoint;
use crate::errors::{ConnectionError, RequestError};
use crate::network::connection::{Connection, ConnectionFactory, VerifiedKeyspaceName};

pub const MOCK_CLUSTER_NAME: &str = "Test Cluster";

#[cfg(test)]
pub(crate) fn setup_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(tracing_subscriber::fmt::TestWriter::new())
        .try_init();
}

/// `count` endpoints at 127.0.0.1, 127.0.0.2, ... on port 9042.
pub fn endpoints(count: usize) -> Vec<Arc<Endpoint>> {
    (1..=count)
        .map(|i| Arc::new(Endpoint::new(format!("127.0.0.{i}"), 9042, Duration::from_secs(1))))
        .collect()
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MockState {
    down: StdMutex<HashSet<Endpoint>>,
    opened: StdMutex<HashMap<Endpoint, usize>>,
    created: AtomicUsize,
    closed: AtomicUsize,
    open_now: AtomicUsize,
    open_peak: AtomicUsize,
    keyspace_switches: AtomicUsize,
    break_on_use_keyspace: AtomicUsize,
    use_keyspace_hangs: AtomicBool,
}

impl MockState {
    fn is_down(&self, endpoint: &Endpoint) -> bool {
        lock(&self.down).contains(endpoint)
    }
}

/// Creates [`MockConnection`]s and records what happens to them.
#[derive(Default)]
pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A down endpoint refuses new connections and fails health probes.
    pub fn set_down(&self, endpoint: &Endpoint, down: bool) {
        let mut set = lock(&self.state.down);
        if down {
            set.insert(endpoint.clone());
        } else {
            set.remove(endpoint);
        }
    }

    /// Number of `open` attempts made against `endpoint`.
    pub fn opened(&self, endpoint: &Endpoint) -> usize {
        lock(&self.state.opened).get(endpoint).copied().unwrap_or(0)
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Connections open right now.
    pub fn open_now(&self) -> usize {
        self.state.open_now.load(Ordering::SeqCst)
    }

    /// Highest number of connections open at the same time.
    pub fn open_peak(&self) -> usize {
        self.state.open_peak.load(Ordering::SeqCst)
    }

    pub fn keyspace_switches(&self) -> usize {
        self.state.keyspace_switches.load(Ordering::SeqCst)
    }

    /// The next `count` keyspace switches break their connection instead.
    pub fn break_on_use_keyspace(&self, count: usize) {
        self.state.break_on_use_keyspace.store(count, Ordering::SeqCst);
    }

    /// Keyspace switches never complete while set.
    pub fn set_use_keyspace_hangs(&self, hangs: bool) {
        self.state.use_keyspace_hangs.store(hangs, Ordering::SeqCst);
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn create(&self, endpoint: Arc<Endpoint>) -> MockConnection {
        self.state.created.fetch_add(1, Ordering::SeqCst);
        MockConnection {
            endpoint,
            state: Arc::clone(&self.state),
            open: AtomicBool::new(false),
            keyspace: StdMutex::new(None),
        }
    }
}

pub struct MockConnection {
    endpoint: Arc<Endpoint>,
    state: Arc<MockState>,
    open: AtomicBool,
    keyspace: StdMutex<Option<String>>,
}

impl MockConnection {
    /// Simulates the node dropping the connection.
    pub fn break_connection(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.state.open_now.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    async fn open(&self) -> Result<(), ConnectionError> {
        if self.open.load(Ordering::SeqCst) {
            return Ok(());
        }
        // Let concurrent openers interleave, like a real connect would.
        tokio::task::yield_now().await;

        *lock(&self.state.opened)
            .entry((*self.endpoint).clone())
            .or_default() += 1;
        if self.state.is_down(&self.endpoint) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )
            .into());
        }

        self.open.store(true, Ordering::SeqCst);
        let open_now = self.state.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.open_peak.fetch_max(open_now, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.state.open_now.fetch_sub(1, Ordering::SeqCst);
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        *lock(&self.keyspace) = None;
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn keyspace(&self) -> Option<String> {
        lock(&self.keyspace).clone()
    }

    async fn use_keyspace(&self, keyspace: &str) -> Result<(), RequestError> {
        let keyspace = VerifiedKeyspaceName::new(keyspace)?;
        if !self.is_open() {
            return Err(RequestError::Closed);
        }
        if self.state.use_keyspace_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self
            .state
            .break_on_use_keyspace
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            self.break_connection();
            return Err(RequestError::Closed);
        }
        self.state.keyspace_switches.fetch_add(1, Ordering::SeqCst);
        *lock(&self.keyspace) = Some(keyspace.as_str().to_owned());
        Ok(())
    }

    async fn cluster_name(&self) -> Result<String, RequestError> {
        if !self.is_open() || self.state.is_down(&self.endpoint) {
            return Err(RequestError::Closed);
        }
        Ok(MOCK_CLUSTER_NAME.to_owned())
    }
}
