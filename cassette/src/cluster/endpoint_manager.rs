//! Round-robin endpoint selection with a blacklist of failed nodes.
//!
//! Banned endpoints stay in the rotation until [`EndpointManager::pick`]
//! runs into them: only then are they dropped from the rotation and the
//! recovery task armed. Recovery probes each banned endpoint with a fresh
//! connection and returns it to the rotation once it answers.

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use futures::future::RemoteHandle;
use futures::FutureExt;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, error, trace, warn};

use crate::client::config::EndpointManagerConfig;
use crate::cluster::endpoint::Endpoint;
use crate::errors::EndpointError;
use crate::network::connection::{Connection, ConnectionFactory};

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct EndpointManager<F: ConnectionFactory> {
    inner: Arc<Inner<F>>,
    _recovery_handle: RemoteHandle<()>,
}

struct Inner<F: ConnectionFactory> {
    cluster_name: String,
    config: EndpointManagerConfig,
    factory: Arc<F>,
    configured: Vec<Arc<Endpoint>>,
    rotation: StdMutex<VecDeque<Arc<Endpoint>>>,
    blacklist: StdMutex<HashSet<Arc<Endpoint>>>,
    recovery_armed: Notify,
    // Held for the whole of a recovery pass.
    pass_running: AsyncMutex<()>,
}

impl<F: ConnectionFactory> EndpointManager<F> {
    /// Creates the manager and spawns its recovery task. Rotation follows
    /// the order of `endpoints`.
    pub fn new(
        cluster_name: impl Into<String>,
        endpoints: Vec<Arc<Endpoint>>,
        config: EndpointManagerConfig,
        factory: Arc<F>,
    ) -> Self {
        let inner = Arc::new(Inner {
            cluster_name: cluster_name.into(),
            config,
            factory,
            rotation: StdMutex::new(endpoints.iter().cloned().collect()),
            configured: endpoints,
            blacklist: StdMutex::new(HashSet::new()),
            recovery_armed: Notify::new(),
            pass_running: AsyncMutex::new(()),
        });

        let (fut, handle) = Arc::clone(&inner).recovery_loop().remote_handle();
        tokio::spawn(fut);

        Self {
            inner,
            _recovery_handle: handle,
        }
    }

    /// Picks the next endpoint in round-robin order, skipping banned ones.
    pub fn pick(&self) -> Result<Arc<Endpoint>, EndpointError> {
        let mut rotation = lock(&self.inner.rotation);
        while let Some(endpoint) = rotation.pop_front() {
            if self.inner.is_banned(&endpoint) {
                trace!(
                    "[{}] Dropping banned endpoint {} from rotation",
                    self.inner.cluster_name,
                    endpoint
                );
                self.inner.recovery_armed.notify_one();
                continue;
            }
            rotation.push_back(Arc::clone(&endpoint));
            return Ok(endpoint);
        }

        Err(EndpointError::ClusterDown {
            cluster: self.inner.cluster_name.clone(),
            endpoints: self
                .inner
                .configured
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Marks the endpoint as failed. Banning an already banned endpoint does
    /// nothing.
    pub fn ban(&self, endpoint: &Arc<Endpoint>) {
        if lock(&self.inner.blacklist).insert(Arc::clone(endpoint)) {
            warn!("[{}] Endpoint {} banned", self.inner.cluster_name, endpoint);
        }
    }

    pub fn is_banned(&self, endpoint: &Endpoint) -> bool {
        self.inner.is_banned(endpoint)
    }

    /// Snapshot of the currently banned endpoints.
    pub fn blacklisted(&self) -> Vec<Arc<Endpoint>> {
        lock(&self.inner.blacklist).iter().cloned().collect()
    }

    pub fn configured(&self) -> &[Arc<Endpoint>] {
        &self.inner.configured
    }

    /// Runs one recovery pass right away, after any pass already running.
    /// Returns the number of endpoints still banned afterwards.
    pub async fn recover_now(&self) -> usize {
        self.inner.recovery_pass().await
    }
}

impl<F: ConnectionFactory> Inner<F> {
    fn is_banned(&self, endpoint: &Endpoint) -> bool {
        lock(&self.blacklist).contains(endpoint)
    }

    fn unban(&self, endpoint: &Arc<Endpoint>) {
        if !lock(&self.blacklist).remove(endpoint) {
            return;
        }
        // pick() may not have dropped it from the rotation yet.
        let mut rotation = lock(&self.rotation);
        if !rotation.contains(endpoint) {
            rotation.push_back(Arc::clone(endpoint));
        }
    }

    async fn recovery_pass(&self) -> usize {
        let _running = self.pass_running.lock().await;
        let banned: Vec<Arc<Endpoint>> = lock(&self.blacklist).iter().cloned().collect();

        for endpoint in banned {
            let connection = self.factory.create(Arc::clone(&endpoint));
            let probe = async {
                connection.open().await.map_err(|err| err.to_string())?;
                connection.cluster_name().await.map_err(|err| err.to_string())
            };
            match probe.await {
                Ok(cluster_name) => {
                    debug!(
                        "[{}] Endpoint {} is back (cluster name: {})",
                        self.cluster_name, endpoint, cluster_name
                    );
                    self.unban(&endpoint);
                }
                Err(err) => {
                    trace!(
                        "[{}] Endpoint {} still unavailable: {}",
                        self.cluster_name,
                        endpoint,
                        err
                    );
                }
            }
            connection.close();
        }

        lock(&self.blacklist).len()
    }

    async fn recovery_loop(self: Arc<Self>) {
        loop {
            self.recovery_armed.notified().await;

            let mut delay = self.config.recovery_due_interval;
            loop {
                tokio::time::sleep(delay).await;

                match AssertUnwindSafe(self.recovery_pass()).catch_unwind().await {
                    Ok(0) => {
                        trace!("[{}] Blacklist empty, recovery disarmed", self.cluster_name);
                        break;
                    }
                    Ok(remaining) => {
                        trace!(
                            "[{}] {} endpoint(s) still banned",
                            self.cluster_name,
                            remaining
                        );
                        delay = self.config.recovery_periodic_interval;
                    }
                    Err(_) => {
                        error!("[{}] Recovery pass panicked", self.cluster_name);
                        delay = self.config.recovery_due_interval;
                    }
                }
            }
        }
    }
}
