//! Named clusters, owned by the application.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::client::cluster::Cluster;
use crate::client::config::ClusterConfig;
use crate::errors::RegistryError;
use crate::network::connection::ConnectionFactory;

/// Looks up clusters by name.
///
/// Create one at startup and share it (for example in an `Arc`) with
/// everything that needs cluster access.
pub struct ClusterRegistry<F: ConnectionFactory> {
    clusters: DashMap<String, Arc<Cluster<F>>>,
}

impl<F: ConnectionFactory> Default for ClusterRegistry<F> {
    fn default() -> Self {
        Self {
            clusters: DashMap::new(),
        }
    }
}

impl<F: ConnectionFactory> ClusterRegistry<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cluster from `config` and registers it under `config.name`.
    pub async fn register(
        &self,
        config: ClusterConfig,
        factory: Arc<F>,
    ) -> Result<Arc<Cluster<F>>, RegistryError> {
        if self.clusters.contains_key(&config.name) {
            return Err(RegistryError::AlreadyRegistered(config.name));
        }
        let cluster = Arc::new(Cluster::new(config, factory).await?);
        self.insert(cluster)
    }

    /// Registers an already built cluster under its name.
    pub fn insert(&self, cluster: Arc<Cluster<F>>) -> Result<Arc<Cluster<F>>, RegistryError> {
        match self.clusters.entry(cluster.name().to_owned()) {
            Entry::Occupied(entry) => Err(RegistryError::AlreadyRegistered(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!("[{}] Cluster registered", cluster.name());
                entry.insert(Arc::clone(&cluster));
                Ok(cluster)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Cluster<F>>> {
        self.clusters.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Unregisters the cluster. It shuts down once the last handle to it is
    /// dropped.
    pub fn remove(&self, name: &str) -> Option<Arc<Cluster<F>>> {
        self.clusters.remove(name).map(|(_, cluster)| cluster)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusters.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}
