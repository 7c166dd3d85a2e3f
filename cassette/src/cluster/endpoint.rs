use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::client::config::EndpointConfig;

/// Address of one node of the cluster.
///
/// Two endpoints are the same node when address and port match; the connect
/// timeout does not take part in equality or hashing.
#[derive(Debug, Clone)]
pub struct Endpoint {
    address: String,
    port: u16,
    connect_timeout: Duration,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            port,
            connect_timeout,
        }
    }

    pub(crate) fn from_config(config: &EndpointConfig, default_connect_timeout: Duration) -> Self {
        Self::new(
            config.address.clone(),
            config.port,
            config.connect_timeout.unwrap_or(default_connect_timeout),
        )
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identity_ignores_timeout() {
        let a = Endpoint::new("10.0.0.1", 9042, Duration::from_secs(1));
        let b = Endpoint::new("10.0.0.1", 9042, Duration::from_secs(30));
        let c = Endpoint::new("10.0.0.1", 9043, Duration::from_secs(1));
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<Endpoint> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn display() {
        let v4 = Endpoint::new("10.0.0.1", 9042, Duration::ZERO);
        let v6 = Endpoint::new("::1", 9042, Duration::ZERO);
        assert_eq!(v4.to_string(), "10.0.0.1:9042");
        assert_eq!(v6.to_string(), "[::1]:9042");
    }
}
