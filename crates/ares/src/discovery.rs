//! Service discovery.
//!
//! The lifecycle manager publishes one [`RegistrationRecord`] per server once
//! every server is running, and withdraws all of them first on every
//! shutdown path.

use std::collections::BTreeMap;
use std::fmt;

use ares_core::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;

/// A discovery backend failure.
#[derive(Debug, Error)]
#[error("discovery error: {message}")]
pub struct DiscoveryError {
    message: String,
}

impl DiscoveryError {
    /// Creates a discovery error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One published server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRecord {
    /// Scheme served (`http`, `grpc`).
    pub scheme: String,
    /// Address clients connect to.
    pub address: String,
    /// Process instance identifier.
    pub instance_id: String,
}

impl RegistrationRecord {
    /// Returns the discovery key, `{scheme}:{app}:{instance}`.
    #[must_use]
    pub fn service_key(&self, app_name: &str) -> String {
        format!("{}:{}:{}", self.scheme, app_name, self.instance_id)
    }
}

impl fmt::Display for RegistrationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{} ({})", self.scheme, self.address, self.instance_id)
    }
}

/// A service registry client.
pub trait Discovery: Send + Sync {
    /// Publishes `address` under `service_key`.
    fn register_instance<'a>(
        &'a self,
        service_key: &'a str,
        address: &'a str,
    ) -> BoxFuture<'a, Result<(), DiscoveryError>>;

    /// Withdraws everything this process registered.
    fn unregister_all(&self) -> BoxFuture<'_, ()>;
}

/// Discovery that registers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiscovery;

impl Discovery for NoopDiscovery {
    fn register_instance<'a>(
        &'a self,
        _service_key: &'a str,
        _address: &'a str,
    ) -> BoxFuture<'a, Result<(), DiscoveryError>> {
        Box::pin(async { Ok(()) })
    }

    fn unregister_all(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// In-process registry for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct MemoryDiscovery {
    entries: Mutex<BTreeMap<String, String>>,
    unregistrations: Mutex<usize>,
}

impl MemoryDiscovery {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current `(service_key, address)` entries.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns the address registered under `service_key`.
    #[must_use]
    pub fn get(&self, service_key: &str) -> Option<String> {
        self.entries.lock().get(service_key).cloned()
    }

    /// Returns how many times `unregister_all` was called.
    #[must_use]
    pub fn unregister_count(&self) -> usize {
        *self.unregistrations.lock()
    }
}

impl Discovery for MemoryDiscovery {
    fn register_instance<'a>(
        &'a self,
        service_key: &'a str,
        address: &'a str,
    ) -> BoxFuture<'a, Result<(), DiscoveryError>> {
        Box::pin(async move {
            self.entries
                .lock()
                .insert(service_key.to_string(), address.to_string());
            Ok(())
        })
    }

    fn unregister_all(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.entries.lock().clear();
            *self.unregistrations.lock() += 1;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_key() {
        let record = RegistrationRecord {
            scheme: "grpc".to_string(),
            address: "10.0.0.7:9090".to_string(),
            instance_id: "node-1".to_string(),
        };
        assert_eq!(record.service_key("greeter"), "grpc:greeter:node-1");
        assert_eq!(record.to_string(), "grpc://10.0.0.7:9090 (node-1)");
    }

    #[tokio::test]
    async fn test_memory_discovery() {
        let discovery = MemoryDiscovery::new();
        discovery
            .register_instance("http:greeter:node-1", "127.0.0.1:8080")
            .await
            .unwrap();
        assert_eq!(discovery.get("http:greeter:node-1").as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(discovery.entries().len(), 1);

        discovery.unregister_all().await;
        assert!(discovery.entries().is_empty());
        assert_eq!(discovery.unregister_count(), 1);
    }

    #[tokio::test]
    async fn test_noop_discovery() {
        let discovery: &dyn Discovery = &NoopDiscovery;
        assert!(discovery.register_instance("k", "a").await.is_ok());
        discovery.unregister_all().await;
    }
}
