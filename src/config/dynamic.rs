//! Live-reloadable configuration properties.
//!
//! Components never receive pushed updates. They hold a property and poll
//! [`DynamicProperty::current_value`] at their own checkpoints (the worker
//! reconcile tick, the start of every dispatch cycle). A [`ConfigClient`] is
//! the external source of values; [`DynamicConfig`] turns it into typed
//! properties that fall back to defaults when a key is absent or malformed.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// Worker count of a processor.
pub const WORKER_COUNT_KEY: &str = "scheduler.workerCount";
/// Per-namespace priority weight table.
pub const ROUND_ROBIN_WEIGHTS_KEY: &str = "scheduler.roundRobinWeights";
/// Attempt count at which a task escalates to the critical class.
pub const CRITICAL_RETRY_ATTEMPTS_KEY: &str = "scheduler.criticalRetryAttempts";
/// Host-wide dispatch budget in requests per second.
pub const MAX_POLL_HOST_RPS_KEY: &str = "scheduler.maxPollHostRPS";
/// Persistence budget the host budget derives from when unset.
pub const PERSISTENCE_MAX_QPS_KEY: &str = "scheduler.persistenceMaxQPS";
/// Per-operation dispatch budget in requests per second.
pub const MAX_POLL_RPS_KEY: &str = "scheduler.maxPollRPS";
/// Per-namespace dispatch budget in requests per second.
pub const NAMESPACE_MAX_RPS_KEY: &str = "scheduler.namespaceMaxRPS";

/// A value read live from configuration.
pub trait DynamicProperty<T>: Send + Sync {
    /// Value in effect right now.
    fn current_value(&self) -> T;
}

/// A value that may be overridden per namespace.
pub trait NamespaceProperty<T>: Send + Sync {
    /// Value in effect for `namespace` right now.
    fn value_for(&self, namespace: &str) -> T;
}

/// Property that never changes.
#[derive(Debug, Clone)]
pub struct StaticProperty<T>(T);

impl<T> StaticProperty<T> {
    /// Wrap a fixed value.
    pub const fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T: Clone + Send + Sync> DynamicProperty<T> for StaticProperty<T> {
    fn current_value(&self) -> T {
        self.0.clone()
    }
}

impl<T: Clone + Send + Sync> NamespaceProperty<T> for StaticProperty<T> {
    fn value_for(&self, _namespace: &str) -> T {
        self.0.clone()
    }
}

/// External source of configuration values.
pub trait ConfigClient: Send + Sync {
    /// Raw value for `key`, preferring a `namespace`-scoped override.
    fn get_value(&self, key: &str, namespace: Option<&str>) -> Option<Value>;
}

/// Client with no values: every property resolves to its default.
///
/// Used when no live configuration system is wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConfigClient;

impl ConfigClient for NoopConfigClient {
    fn get_value(&self, _key: &str, _namespace: Option<&str>) -> Option<Value> {
        None
    }
}

/// Settable in-process client. Changes are visible to every property built on
/// it at the property's next poll.
#[derive(Debug, Default)]
pub struct InMemoryConfigClient {
    global: RwLock<HashMap<String, Value>>,
    scoped: RwLock<HashMap<(String, String), Value>>,
}

impl InMemoryConfigClient {
    /// Create an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the global value of `key`.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.global.write().insert(key.into(), value);
    }

    /// Set `key` for a single namespace.
    pub fn set_for_namespace(
        &self,
        key: impl Into<String>,
        namespace: impl Into<String>,
        value: Value,
    ) {
        self.scoped
            .write()
            .insert((key.into(), namespace.into()), value);
    }

    /// Remove the global value and all namespace overrides of `key`.
    pub fn remove(&self, key: &str) {
        self.global.write().remove(key);
        self.scoped.write().retain(|(k, _), _| k != key);
    }
}

impl ConfigClient for InMemoryConfigClient {
    fn get_value(&self, key: &str, namespace: Option<&str>) -> Option<Value> {
        if let Some(namespace) = namespace {
            let scoped = self.scoped.read();
            if let Some(value) = scoped.get(&(key.to_string(), namespace.to_string())) {
                return Some(value.clone());
            }
        }
        self.global.read().get(key).cloned()
    }
}

/// Factory of typed properties over a [`ConfigClient`].
#[derive(Clone)]
pub struct DynamicConfig {
    client: Arc<dyn ConfigClient>,
}

impl DynamicConfig {
    /// Build properties over `client`.
    pub fn new(client: Arc<dyn ConfigClient>) -> Self {
        Self { client }
    }

    /// Properties that always yield their defaults.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopConfigClient))
    }

    /// Integer property, e.g. a worker count.
    #[must_use]
    pub fn int_property(
        &self,
        key: &'static str,
        default: usize,
    ) -> Arc<dyn DynamicProperty<usize>> {
        self.typed(key, default)
    }

    /// Floating point property, e.g. a requests-per-second budget.
    #[must_use]
    pub fn float_property(&self, key: &'static str, default: f64) -> Arc<dyn DynamicProperty<f64>> {
        self.typed(key, default)
    }

    /// Boolean property.
    #[must_use]
    pub fn bool_property(&self, key: &'static str, default: bool) -> Arc<dyn DynamicProperty<bool>> {
        self.typed(key, default)
    }

    /// Property of any deserializable type with per-namespace overrides.
    #[must_use]
    pub fn namespace_property<T>(
        &self,
        key: &'static str,
        default: T,
    ) -> Arc<dyn NamespaceProperty<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        Arc::new(ClientProperty {
            client: Arc::clone(&self.client),
            key,
            default,
            _marker: PhantomData,
        })
    }

    fn typed<T>(&self, key: &'static str, default: T) -> Arc<dyn DynamicProperty<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        Arc::new(ClientProperty {
            client: Arc::clone(&self.client),
            key,
            default,
            _marker: PhantomData,
        })
    }
}

struct ClientProperty<T> {
    client: Arc<dyn ConfigClient>,
    key: &'static str,
    default: T,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ClientProperty<T>
where
    T: DeserializeOwned + Clone,
{
    fn resolve(&self, namespace: Option<&str>) -> T {
        let Some(raw) = self.client.get_value(self.key, namespace) else {
            return self.default.clone();
        };
        match serde_json::from_value(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = self.key, error = %e, "malformed dynamic config value, using default");
                self.default.clone()
            }
        }
    }
}

impl<T> DynamicProperty<T> for ClientProperty<T>
where
    T: DeserializeOwned + Clone + Send + Sync,
{
    fn current_value(&self) -> T {
        self.resolve(None)
    }
}

impl<T> NamespaceProperty<T> for ClientProperty<T>
where
    T: DeserializeOwned + Clone + Send + Sync,
{
    fn value_for(&self, namespace: &str) -> T {
        self.resolve(Some(namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_noop_client_yields_defaults() {
        let config = DynamicConfig::noop();
        assert_eq!(config.int_property(WORKER_COUNT_KEY, 8).current_value(), 8);
        assert!(config.bool_property("flag", true).current_value());
    }

    #[test]
    fn test_in_memory_client_is_live() {
        let client = Arc::new(InMemoryConfigClient::new());
        let config = DynamicConfig::new(client.clone());
        let workers = config.int_property(WORKER_COUNT_KEY, 2);

        assert_eq!(workers.current_value(), 2);
        client.set(WORKER_COUNT_KEY, json!(6));
        assert_eq!(workers.current_value(), 6);
        client.remove(WORKER_COUNT_KEY);
        assert_eq!(workers.current_value(), 2);
    }

    #[test]
    fn test_malformed_value_falls_back() {
        let client = Arc::new(InMemoryConfigClient::new());
        client.set(MAX_POLL_RPS_KEY, json!("fast"));
        let config = DynamicConfig::new(client);
        let rps = config.float_property(MAX_POLL_RPS_KEY, 20.0);
        assert!((rps.current_value() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_negative_int_falls_back() {
        let client = Arc::new(InMemoryConfigClient::new());
        client.set(WORKER_COUNT_KEY, json!(-3));
        let config = DynamicConfig::new(client);
        assert_eq!(config.int_property(WORKER_COUNT_KEY, 4).current_value(), 4);
    }

    #[test]
    fn test_namespace_override_wins_over_global() {
        let client = Arc::new(InMemoryConfigClient::new());
        client.set(NAMESPACE_MAX_RPS_KEY, json!(10.0));
        client.set_for_namespace(NAMESPACE_MAX_RPS_KEY, "billing", json!(2.5));
        let config = DynamicConfig::new(client);
        let rps = config.namespace_property(NAMESPACE_MAX_RPS_KEY, 1.0_f64);

        assert!((rps.value_for("billing") - 2.5).abs() < f64::EPSILON);
        assert!((rps.value_for("orders") - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_static_property() {
        let p = StaticProperty::new(5_u32);
        assert_eq!(DynamicProperty::current_value(&p), 5);
        assert_eq!(p.value_for("any"), 5);
    }
}
