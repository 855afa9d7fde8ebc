//! Namespace registry lookups consumed by priority assignment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

/// Registry metadata for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceEntry {
    /// Stable namespace identifier carried by tasks.
    pub id: String,
    /// Display name; per-namespace configuration is keyed by it.
    pub name: String,
    /// Cluster currently active for the namespace.
    pub active_cluster: String,
}

impl NamespaceEntry {
    /// Build an entry.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        active_cluster: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active_cluster: active_cluster.into(),
        }
    }

    /// Whether `cluster` is the namespace's active cluster.
    pub fn is_active_in(&self, cluster: &str) -> bool {
        self.active_cluster == cluster
    }
}

/// Failures of a registry lookup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No namespace with this id.
    #[error("namespace not found: {0}")]
    NotFound(String),
    /// The registry could not answer right now.
    #[error("namespace registry unavailable: {0}")]
    Unavailable(String),
}

/// Read-only namespace lookup.
///
/// Lookups sit on the submission and dispatch paths; callers degrade to
/// defaults on error rather than wait.
pub trait NamespaceRegistry: Send + Sync {
    /// Look up a namespace by id.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] for unknown ids,
    /// [`RegistryError::Unavailable`] for transient failures.
    fn get_namespace_by_id(&self, id: &str) -> Result<NamespaceEntry, RegistryError>;

    /// Resolve a namespace id to its name.
    ///
    /// # Errors
    ///
    /// Same as [`NamespaceRegistry::get_namespace_by_id`].
    fn get_namespace_name(&self, id: &str) -> Result<String, RegistryError> {
        self.get_namespace_by_id(id).map(|entry| entry.name)
    }
}

/// In-memory registry for testing and dev.
#[derive(Debug, Default)]
pub struct InMemoryNamespaceRegistry {
    entries: RwLock<HashMap<String, NamespaceEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryNamespaceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry.
    pub fn register(&self, entry: NamespaceEntry) {
        self.entries.write().insert(entry.id.clone(), entry);
    }

    /// Remove an entry by id.
    pub fn remove(&self, id: &str) -> Option<NamespaceEntry> {
        self.entries.write().remove(id)
    }

    /// Make every lookup fail with [`RegistryError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }
}

impl NamespaceRegistry for InMemoryNamespaceRegistry {
    fn get_namespace_by_id(&self, id: &str) -> Result<NamespaceEntry, RegistryError> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(RegistryError::Unavailable(id.to_string()));
        }
        self.entries
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_id_and_name() {
        let registry = InMemoryNamespaceRegistry::new();
        registry.register(NamespaceEntry::new("ns-1", "billing", "east"));

        let entry = registry.get_namespace_by_id("ns-1").unwrap();
        assert!(entry.is_active_in("east"));
        assert!(!entry.is_active_in("west"));
        assert_eq!(registry.get_namespace_name("ns-1").unwrap(), "billing");
        assert_eq!(
            registry.get_namespace_name("ns-2"),
            Err(RegistryError::NotFound("ns-2".into()))
        );
    }

    #[test]
    fn test_unavailable_registry() {
        let registry = InMemoryNamespaceRegistry::new();
        registry.register(NamespaceEntry::new("ns-1", "billing", "east"));
        registry.set_unavailable(true);
        assert!(matches!(
            registry.get_namespace_by_id("ns-1"),
            Err(RegistryError::Unavailable(_))
        ));
        registry.set_unavailable(false);
        assert!(registry.get_namespace_by_id("ns-1").is_ok());
        assert!(registry.remove("ns-1").is_some());
        assert!(registry.get_namespace_by_id("ns-1").is_err());
    }
}
