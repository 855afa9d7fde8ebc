//! Priority classes and the namespace priority assignment policy.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::dynamic::DynamicProperty;
use crate::core::metrics::{MetricsHandler, TASK_PRIORITY_ASSIGNED};
use crate::core::namespace::{NamespaceRegistry, RegistryError};

/// Priority class of a task. Each class has its own channel per namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Tasks that have been retried past the critical threshold.
    Critical,
    /// Tasks of namespaces active in this cluster.
    High,
    /// Everything else, including tasks whose namespace could not be resolved.
    #[default]
    Low,
}

impl TaskPriority {
    /// Stable lowercase name used in logs and metric tags.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round-robin weight of each priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    /// Weight of [`TaskPriority::Critical`] channels.
    pub critical: u32,
    /// Weight of [`TaskPriority::High`] channels.
    pub high: u32,
    /// Weight of [`TaskPriority::Low`] channels.
    pub low: u32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            critical: 400,
            high: 200,
            low: 50,
        }
    }
}

impl PriorityWeights {
    /// Weight of a priority class.
    pub const fn weight_of(&self, priority: TaskPriority) -> u32 {
        match priority {
            TaskPriority::Critical => self.critical,
            TaskPriority::High => self.high,
            TaskPriority::Low => self.low,
        }
    }

    /// Smallest weight in the table.
    pub fn lowest(&self) -> u32 {
        self.critical.min(self.high).min(self.low)
    }

    /// Reject zero weights.
    ///
    /// # Errors
    ///
    /// Names the first class whose weight is zero.
    pub fn validate(&self) -> Result<(), String> {
        for priority in [TaskPriority::Critical, TaskPriority::High, TaskPriority::Low] {
            if self.weight_of(priority) == 0 {
                return Err(format!("{priority} weight must be greater than 0"));
            }
        }
        Ok(())
    }
}

/// Maps a task's namespace and retry history to a priority class.
pub trait PriorityAssigner: Send + Sync {
    /// Priority class for a task of `namespace_id` on its `attempt`-th try.
    fn assign(&self, namespace_id: &str, attempt: u32) -> TaskPriority;
}

/// Options of [`NamespacePriorityAssigner`].
#[derive(Clone)]
pub struct PriorityAssignerOptions {
    /// Attempt count at which a task escalates to [`TaskPriority::Critical`].
    pub critical_retry_attempts: Arc<dyn DynamicProperty<usize>>,
}

/// Assigns priorities from namespace activity and retry count.
///
/// - attempt at or above the critical threshold: `Critical`
/// - namespace active in the current cluster: `High`
/// - standby, unknown or unresolvable namespace: `Low`
pub struct NamespacePriorityAssigner {
    current_cluster: String,
    registry: Arc<dyn NamespaceRegistry>,
    options: PriorityAssignerOptions,
    metrics: Arc<dyn MetricsHandler>,
}

impl NamespacePriorityAssigner {
    /// Create an assigner for tasks processed by `current_cluster`.
    pub fn new(
        current_cluster: impl Into<String>,
        registry: Arc<dyn NamespaceRegistry>,
        options: PriorityAssignerOptions,
        metrics: Arc<dyn MetricsHandler>,
    ) -> Self {
        Self {
            current_cluster: current_cluster.into(),
            registry,
            options,
            metrics,
        }
    }

    fn classify(&self, namespace_id: &str, attempt: u32) -> TaskPriority {
        let threshold = self.options.critical_retry_attempts.current_value();
        if attempt as usize >= threshold {
            debug!(namespace_id, attempt, threshold, "task escalated to critical priority");
            return TaskPriority::Critical;
        }

        match self.registry.get_namespace_by_id(namespace_id) {
            Ok(entry) if entry.is_active_in(&self.current_cluster) => TaskPriority::High,
            Ok(_) => TaskPriority::Low,
            Err(RegistryError::NotFound(_)) => {
                debug!(namespace_id, "namespace not found, assigning low priority");
                TaskPriority::Low
            }
            Err(e) => {
                warn!(namespace_id, error = %e, "namespace lookup failed, assigning low priority");
                TaskPriority::Low
            }
        }
    }
}

impl PriorityAssigner for NamespacePriorityAssigner {
    fn assign(&self, namespace_id: &str, attempt: u32) -> TaskPriority {
        let priority = self.classify(namespace_id, attempt);
        self.metrics.counter(
            TASK_PRIORITY_ASSIGNED,
            1,
            &[("priority", priority.as_str().to_string())],
        );
        priority
    }
}
