//! Static scheduler configuration.
//!
//! These values seed the dynamic properties built in [`crate::builders`]; a
//! live [`ConfigClient`](crate::config::dynamic::ConfigClient) may override
//! the reloadable ones at runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::iwrr::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_RATE_LIMIT_RETRY_DELAY};
use crate::core::priority::PriorityWeights;
use crate::core::processor::{DEFAULT_RECONCILE_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::core::scheduler::ShutdownPolicy;

/// Default intake capacity of a processor.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;
/// Default attempt count at which tasks escalate to the critical class.
pub const DEFAULT_CRITICAL_RETRY_ATTEMPTS: usize = 10;
/// Default per-operation dispatch budget.
pub const DEFAULT_MAX_POLL_RPS: f64 = 20.0;
/// Default persistence budget the host budget derives from.
pub const DEFAULT_PERSISTENCE_MAX_QPS: f64 = 9000.0;

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Initial worker count; defaults to the number of CPUs.
    pub worker_count: usize,
    /// Intake capacity.
    pub queue_size: usize,
    /// Fate of queued work on shutdown.
    pub shutdown_policy: ShutdownPolicy,
    /// How long shutdown waits for threads, in milliseconds.
    pub shutdown_timeout_ms: u64,
    /// Worker-count polling period, in milliseconds.
    pub reconcile_interval_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            queue_size: DEFAULT_QUEUE_SIZE,
            shutdown_policy: ShutdownPolicy::default(),
            shutdown_timeout_ms: duration_ms(DEFAULT_SHUTDOWN_TIMEOUT),
            reconcile_interval_ms: duration_ms(DEFAULT_RECONCILE_INTERVAL),
        }
    }
}

impl ProcessorConfig {
    /// Validate processor settings.
    ///
    /// # Errors
    ///
    /// Names the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.queue_size == 0 {
            return Err("queue_size must be greater than 0".into());
        }
        if self.reconcile_interval_ms == 0 {
            return Err("reconcile_interval_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Shutdown timeout as a duration.
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Reconcile interval as a duration.
    pub const fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

/// Dispatch budgets in requests per second. Zero disables a budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Host-wide budget; when zero the host gets a share of
    /// `persistence_max_qps` instead.
    pub max_poll_host_rps: f64,
    /// Persistence budget of the host.
    pub persistence_max_qps: f64,
    /// Budget of this queue operation.
    pub max_poll_rps: f64,
    /// Budget of each namespace; zero means unlimited.
    pub namespace_max_rps: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_poll_host_rps: 0.0,
            persistence_max_qps: DEFAULT_PERSISTENCE_MAX_QPS,
            max_poll_rps: DEFAULT_MAX_POLL_RPS,
            namespace_max_rps: 0.0,
        }
    }
}

impl RateLimitConfig {
    /// Reject negative or non-finite budgets.
    ///
    /// # Errors
    ///
    /// Names the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("max_poll_host_rps", self.max_poll_host_rps),
            ("persistence_max_qps", self.persistence_max_qps),
            ("max_poll_rps", self.max_poll_rps),
            ("namespace_max_rps", self.namespace_max_rps),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be a non-negative number"));
            }
        }
        Ok(())
    }
}

/// Namespace priority scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespacePriorityConfig {
    /// Cluster this host belongs to; namespaces active here get high priority.
    pub current_cluster: String,
    /// Attempt count at which a task escalates to the critical class.
    pub critical_retry_attempts: usize,
    /// Default weight table, used for namespaces without an override.
    pub weights: PriorityWeights,
    /// Pause after every pending task was rate limited, in milliseconds.
    pub rate_limit_retry_delay_ms: u64,
}

impl Default for NamespacePriorityConfig {
    fn default() -> Self {
        Self {
            current_cluster: "active".into(),
            critical_retry_attempts: DEFAULT_CRITICAL_RETRY_ATTEMPTS,
            weights: PriorityWeights::default(),
            rate_limit_retry_delay_ms: duration_ms(DEFAULT_RATE_LIMIT_RETRY_DELAY),
        }
    }
}

impl NamespacePriorityConfig {
    /// Validate priority settings.
    ///
    /// # Errors
    ///
    /// Names the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.current_cluster.is_empty() {
            return Err("current_cluster must not be empty".into());
        }
        if self.critical_retry_attempts == 0 {
            return Err("critical_retry_attempts must be greater than 0".into());
        }
        self.weights.validate()
    }

    /// Retry delay as a duration.
    pub const fn rate_limit_retry_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_retry_delay_ms)
    }
}

/// Root configuration of a host scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Use the namespace priority scheduler; otherwise FIFO.
    pub enable_priority_scheduler: bool,
    /// Tasks a single channel may hold before `submit` blocks.
    pub channel_capacity: usize,
    /// Worker pool settings.
    pub processor: ProcessorConfig,
    /// Priority assignment and weights.
    pub priority: NamespacePriorityConfig,
    /// Dispatch budgets.
    pub rate_limit: RateLimitConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enable_priority_scheduler: true,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            processor: ProcessorConfig::default(),
            priority: NamespacePriorityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// The first invalid field, prefixed by its section.
    pub fn validate(&self) -> Result<(), String> {
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be greater than 0".into());
        }
        self.processor
            .validate()
            .map_err(|e| format!("processor invalid: {e}"))?;
        self.priority
            .validate()
            .map_err(|e| format!("priority invalid: {e}"))?;
        self.rate_limit
            .validate()
            .map_err(|e| format!("rate_limit invalid: {e}"))?;
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// A parse error or the first validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
