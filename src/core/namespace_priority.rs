//! Namespace-aware priority scheduling with rate limiting.
//!
//! Wraps an [`InterleavedWeightedRoundRobinScheduler`] whose channels are
//! keyed by `(namespace, priority)`. The priority class comes from a
//! [`PriorityAssigner`] at submission; the channel weight comes from the
//! namespace's weight table, re-read live. Before a task is handed to the
//! processor the [`NamespaceRateLimitGate`] takes tokens from the host,
//! operation and namespace budgets; a denied task goes back to the tail of its
//! channel.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::dynamic::{DynamicProperty, NamespaceProperty};
use crate::core::iwrr::{
    DispatchGate, InterleavedWeightedRoundRobinScheduler, IwrrSchedulerOptions,
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_RATE_LIMIT_RETRY_DELAY,
};
use crate::core::metrics::MetricsHandler;
use crate::core::namespace::NamespaceRegistry;
use crate::core::priority::{PriorityAssigner, PriorityWeights, TaskPriority};
use crate::core::processor::{
    ParallelProcessor, ParallelProcessorOptions, Processor, DEFAULT_SHUTDOWN_TIMEOUT,
};
use crate::core::rate_limiter::{NamespaceRateLimiters, RateLimiter};
use crate::core::scheduler::{Scheduler, SchedulerState, ShutdownPolicy, Submission};
use crate::core::{NamespaceExecutable, SchedulerError};

/// Channel key of the namespace priority scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacePriorityKey {
    /// Namespace the channel's tasks target.
    pub namespace_id: String,
    /// Priority class of the channel's tasks.
    pub priority: TaskPriority,
}

/// Options of a [`NamespacePriorityScheduler`].
#[derive(Clone)]
pub struct NamespacePrioritySchedulerOptions {
    /// Live worker count of the underlying processor.
    pub worker_count: Arc<dyn DynamicProperty<usize>>,
    /// Processor intake capacity.
    pub queue_size: usize,
    /// Weight table per namespace name, re-read at every dispatch cycle.
    pub namespace_weights: Arc<dyn NamespaceProperty<PriorityWeights>>,
    /// Weight table used when the namespace cannot be resolved.
    pub default_weights: PriorityWeights,
    /// Tasks a single channel may hold before `submit` blocks.
    pub channel_capacity: usize,
    /// Fate of undispatched tasks on `stop`.
    pub shutdown_policy: ShutdownPolicy,
    /// How long `stop` waits for threads before detaching them.
    pub shutdown_timeout: Duration,
    /// Pause after every pending task was denied a token in a row.
    pub rate_limit_retry_delay: Duration,
}

impl NamespacePrioritySchedulerOptions {
    /// Options with default weights, capacity and shutdown settings.
    pub fn new(
        worker_count: Arc<dyn DynamicProperty<usize>>,
        queue_size: usize,
        namespace_weights: Arc<dyn NamespaceProperty<PriorityWeights>>,
    ) -> Self {
        Self {
            worker_count,
            queue_size,
            namespace_weights,
            default_weights: PriorityWeights::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            shutdown_policy: ShutdownPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            rate_limit_retry_delay: DEFAULT_RATE_LIMIT_RETRY_DELAY,
        }
    }
}

/// Dispatch gate over the host/operation limiter and optional per-namespace
/// buckets.
///
/// Namespace budgets are keyed by namespace name; an unresolvable namespace
/// is budgeted under its id.
pub struct NamespaceRateLimitGate {
    limiter: Arc<dyn RateLimiter>,
    namespaces: Option<Arc<NamespaceRateLimiters>>,
    registry: Arc<dyn NamespaceRegistry>,
}

impl NamespaceRateLimitGate {
    /// Gate drawing from `limiter`, usually an operation limiter layered over
    /// the host limiter.
    pub fn new(limiter: Arc<dyn RateLimiter>, registry: Arc<dyn NamespaceRegistry>) -> Self {
        Self {
            limiter,
            namespaces: None,
            registry,
        }
    }

    /// Also require a token from the task's namespace bucket.
    #[must_use]
    pub fn with_namespace_limiters(mut self, namespaces: Arc<NamespaceRateLimiters>) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    fn namespace_bucket(&self, namespace_id: &str) -> String {
        self.registry
            .get_namespace_name(namespace_id)
            .unwrap_or_else(|_| namespace_id.to_string())
    }
}

impl<E: NamespaceExecutable> DispatchGate<E> for NamespaceRateLimitGate {
    fn admit(&self, executable: &E) -> bool {
        if !self.limiter.allow() {
            return false;
        }
        if let Some(namespaces) = &self.namespaces {
            let bucket = namespaces.limiter_for(&self.namespace_bucket(executable.namespace_id()));
            if !bucket.allow() {
                self.limiter.refund();
                return false;
            }
        }
        true
    }

    fn refund(&self, executable: &E) {
        self.limiter.refund();
        if let Some(namespaces) = &self.namespaces {
            namespaces
                .limiter_for(&self.namespace_bucket(executable.namespace_id()))
                .refund();
        }
    }
}

/// Scheduler that shares workers fairly across namespaces and priority
/// classes.
///
/// Each `(namespace, priority)` pair is a channel weighted by the namespace's
/// table entry for that priority, so within a namespace critical work gets
/// more turns than high, and high more than low.
pub struct NamespacePriorityScheduler<E: NamespaceExecutable> {
    assigner: Arc<dyn PriorityAssigner>,
    processor: Arc<ParallelProcessor<E>>,
    scheduler: InterleavedWeightedRoundRobinScheduler<E, NamespacePriorityKey>,
}

impl<E: NamespaceExecutable> NamespacePriorityScheduler<E> {
    /// Create a scheduler with its own [`ParallelProcessor`].
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] for a zero default weight, worker
    /// count, queue size or channel capacity.
    pub fn new(
        options: NamespacePrioritySchedulerOptions,
        assigner: Arc<dyn PriorityAssigner>,
        registry: Arc<dyn NamespaceRegistry>,
        gate: Option<NamespaceRateLimitGate>,
        metrics: Arc<dyn MetricsHandler>,
    ) -> Result<Self, SchedulerError> {
        options
            .default_weights
            .validate()
            .map_err(SchedulerError::InvalidConfig)?;

        let processor = Arc::new(ParallelProcessor::new(
            ParallelProcessorOptions::new(Arc::clone(&options.worker_count), options.queue_size)
                .with_shutdown_policy(options.shutdown_policy)
                .with_shutdown_timeout(options.shutdown_timeout),
            Arc::clone(&metrics),
        )?);

        let namespace_weights = Arc::clone(&options.namespace_weights);
        let default_weights = options.default_weights;
        let weigher = move |key: &NamespacePriorityKey| {
            let weights = match registry.get_namespace_name(&key.namespace_id) {
                Ok(name) => namespace_weights.value_for(&name),
                Err(e) => {
                    debug!(namespace_id = %key.namespace_id, error = %e, "using default weights");
                    default_weights
                }
            };
            weights.weight_of(key.priority)
        };

        let mut iwrr_options = IwrrSchedulerOptions::new(
            Arc::new(|executable: &E| NamespacePriorityKey {
                namespace_id: executable.namespace_id().to_string(),
                priority: executable.priority(),
            }),
            Arc::new(weigher),
        )
        .with_channel_capacity(options.channel_capacity)
        .with_shutdown_policy(options.shutdown_policy)
        .with_shutdown_timeout(options.shutdown_timeout)
        .with_rate_limit_retry_delay(options.rate_limit_retry_delay);
        if let Some(gate) = gate {
            iwrr_options = iwrr_options.with_gate(Arc::new(gate));
        }

        let scheduler = InterleavedWeightedRoundRobinScheduler::new(
            iwrr_options,
            Arc::clone(&processor) as Arc<dyn Processor<E>>,
            metrics,
        )?;

        Ok(Self {
            assigner,
            processor,
            scheduler,
        })
    }

    /// Current lifecycle state. Shows [`SchedulerState::Reconfiguring`] while
    /// either the dispatcher applies a weight change or the processor applies
    /// a worker-count change.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.scheduler.state().with_processor(self.processor.state())
    }

    /// Tasks waiting to be dispatched.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// `(namespace, priority)` channels created so far.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.scheduler.channel_count()
    }

    fn assign(&self, executable: &mut E) {
        let priority = self
            .assigner
            .assign(executable.namespace_id(), executable.attempt());
        executable.set_priority(priority);
    }
}

impl<E: NamespaceExecutable> Scheduler<E> for NamespacePriorityScheduler<E> {
    fn start(&self) {
        self.scheduler.start();
    }

    fn stop(&self) {
        self.scheduler.stop();
    }

    fn submit(&self, mut executable: E) -> Result<(), SchedulerError> {
        self.assign(&mut executable);
        self.scheduler.submit(executable)
    }

    fn try_submit(&self, mut executable: E) -> Result<Submission<E>, SchedulerError> {
        self.assign(&mut executable);
        self.scheduler.try_submit(executable)
    }
}
