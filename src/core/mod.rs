//! Core scheduling abstractions, fair dispatch and worker pools.

pub mod error;
pub mod executable;
pub mod fifo;
pub mod iwrr;
pub mod metrics;
pub mod namespace;
pub mod namespace_priority;
pub mod priority;
pub mod processor;
pub mod rate_limiter;
pub mod scheduler;

pub use error::{AppResult, SchedulerError};
pub use executable::{Executable, NamespaceExecutable};
pub use fifo::{FifoScheduler, FifoSchedulerOptions};
pub use iwrr::{
    ChannelKey, ChannelKeyMapper, ChannelWeigher, DispatchGate,
    InterleavedWeightedRoundRobinScheduler, IwrrSchedulerOptions,
};
pub use metrics::{InMemoryMetricsHandler, MetricsHandler, NoopMetricsHandler};
pub use namespace::{InMemoryNamespaceRegistry, NamespaceEntry, NamespaceRegistry, RegistryError};
pub use namespace_priority::{
    NamespacePriorityKey, NamespacePriorityScheduler, NamespacePrioritySchedulerOptions,
    NamespaceRateLimitGate,
};
pub use priority::{
    NamespacePriorityAssigner, PriorityAssigner, PriorityAssignerOptions, PriorityWeights,
    TaskPriority,
};
pub use processor::{
    ParallelProcessor, ParallelProcessorOptions, Processor, ProcessorStats, SubmitError,
};
pub use rate_limiter::{
    host_rate_limiter, operation_rate_limiter, MultiStageRateLimiter, NamespaceRateLimiters,
    RateLimiter, TokenBucketRateLimiter,
};
pub use scheduler::{Scheduler, SchedulerState, ShutdownPolicy, Submission};
