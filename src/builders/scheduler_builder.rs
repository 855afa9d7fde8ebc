//! Builders to construct host schedulers from configuration.
//!
//! Static configuration provides the defaults; every reloadable value is read
//! through a [`DynamicConfig`] property under its `scheduler.*` key, so a live
//! configuration client can retune a running scheduler.

use std::sync::Arc;

use tracing::info;

use crate::config::dynamic::{
    DynamicConfig, CRITICAL_RETRY_ATTEMPTS_KEY, MAX_POLL_HOST_RPS_KEY, MAX_POLL_RPS_KEY,
    NAMESPACE_MAX_RPS_KEY, PERSISTENCE_MAX_QPS_KEY, ROUND_ROBIN_WEIGHTS_KEY, WORKER_COUNT_KEY,
};
use crate::config::{ProcessorConfig, SchedulerConfig};
use crate::core::fifo::{FifoScheduler, FifoSchedulerOptions};
use crate::core::metrics::MetricsHandler;
use crate::core::namespace::NamespaceRegistry;
use crate::core::namespace_priority::{
    NamespacePriorityScheduler, NamespacePrioritySchedulerOptions, NamespaceRateLimitGate,
};
use crate::core::priority::{NamespacePriorityAssigner, PriorityAssignerOptions};
use crate::core::processor::{ParallelProcessor, ParallelProcessorOptions};
use crate::core::rate_limiter::{
    host_rate_limiter, operation_rate_limiter, NamespaceRateLimiters, RateLimiter,
};
use crate::core::scheduler::Scheduler;
use crate::core::{Executable, NamespaceExecutable, SchedulerError};
use crate::util::clock::SystemClock;

fn validated(cfg: &SchedulerConfig) -> Result<(), SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))
}

/// Build a standalone worker pool.
///
/// # Errors
///
/// [`SchedulerError::InvalidConfig`] if the processor settings are invalid.
pub fn build_processor<T: Executable>(
    cfg: &ProcessorConfig,
    dynamic: &DynamicConfig,
    metrics: Arc<dyn MetricsHandler>,
) -> Result<ParallelProcessor<T>, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidConfig(format!("processor invalid: {e}")))?;
    let options = ParallelProcessorOptions::new(
        dynamic.int_property(WORKER_COUNT_KEY, cfg.worker_count),
        cfg.queue_size,
    )
    .with_shutdown_policy(cfg.shutdown_policy)
    .with_shutdown_timeout(cfg.shutdown_timeout())
    .with_reconcile_interval(cfg.reconcile_interval());
    ParallelProcessor::new(options, metrics)
}

/// Build a FIFO scheduler.
///
/// # Errors
///
/// [`SchedulerError::InvalidConfig`] if the configuration is invalid.
pub fn build_fifo_scheduler<T: Executable>(
    cfg: &SchedulerConfig,
    dynamic: &DynamicConfig,
    metrics: Arc<dyn MetricsHandler>,
) -> Result<FifoScheduler<T>, SchedulerError> {
    validated(cfg)?;
    let options = FifoSchedulerOptions {
        channel_capacity: cfg.channel_capacity,
        shutdown_policy: cfg.processor.shutdown_policy,
        shutdown_timeout: cfg.processor.shutdown_timeout(),
        ..FifoSchedulerOptions::new(
            dynamic.int_property(WORKER_COUNT_KEY, cfg.processor.worker_count),
            cfg.processor.queue_size,
        )
    };
    FifoScheduler::new(options, metrics)
}

/// Build the host-wide limiter shared by every queue processor on the host.
pub fn build_host_rate_limiter(cfg: &SchedulerConfig, dynamic: &DynamicConfig) -> Arc<dyn RateLimiter> {
    host_rate_limiter(
        dynamic.float_property(MAX_POLL_HOST_RPS_KEY, cfg.rate_limit.max_poll_host_rps),
        dynamic.float_property(PERSISTENCE_MAX_QPS_KEY, cfg.rate_limit.persistence_max_qps),
        Arc::new(SystemClock),
    )
}

/// Build a namespace priority scheduler drawing from `host_limiter`.
///
/// # Errors
///
/// [`SchedulerError::InvalidConfig`] if the configuration is invalid.
pub fn build_namespace_priority_scheduler<E: NamespaceExecutable>(
    cfg: &SchedulerConfig,
    dynamic: &DynamicConfig,
    registry: Arc<dyn NamespaceRegistry>,
    host_limiter: Arc<dyn RateLimiter>,
    metrics: Arc<dyn MetricsHandler>,
) -> Result<NamespacePriorityScheduler<E>, SchedulerError> {
    validated(cfg)?;

    let assigner = Arc::new(NamespacePriorityAssigner::new(
        cfg.priority.current_cluster.clone(),
        Arc::clone(&registry),
        PriorityAssignerOptions {
            critical_retry_attempts: dynamic
                .int_property(CRITICAL_RETRY_ATTEMPTS_KEY, cfg.priority.critical_retry_attempts),
        },
        Arc::clone(&metrics),
    ));

    let operation = operation_rate_limiter(
        host_limiter,
        dynamic.float_property(MAX_POLL_RPS_KEY, cfg.rate_limit.max_poll_rps),
        Arc::new(SystemClock),
    );
    let namespaces = Arc::new(NamespaceRateLimiters::new(
        dynamic.namespace_property(NAMESPACE_MAX_RPS_KEY, cfg.rate_limit.namespace_max_rps),
    ));
    let gate = NamespaceRateLimitGate::new(operation, Arc::clone(&registry))
        .with_namespace_limiters(namespaces);

    let options = NamespacePrioritySchedulerOptions {
        default_weights: cfg.priority.weights,
        channel_capacity: cfg.channel_capacity,
        shutdown_policy: cfg.processor.shutdown_policy,
        shutdown_timeout: cfg.processor.shutdown_timeout(),
        rate_limit_retry_delay: cfg.priority.rate_limit_retry_delay(),
        ..NamespacePrioritySchedulerOptions::new(
            dynamic.int_property(WORKER_COUNT_KEY, cfg.processor.worker_count),
            cfg.processor.queue_size,
            dynamic.namespace_property(ROUND_ROBIN_WEIGHTS_KEY, cfg.priority.weights),
        )
    };

    NamespacePriorityScheduler::new(options, assigner, registry, Some(gate), metrics)
}

/// Build the host scheduler: namespace priority when
/// `enable_priority_scheduler` is set, FIFO otherwise.
///
/// # Errors
///
/// [`SchedulerError::InvalidConfig`] if the configuration is invalid.
pub fn build_host_scheduler<E: NamespaceExecutable>(
    cfg: &SchedulerConfig,
    dynamic: &DynamicConfig,
    registry: Arc<dyn NamespaceRegistry>,
    metrics: Arc<dyn MetricsHandler>,
) -> Result<Arc<dyn Scheduler<E>>, SchedulerError> {
    if cfg.enable_priority_scheduler {
        let host_limiter = build_host_rate_limiter(cfg, dynamic);
        let scheduler =
            build_namespace_priority_scheduler(cfg, dynamic, registry, host_limiter, metrics)?;
        info!(cluster = %cfg.priority.current_cluster, "built namespace priority host scheduler");
        Ok(Arc::new(scheduler))
    } else {
        let scheduler = build_fifo_scheduler(cfg, dynamic, metrics)?;
        info!("built fifo host scheduler");
        Ok(Arc::new(scheduler))
    }
}
