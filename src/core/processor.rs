//! Worker pools that run executables handed over by a scheduler.
//!
//! A [`Processor`] is the downstream side of every scheduler: the scheduler
//! decides *which* executable goes next, the processor decides *when* a
//! worker runs it. [`ParallelProcessor`] is the production implementation:
//! a live-resizable set of dedicated OS threads draining a bounded intake.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_fair_scheduler::config::dynamic::StaticProperty;
//! use prometheus_fair_scheduler::core::{ParallelProcessor, ParallelProcessorOptions, Processor};
//!
//! let processor = ParallelProcessor::new(
//!     ParallelProcessorOptions::new(Arc::new(StaticProperty::new(4)), 256),
//!     metrics,
//! )?;
//! processor.start();
//! processor.submit(task)?;
//! processor.stop();
//! ```

mod parallel;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::dynamic::DynamicProperty;
use crate::core::scheduler::ShutdownPolicy;
use crate::core::SchedulerError;

pub use parallel::ParallelProcessor;
pub(crate) use parallel::join_until;

/// Default interval between worker-count reconciliations.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);
/// Default time `stop` waits for workers before detaching them.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors returned by processor submission. Both variants hand the
/// executable back to the caller.
pub enum SubmitError<T> {
    /// The intake is at capacity.
    Full(T),
    /// The processor is stopping or stopped.
    Closed(T),
}

impl<T> SubmitError<T> {
    /// Take back the rejected executable.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(executable) | Self::Closed(executable) => executable,
        }
    }
}

impl<T> fmt::Debug for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "Full(..)"),
            Self::Closed(_) => write!(f, "Closed(..)"),
        }
    }
}

impl<T> fmt::Display for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "processor intake is full"),
            Self::Closed(_) => write!(f, "processor has been shut down"),
        }
    }
}

impl<T> std::error::Error for SubmitError<T> {}

/// Downstream executor of dispatched executables.
pub trait Processor<T>: Send + Sync {
    /// Spawn workers. Idempotent; a no-op after `stop`.
    fn start(&self);

    /// Stop accepting work and settle the intake per the shutdown policy.
    fn stop(&self);

    /// Enqueue, blocking while the intake is full.
    ///
    /// # Errors
    ///
    /// [`SubmitError::Closed`] once the processor is stopping.
    fn submit(&self, executable: T) -> Result<(), SubmitError<T>>;

    /// Enqueue without blocking.
    ///
    /// # Errors
    ///
    /// [`SubmitError::Full`] when the intake is at capacity,
    /// [`SubmitError::Closed`] once the processor is stopping.
    fn try_submit(&self, executable: T) -> Result<(), SubmitError<T>>;
}

/// Options of a [`ParallelProcessor`].
#[derive(Clone)]
pub struct ParallelProcessorOptions {
    /// Live worker count; re-read every `reconcile_interval`.
    pub worker_count: Arc<dyn DynamicProperty<usize>>,
    /// Intake capacity.
    pub queue_size: usize,
    /// Fate of queued work on `stop`.
    pub shutdown_policy: ShutdownPolicy,
    /// How long `stop` waits for workers before detaching them.
    pub shutdown_timeout: Duration,
    /// Worker-count polling period.
    pub reconcile_interval: Duration,
    /// Stack size of worker threads, if not the platform default.
    pub thread_stack_size: Option<usize>,
}

impl ParallelProcessorOptions {
    /// Options with default shutdown and reconciliation settings.
    pub fn new(worker_count: Arc<dyn DynamicProperty<usize>>, queue_size: usize) -> Self {
        Self {
            worker_count,
            queue_size,
            shutdown_policy: ShutdownPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            thread_stack_size: None,
        }
    }

    /// Set the shutdown policy.
    #[must_use]
    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    /// Set the shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the worker-count polling period.
    #[must_use]
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Fail fast on non-positive sizes.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] naming the offending option.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_count.current_value() == 0 {
            return Err(SchedulerError::InvalidConfig(
                "worker_count must be greater than 0".into(),
            ));
        }
        if self.queue_size == 0 {
            return Err(SchedulerError::InvalidConfig(
                "queue_size must be greater than 0".into(),
            ));
        }
        if self.reconcile_interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "reconcile_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Statistics about processor utilization.
#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    /// Live worker threads.
    pub worker_count: usize,
    /// Executables waiting in the intake.
    pub queued_tasks: u64,
    /// Executables currently inside `execute`.
    pub active_tasks: u64,
    /// Executables accepted into the intake.
    pub submitted_tasks: u64,
    /// `execute` calls that returned `Ok`.
    pub completed_tasks: u64,
    /// `execute` calls that returned `Err` or panicked.
    pub failed_tasks: u64,
    /// Executables discarded with `abort`.
    pub aborted_tasks: u64,
}

/// Internal counters for processor statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct ProcessorCounters {
    pub queued_tasks: AtomicU64,
    pub active_tasks: AtomicU64,
    pub submitted_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub aborted_tasks: AtomicU64,
}

impl ProcessorCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> ProcessorStats {
        ProcessorStats {
            worker_count,
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            aborted_tasks: self.aborted_tasks.load(Ordering::Relaxed),
        }
    }
}
