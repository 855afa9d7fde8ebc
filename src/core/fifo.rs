//! Submission-order scheduling for host-level worker pools.

use std::sync::Arc;
use std::time::Duration;

use crate::config::dynamic::DynamicProperty;
use crate::core::iwrr::{
    InterleavedWeightedRoundRobinScheduler, IwrrSchedulerOptions, DEFAULT_CHANNEL_CAPACITY,
};
use crate::core::metrics::MetricsHandler;
use crate::core::processor::{
    ParallelProcessor, ParallelProcessorOptions, Processor, DEFAULT_SHUTDOWN_TIMEOUT,
};
use crate::core::scheduler::{Scheduler, SchedulerState, ShutdownPolicy, Submission};
use crate::core::{Executable, SchedulerError};

/// Weight of the single FIFO channel. Irrelevant with one channel, kept for
/// metric parity with weighted schedulers.
pub const FIFO_SCHEDULER_DEFAULT_WEIGHT: u32 = 100;
/// Key of the single FIFO channel.
pub const FIFO_SCHEDULER_CHANNEL_KEY: u8 = 0;

/// Options of a [`FifoScheduler`].
#[derive(Clone)]
pub struct FifoSchedulerOptions {
    /// Live worker count of the underlying processor.
    pub worker_count: Arc<dyn DynamicProperty<usize>>,
    /// Processor intake capacity.
    pub queue_size: usize,
    /// Tasks the channel may hold before `submit` blocks.
    pub channel_capacity: usize,
    /// Fate of undispatched tasks on `stop`.
    pub shutdown_policy: ShutdownPolicy,
    /// How long `stop` waits for threads before detaching them.
    pub shutdown_timeout: Duration,
}

impl FifoSchedulerOptions {
    /// Options with default capacity and shutdown settings.
    pub fn new(worker_count: Arc<dyn DynamicProperty<usize>>, queue_size: usize) -> Self {
        Self {
            worker_count,
            queue_size,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            shutdown_policy: ShutdownPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Scheduler that dispatches tasks in submission order regardless of which
/// namespace they belong to.
///
/// A single-channel [`InterleavedWeightedRoundRobinScheduler`]: with one
/// channel the weighted sequence degenerates to plain FIFO.
pub struct FifoScheduler<T: Executable> {
    processor: Arc<ParallelProcessor<T>>,
    scheduler: InterleavedWeightedRoundRobinScheduler<T, u8>,
}

impl<T: Executable> FifoScheduler<T> {
    /// Create a scheduler with its own [`ParallelProcessor`].
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] for a zero worker count, queue size or
    /// channel capacity.
    pub fn new(
        options: FifoSchedulerOptions,
        metrics: Arc<dyn MetricsHandler>,
    ) -> Result<Self, SchedulerError> {
        let processor = Arc::new(ParallelProcessor::new(
            ParallelProcessorOptions::new(options.worker_count, options.queue_size)
                .with_shutdown_policy(options.shutdown_policy)
                .with_shutdown_timeout(options.shutdown_timeout),
            Arc::clone(&metrics),
        )?);

        let scheduler = InterleavedWeightedRoundRobinScheduler::new(
            IwrrSchedulerOptions::new(
                Arc::new(|_: &T| FIFO_SCHEDULER_CHANNEL_KEY),
                Arc::new(|_: &u8| FIFO_SCHEDULER_DEFAULT_WEIGHT),
            )
            .with_channel_capacity(options.channel_capacity)
            .with_shutdown_policy(options.shutdown_policy)
            .with_shutdown_timeout(options.shutdown_timeout),
            Arc::clone(&processor) as Arc<dyn Processor<T>>,
            metrics,
        )?;

        Ok(Self {
            processor,
            scheduler,
        })
    }

    /// Current lifecycle state, including worker-count reconfiguration.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.scheduler.state().with_processor(self.processor.state())
    }

    /// Tasks waiting to be dispatched.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_count()
    }
}

impl<T: Executable> Scheduler<T> for FifoScheduler<T> {
    fn start(&self) {
        self.scheduler.start();
    }

    fn stop(&self) {
        self.scheduler.stop();
    }

    fn submit(&self, executable: T) -> Result<(), SchedulerError> {
        self.scheduler.submit(executable)
    }

    fn try_submit(&self, executable: T) -> Result<Submission<T>, SchedulerError> {
        self.scheduler.try_submit(executable)
    }
}
