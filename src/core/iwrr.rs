//! Interleaved weighted round robin scheduling.
//!
//! Executables are grouped into channels by a [`ChannelKeyMapper`]. A single
//! dispatcher thread walks a cyclic sequence in which each channel appears as
//! many times as its weight, spread across rounds rather than in runs, and
//! hands the head of each non-empty channel to a [`Processor`].
//!
//! For weights `{B: 3, A: 1}` one cycle is `B A B B`: over any full cycle
//! channel `A` gets a quarter of the dispatch opportunities, and no channel
//! waits behind a contiguous burst of another.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_fair_scheduler::core::{
//!     InterleavedWeightedRoundRobinScheduler, IwrrSchedulerOptions, Scheduler,
//! };
//!
//! let scheduler = InterleavedWeightedRoundRobinScheduler::new(
//!     IwrrSchedulerOptions::new(
//!         Arc::new(|task: &MyTask| task.tenant.clone()),
//!         Arc::new(|tenant: &String| if tenant == "gold" { 3 } else { 1 }),
//!     ),
//!     processor,
//!     metrics,
//! )?;
//! scheduler.start();
//! scheduler.submit(task)?;
//! scheduler.stop();
//! ```

mod channel;

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::core::metrics::{
    MetricsHandler, CHANNEL_PENDING, DISPATCH_LATENCY, TASK_ABORTED, TASK_DEFERRED,
    TASK_DISPATCHED, TASK_SUBMITTED,
};
use crate::core::processor::{join_until, Processor, SubmitError, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::core::scheduler::{
    Scheduler, SchedulerState, ShutdownPolicy, StateCell, Submission,
};
use crate::core::{Executable, SchedulerError};

use channel::{ChannelSet, Pending, Selected};

/// Default number of tasks a single channel may hold.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
/// Default pause after every pending task was denied by the dispatch gate.
pub const DEFAULT_RATE_LIMIT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Bounds on a channel key.
pub trait ChannelKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<K> ChannelKey for K where K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Maps an executable to the key of its fairness channel.
///
/// Called on every submission; keep it cheap and side-effect free.
pub trait ChannelKeyMapper<T, K>: Send + Sync {
    /// Channel key of `executable`.
    fn channel_key(&self, executable: &T) -> K;
}

impl<T, K, F> ChannelKeyMapper<T, K> for F
where
    F: Fn(&T) -> K + Send + Sync,
{
    fn channel_key(&self, executable: &T) -> K {
        self(executable)
    }
}

/// Maps a channel key to its round-robin weight.
///
/// Consulted when a channel is created and at the start of every dispatch
/// cycle. A weight of 0 is treated as 1.
pub trait ChannelWeigher<K>: Send + Sync {
    /// Weight of channel `key`.
    fn weight(&self, key: &K) -> u32;
}

impl<K, F> ChannelWeigher<K> for F
where
    F: Fn(&K) -> u32 + Send + Sync,
{
    fn weight(&self, key: &K) -> u32 {
        self(key)
    }
}

/// Admission check run by the dispatcher before handing a task over.
///
/// A denied task goes back to the tail of its channel.
pub trait DispatchGate<T>: Send + Sync {
    /// Whether `executable` may be dispatched now.
    fn admit(&self, executable: &T) -> bool;

    /// Give back what a successful [`DispatchGate::admit`] took, when the
    /// task could not be handed over after all.
    fn refund(&self, _executable: &T) {}
}

/// Options of an [`InterleavedWeightedRoundRobinScheduler`].
pub struct IwrrSchedulerOptions<T, K> {
    /// Executable to channel key.
    pub key_mapper: Arc<dyn ChannelKeyMapper<T, K>>,
    /// Channel key to weight.
    pub weigher: Arc<dyn ChannelWeigher<K>>,
    /// Optional admission check on the dispatch path.
    pub gate: Option<Arc<dyn DispatchGate<T>>>,
    /// Tasks a single channel may hold before `submit` blocks.
    pub channel_capacity: usize,
    /// Fate of undispatched tasks on `stop`.
    pub shutdown_policy: ShutdownPolicy,
    /// How long `stop` waits for the dispatcher before detaching it.
    pub shutdown_timeout: Duration,
    /// Pause after every pending task was denied by the gate in a row.
    pub rate_limit_retry_delay: Duration,
}

impl<T, K> Clone for IwrrSchedulerOptions<T, K> {
    fn clone(&self) -> Self {
        Self {
            key_mapper: Arc::clone(&self.key_mapper),
            weigher: Arc::clone(&self.weigher),
            gate: self.gate.clone(),
            channel_capacity: self.channel_capacity,
            shutdown_policy: self.shutdown_policy,
            shutdown_timeout: self.shutdown_timeout,
            rate_limit_retry_delay: self.rate_limit_retry_delay,
        }
    }
}

impl<T, K> IwrrSchedulerOptions<T, K> {
    /// Options with default capacity, shutdown and retry settings.
    pub fn new(
        key_mapper: Arc<dyn ChannelKeyMapper<T, K>>,
        weigher: Arc<dyn ChannelWeigher<K>>,
    ) -> Self {
        Self {
            key_mapper,
            weigher,
            gate: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            shutdown_policy: ShutdownPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            rate_limit_retry_delay: DEFAULT_RATE_LIMIT_RETRY_DELAY,
        }
    }

    /// Install a dispatch gate.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn DispatchGate<T>>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Set the per-channel capacity.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
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

    /// Set the pause applied after a full round of gate denials.
    #[must_use]
    pub fn with_rate_limit_retry_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_retry_delay = delay;
        self
    }

    /// Fail fast on a zero channel capacity.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] naming the offending option.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.channel_capacity == 0 {
            return Err(SchedulerError::InvalidConfig(
                "channel_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

struct Inner<T, K> {
    options: IwrrSchedulerOptions<T, K>,
    processor: Arc<dyn Processor<T>>,
    state: StateCell,
    channels: Mutex<ChannelSet<T, K>>,
    /// Signalled on submission and on stop; the dispatcher waits on it.
    work: Condvar,
    /// Signalled when a channel slot frees up and on stop.
    space: Condvar,
    /// Accepted tasks not yet handed to the processor, including ones the
    /// dispatcher holds and fast-path submissions in progress.
    inflight: AtomicUsize,
    draining: AtomicBool,
    metrics: Arc<dyn MetricsHandler>,
}

/// Fair scheduler over weighted channels feeding a [`Processor`].
///
/// - Within a channel, tasks reach the processor in submission order.
/// - Each channel holds at most `channel_capacity` tasks; `submit` blocks and
///   `try_submit` returns [`Submission::Rejected`] while it is full.
/// - When nothing is queued or in flight, a running scheduler hands a
///   submission straight to the processor.
/// - Channels are created on first use and stay for the scheduler's lifetime.
pub struct InterleavedWeightedRoundRobinScheduler<T, K> {
    inner: Arc<Inner<T, K>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Executable, K: ChannelKey> InterleavedWeightedRoundRobinScheduler<T, K> {
    /// Create a scheduler feeding `processor`. The scheduler starts and stops
    /// the processor along with itself.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] if the options are invalid.
    pub fn new(
        options: IwrrSchedulerOptions<T, K>,
        processor: Arc<dyn Processor<T>>,
        metrics: Arc<dyn MetricsHandler>,
    ) -> Result<Self, SchedulerError> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                options,
                processor,
                state: StateCell::new(SchedulerState::Created),
                channels: Mutex::new(ChannelSet::new()),
                work: Condvar::new(),
                space: Condvar::new(),
                inflight: AtomicUsize::new(0),
                draining: AtomicBool::new(false),
                metrics,
            }),
            dispatcher: Mutex::new(None),
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.inner.state.load()
    }

    /// Tasks waiting in channels.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.channels.lock().pending()
    }

    /// Channels created so far.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().len()
    }

    fn enqueue(&self, executable: T, blocking: bool) -> Result<Submission<T>, SchedulerError> {
        let inner = &self.inner;
        if inner.state.load().is_closed() {
            return Err(inner.reject_closed(executable));
        }

        let executable = match inner.try_dispatch_directly(executable) {
            Ok(()) => {
                inner.metrics.counter(TASK_SUBMITTED, 1, &[]);
                return Ok(Submission::Accepted);
            }
            Err(DirectDispatch::Closed(executable)) => return Err(inner.reject_closed(executable)),
            Err(DirectDispatch::Skipped(executable)) => executable,
        };

        let key = inner.options.key_mapper.channel_key(&executable);
        let mut channels = inner.channels.lock();
        let channel = channels.channel_for(key, inner.options.weigher.as_ref());
        loop {
            if inner.state.load().is_closed() {
                drop(channels);
                return Err(inner.reject_closed(executable));
            }
            if channels.channel_len(channel) < inner.options.channel_capacity {
                break;
            }
            if !blocking {
                debug!(channel = ?channels.key_of(channel), "channel is full");
                return Ok(Submission::Rejected(executable));
            }
            inner.space.wait(&mut channels);
        }

        channels.push(channel, Pending::new(executable));
        inner.inflight.fetch_add(1, Ordering::AcqRel);
        drop(channels);
        inner.work.notify_one();
        inner.metrics.counter(TASK_SUBMITTED, 1, &[]);
        Ok(Submission::Accepted)
    }
}

enum DirectDispatch<T> {
    /// Not eligible or the processor had no room; go through a channel.
    Skipped(T),
    Closed(T),
}

impl<T: Executable, K: ChannelKey> Inner<T, K> {
    /// Hand `executable` straight to the processor when the scheduler is
    /// running with nothing queued or in flight.
    fn try_dispatch_directly(&self, executable: T) -> Result<(), DirectDispatch<T>> {
        if self.state.load() != SchedulerState::Running {
            return Err(DirectDispatch::Skipped(executable));
        }
        if self
            .inflight
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DirectDispatch::Skipped(executable));
        }

        let gate = self.options.gate.as_ref();
        if let Some(gate) = gate {
            if !gate.admit(&executable) {
                self.inflight.fetch_sub(1, Ordering::AcqRel);
                return Err(DirectDispatch::Skipped(executable));
            }
        }

        let result = match self.processor.try_submit(executable) {
            Ok(()) => {
                self.metrics
                    .counter(TASK_DISPATCHED, 1, &[("channel", "direct".to_string())]);
                Ok(())
            }
            Err(SubmitError::Full(executable)) => {
                if let Some(gate) = gate {
                    gate.refund(&executable);
                }
                Err(DirectDispatch::Skipped(executable))
            }
            Err(SubmitError::Closed(executable)) => Err(DirectDispatch::Closed(executable)),
        };
        self.inflight.fetch_sub(1, Ordering::AcqRel);
        result
    }

    fn reject_closed(&self, mut executable: T) -> SchedulerError {
        executable.abort();
        self.metrics.counter(TASK_ABORTED, 1, &[]);
        SchedulerError::Closed
    }

    fn run_dispatcher(&self) {
        debug!("dispatcher started");
        let weigher = self.options.weigher.as_ref();
        let mut denied_in_row = 0_usize;

        loop {
            let selected = {
                let mut channels = self.channels.lock();
                match self.wait_for_work(&mut channels, &mut denied_in_row) {
                    Some(()) => {
                        let selected = channels.select(weigher);
                        self.apply_weight_changes(&mut channels);
                        self.metrics
                            .gauge(CHANNEL_PENDING, channels.pending() as f64, &[]);
                        selected.map(|selected| {
                            let key = channels.key_of(selected.channel).clone();
                            (selected, key)
                        })
                    }
                    None => break,
                }
            };
            let Some((selected, key)) = selected else {
                continue;
            };
            self.space.notify_all();

            if let Some(gate) = self.options.gate.as_ref() {
                if !gate.admit(&selected.pending.executable) {
                    denied_in_row += 1;
                    self.metrics
                        .counter(TASK_DEFERRED, 1, &[("channel", format!("{key:?}"))]);
                    debug!(channel = ?key, "dispatch deferred by rate limiter");
                    self.channels.lock().requeue(selected);
                    continue;
                }
            }
            denied_in_row = 0;
            self.dispatch(&key, selected);
        }

        self.settle();
        debug!("dispatcher exiting");
    }

    /// Block until there is something to try. Returns `None` once stopping.
    fn wait_for_work(
        &self,
        channels: &mut MutexGuard<'_, ChannelSet<T, K>>,
        denied_in_row: &mut usize,
    ) -> Option<()> {
        loop {
            if self.state.load().is_closed() {
                return None;
            }
            let pending = channels.pending();
            if pending == 0 {
                self.work.wait(channels);
                continue;
            }
            if *denied_in_row >= pending {
                // Every pending task was denied in a row; pause until the
                // retry delay passes or something new arrives.
                self.work
                    .wait_for(channels, self.options.rate_limit_retry_delay);
                *denied_in_row = 0;
                continue;
            }
            return Some(());
        }
    }

    fn apply_weight_changes(&self, channels: &mut ChannelSet<T, K>) {
        let changes = channels.take_weight_changes();
        if changes.is_empty() {
            return;
        }
        let reconfiguring = self
            .state
            .transition(SchedulerState::Running, SchedulerState::Reconfiguring);
        for change in &changes {
            info!(channel = ?change.key, from = change.from, to = change.to, "channel weight changed");
        }
        if reconfiguring {
            self.state
                .transition(SchedulerState::Reconfiguring, SchedulerState::Running);
        }
    }

    fn dispatch(&self, key: &K, selected: Selected<T>) {
        let Selected { pending, .. } = selected;
        let latency = pending.enqueued_at.elapsed();
        match self.processor.submit(pending.executable) {
            Ok(()) => {
                let tags = [("channel", format!("{key:?}"))];
                self.metrics.counter(TASK_DISPATCHED, 1, &tags);
                self.metrics.timer(DISPATCH_LATENCY, latency, &tags);
            }
            Err(e) => {
                let mut executable = e.into_inner();
                if let Some(gate) = self.options.gate.as_ref() {
                    gate.refund(&executable);
                }
                warn!(channel = ?key, "processor refused dispatch, aborting task");
                executable.abort();
                self.metrics.counter(TASK_ABORTED, 1, &[]);
            }
        }
        self.inflight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Drain or abort whatever is left in the channels once stopping.
    fn settle(&self) {
        if self.draining.load(Ordering::Acquire) {
            let weigher = self.options.weigher.as_ref();
            let mut drained = 0_u64;
            loop {
                let next = {
                    let mut channels = self.channels.lock();
                    channels.select(weigher).map(|selected| {
                        let key = channels.key_of(selected.channel).clone();
                        (selected, key)
                    })
                };
                let Some((selected, key)) = next else {
                    break;
                };
                self.dispatch(&key, selected);
                drained += 1;
            }
            if drained > 0 {
                info!(drained, "channels drained into processor");
            }
        } else {
            self.abort_pending();
        }
    }

    fn abort_pending(&self) -> u64 {
        let drained = self.channels.lock().drain();
        let aborted = drained.len() as u64;
        for mut executable in drained {
            executable.abort();
            self.inflight.fetch_sub(1, Ordering::AcqRel);
        }
        if aborted > 0 {
            self.metrics.counter(TASK_ABORTED, aborted, &[]);
            info!(aborted, "pending tasks aborted");
        }
        aborted
    }

    fn signal_stop(&self) {
        // Taking the lock orders the state change before any waiter re-checks it.
        drop(self.channels.lock());
        self.work.notify_all();
        self.space.notify_all();
    }
}

impl<T: Executable, K: ChannelKey> Scheduler<T> for InterleavedWeightedRoundRobinScheduler<T, K> {
    fn start(&self) {
        let inner = &self.inner;
        if !inner
            .state
            .transition(SchedulerState::Created, SchedulerState::Started)
        {
            if inner.state.load().is_closed() {
                warn!("start called on a stopped scheduler, ignoring");
            }
            return;
        }

        inner.processor.start();

        let dispatcher_inner = Arc::clone(inner);
        match thread::Builder::new()
            .name("fair-dispatcher".into())
            .spawn(move || dispatcher_inner.run_dispatcher())
        {
            Ok(handle) => *self.dispatcher.lock() = Some(handle),
            Err(e) => error!(error = %e, "failed to spawn dispatcher thread"),
        }

        inner
            .state
            .transition(SchedulerState::Started, SchedulerState::Running);
        inner.work.notify_one();

        info!(
            channel_capacity = inner.options.channel_capacity,
            shutdown_policy = ?inner.options.shutdown_policy,
            pending = self.pending_count(),
            "interleaved weighted round robin scheduler started"
        );
    }

    fn stop(&self) {
        let inner = &self.inner;
        let Some(previous) = inner.state.begin_stop() else {
            return;
        };
        info!(policy = ?inner.options.shutdown_policy, "stopping scheduler");

        let drain = inner.options.shutdown_policy == ShutdownPolicy::Drain
            && previous != SchedulerState::Created;
        inner.draining.store(drain, Ordering::Release);
        inner.signal_stop();

        let deadline = Instant::now() + inner.options.shutdown_timeout;
        let dispatcher = self.dispatcher.lock().take();
        if drain {
            // The dispatcher flushes channels through a live processor first.
            if let Some(handle) = dispatcher {
                join_until(handle, deadline, "dispatcher");
            }
            inner.processor.stop();
        } else {
            // Stopping the processor first releases a dispatcher blocked on a
            // full intake.
            inner.processor.stop();
            if let Some(handle) = dispatcher {
                join_until(handle, deadline, "dispatcher");
            }
        }

        // Anything the dispatcher did not get to.
        inner.abort_pending();
        inner.state.store(SchedulerState::Stopped);
        info!("scheduler stopped");
    }

    fn submit(&self, executable: T) -> Result<(), SchedulerError> {
        match self.enqueue(executable, true)? {
            Submission::Accepted => Ok(()),
            // A blocking enqueue waits for space instead of rejecting.
            Submission::Rejected(executable) => Err(self.inner.reject_closed(executable)),
        }
    }

    fn try_submit(&self, executable: T) -> Result<Submission<T>, SchedulerError> {
        self.enqueue(executable, false)
    }
}

impl<T, K> Drop for InterleavedWeightedRoundRobinScheduler<T, K> {
    fn drop(&mut self) {
        // Release the dispatcher without joining; queued tasks are aborted by
        // the dispatcher on its way out.
        if self.inner.state.begin_stop().is_some() {
            drop(self.inner.channels.lock());
            self.inner.work.notify_all();
            self.inner.space.notify_all();
        }
    }
}
