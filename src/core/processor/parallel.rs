//! Native implementation of the worker pool using OS threads.
//!
//! Each worker is a dedicated OS thread with its own single-threaded tokio
//! runtime, so executables can await freely without stalling the caller's
//! runtime.
//!
//! # Design
//!
//! - **No polling on the hot path**: workers block in a crossbeam `select!` on
//!   the intake and their personal retire signal
//! - **Live resizing**: a reconciler thread re-reads the worker count every
//!   `reconcile_interval`, spawning workers or retiring the newest ones; a
//!   retired worker finishes its current executable and exits, queued work
//!   stays in the intake for the others
//! - **Shutdown without deadlock**: disconnecting the closing channel wakes
//!   blocked submitters, workers are joined against a deadline and detached
//!   if an `execute` call never returns

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Select, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

use crate::core::metrics::{
    MetricsHandler, TASK_ABORTED, TASK_EXECUTION_COMPLETED, TASK_EXECUTION_FAILED, WORKER_COUNT,
};
use crate::core::scheduler::{SchedulerState, ShutdownPolicy, StateCell};
use crate::core::{Executable, SchedulerError};

use super::{ParallelProcessorOptions, Processor, ProcessorCounters, ProcessorStats, SubmitError};

/// A live worker thread and the sender whose disconnection retires it.
struct Worker {
    id: usize,
    retire_tx: Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct WorkerSet {
    live: Vec<Worker>,
    /// Retired workers that may still be finishing an executable.
    retired: Vec<JoinHandle<()>>,
    next_id: usize,
}

struct Reconciler {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner<T: Executable> {
    options: ParallelProcessorOptions,
    intake_tx: Sender<T>,
    intake_rx: Receiver<T>,
    /// Never carries a message; dropping the sender wakes blocked submitters.
    closing_tx: Mutex<Option<Sender<()>>>,
    closing_rx: Receiver<()>,
    /// Submitters hold a read guard while enqueueing; shutdown takes the
    /// write guard so nothing lands in the intake after it is settled.
    admission: RwLock<()>,
    state: StateCell,
    draining: AtomicBool,
    workers: Mutex<WorkerSet>,
    reconciler: Mutex<Option<Reconciler>>,
    counters: ProcessorCounters,
    metrics: Arc<dyn MetricsHandler>,
}

/// Worker pool with dedicated OS threads and a bounded intake.
///
/// Implements [`Processor`]: `submit` blocks while the intake holds
/// `queue_size` executables, `try_submit` fails fast with
/// [`SubmitError::Full`]. The worker count follows
/// [`ParallelProcessorOptions::worker_count`] without a restart.
pub struct ParallelProcessor<T: Executable> {
    inner: Arc<Inner<T>>,
}

impl<T: Executable> ParallelProcessor<T> {
    /// Create a processor. Workers are spawned by [`Processor::start`].
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] if the options are invalid.
    pub fn new(
        options: ParallelProcessorOptions,
        metrics: Arc<dyn MetricsHandler>,
    ) -> Result<Self, SchedulerError> {
        options.validate()?;

        let (intake_tx, intake_rx) = bounded::<T>(options.queue_size);
        let (closing_tx, closing_rx) = bounded::<()>(0);

        Ok(Self {
            inner: Arc::new(Inner {
                options,
                intake_tx,
                intake_rx,
                closing_tx: Mutex::new(Some(closing_tx)),
                closing_rx,
                admission: RwLock::new(()),
                state: StateCell::new(SchedulerState::Created),
                draining: AtomicBool::new(false),
                workers: Mutex::new(WorkerSet::default()),
                reconciler: Mutex::new(None),
                counters: ProcessorCounters::default(),
                metrics,
            }),
        })
    }

    /// Get current processor statistics.
    #[must_use]
    pub fn stats(&self) -> ProcessorStats {
        let worker_count = self.inner.workers.lock().live.len();
        self.inner.counters.snapshot(worker_count)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.inner.state.load()
    }

    /// Re-read the worker count and converge to it now rather than at the
    /// next reconcile tick.
    pub fn reconcile(&self) {
        self.inner.reconcile();
    }
}

impl<T: Executable> Processor<T> for ParallelProcessor<T> {
    fn start(&self) {
        let inner = &self.inner;
        if !inner
            .state
            .transition(SchedulerState::Created, SchedulerState::Started)
        {
            if inner.state.load().is_closed() {
                warn!("start called on a stopped processor, ignoring");
            }
            return;
        }

        let initial = inner.options.worker_count.current_value().max(1);
        {
            let mut workers = inner.workers.lock();
            for _ in 0..initial {
                Inner::spawn_worker(inner, &mut workers);
            }
            inner.metrics.gauge(WORKER_COUNT, workers.live.len() as f64, &[]);
        }

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let reconciler_inner = Arc::clone(inner);
        match thread::Builder::new()
            .name("fair-reconciler".into())
            .spawn(move || run_reconciler(&reconciler_inner, &stop_rx))
        {
            Ok(handle) => *inner.reconciler.lock() = Some(Reconciler { stop_tx, handle }),
            Err(e) => error!(error = %e, "failed to spawn worker reconciler; worker count is fixed"),
        }

        inner
            .state
            .transition(SchedulerState::Started, SchedulerState::Running);

        info!(
            worker_count = initial,
            queue_size = inner.options.queue_size,
            shutdown_policy = ?inner.options.shutdown_policy,
            "parallel processor started"
        );
    }

    fn stop(&self) {
        self.inner.shutdown(true);
    }

    fn submit(&self, executable: T) -> Result<(), SubmitError<T>> {
        let inner = &self.inner;
        let _admission = inner.admission.read();
        if inner.state.load().is_closed() {
            return Err(SubmitError::Closed(executable));
        }

        inner.counters.queued_tasks.fetch_add(1, Ordering::Relaxed);

        // Block on whichever comes first: intake space or shutdown.
        let mut sel = Select::new();
        let send_idx = sel.send(&inner.intake_tx);
        let closing_idx = sel.recv(&inner.closing_rx);
        let oper = sel.select();
        let result = if oper.index() == send_idx {
            oper.send(&inner.intake_tx, executable)
                .map_err(|e| SubmitError::Closed(e.into_inner()))
        } else {
            debug_assert_eq!(oper.index(), closing_idx);
            let _ = oper.recv(&inner.closing_rx);
            Err(SubmitError::Closed(executable))
        };

        match result {
            Ok(()) => {
                inner.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                inner.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn try_submit(&self, executable: T) -> Result<(), SubmitError<T>> {
        let inner = &self.inner;
        let _admission = inner.admission.read();
        if inner.state.load().is_closed() {
            return Err(SubmitError::Closed(executable));
        }

        inner.counters.queued_tasks.fetch_add(1, Ordering::Relaxed);
        match inner.intake_tx.try_send(executable) {
            Ok(()) => {
                inner.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(executable)) => {
                inner.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                debug!("processor intake is full");
                Err(SubmitError::Full(executable))
            }
            Err(TrySendError::Disconnected(executable)) => {
                inner.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                Err(SubmitError::Closed(executable))
            }
        }
    }
}

impl<T: Executable> Drop for ParallelProcessor<T> {
    fn drop(&mut self) {
        // Signal shutdown but don't join workers here; explicit stop() is
        // required for graceful cleanup.
        if !self.inner.state.load().is_closed() {
            debug!("ParallelProcessor dropped without explicit stop - workers will be detached");
            self.inner.shutdown(false);
        }
    }
}

impl<T: Executable> Inner<T> {
    fn spawn_worker(this: &Arc<Self>, workers: &mut WorkerSet) {
        let worker_id = workers.next_id;
        workers.next_id += 1;

        let (retire_tx, retire_rx) = bounded::<()>(0);
        let inner = Arc::clone(this);
        let mut builder = thread::Builder::new().name(format!("fair-worker-{worker_id}"));
        if let Some(stack_size) = this.options.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }

        match builder.spawn(move || inner.run_worker(worker_id, &retire_rx)) {
            Ok(handle) => workers.live.push(Worker {
                id: worker_id,
                retire_tx,
                handle,
            }),
            Err(e) => error!(worker_id, error = %e, "failed to spawn worker thread"),
        }
    }

    fn run_worker(&self, worker_id: usize, retire_rx: &Receiver<()>) {
        debug!(worker_id, "worker thread started");

        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!(worker_id, error = %e, "failed to create worker runtime");
                return;
            }
        };

        loop {
            select! {
                recv(self.intake_rx) -> msg => match msg {
                    Ok(executable) if self.aborting() => self.abort_one(executable),
                    Ok(executable) => self.execute(&rt, worker_id, executable),
                    Err(_) => break,
                },
                recv(retire_rx) -> _ => break,
            }
        }

        if self.draining.load(Ordering::Acquire) {
            while let Ok(executable) = self.intake_rx.try_recv() {
                self.execute(&rt, worker_id, executable);
            }
        }

        debug!(worker_id, "worker thread exiting");
    }

    /// Work picked up after an aborting shutdown began is not started.
    fn aborting(&self) -> bool {
        self.options.shutdown_policy == ShutdownPolicy::Abort && self.state.load().is_closed()
    }

    fn abort_one(&self, mut executable: T) {
        self.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
        executable.abort();
        self.counters.aborted_tasks.fetch_add(1, Ordering::Relaxed);
        self.metrics.counter(TASK_ABORTED, 1, &[]);
    }

    fn execute(&self, rt: &Runtime, worker_id: usize, mut executable: T) {
        self.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
        self.counters.active_tasks.fetch_add(1, Ordering::Relaxed);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| rt.block_on(executable.execute())));
        match outcome {
            Ok(Ok(())) => {
                self.counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
                self.metrics.counter(TASK_EXECUTION_COMPLETED, 1, &[]);
            }
            Ok(Err(e)) => {
                debug!(worker_id, error = %e, "executable failed");
                self.counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
                self.metrics.counter(TASK_EXECUTION_FAILED, 1, &[]);
            }
            Err(_) => {
                error!(worker_id, "executable panicked");
                self.counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
                self.metrics.counter(TASK_EXECUTION_FAILED, 1, &[]);
            }
        }

        self.counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
    }

    fn reconcile(self: &Arc<Self>) {
        let desired = self.options.worker_count.current_value();
        if desired == 0 {
            warn!("worker count of 0 ignored, keeping current workers");
            return;
        }

        let mut workers = self.workers.lock();
        workers.live.retain(|worker| {
            let finished = worker.handle.is_finished();
            if finished {
                warn!(worker_id = worker.id, "worker exited unexpectedly");
            }
            !finished
        });
        workers.retired.retain(|handle| !handle.is_finished());

        let current = workers.live.len();
        if current == desired {
            return;
        }
        if !self
            .state
            .transition(SchedulerState::Running, SchedulerState::Reconfiguring)
        {
            return;
        }

        if desired > current {
            for _ in current..desired {
                Self::spawn_worker(self, &mut workers);
            }
        } else {
            for _ in desired..current {
                if let Some(Worker { id, retire_tx, handle }) = workers.live.pop() {
                    drop(retire_tx);
                    debug!(worker_id = id, "worker retired");
                    workers.retired.push(handle);
                }
            }
        }

        let live = workers.live.len();
        drop(workers);
        self.metrics.gauge(WORKER_COUNT, live as f64, &[]);
        info!(from = current, to = live, "worker count reconciled");

        self.state
            .transition(SchedulerState::Reconfiguring, SchedulerState::Running);
    }

    fn shutdown(&self, join: bool) {
        let Some(previous) = self.state.begin_stop() else {
            return;
        };
        info!(policy = ?self.options.shutdown_policy, "stopping parallel processor");

        // Wake blocked submitters, then wait for in-flight submissions to leave.
        self.closing_tx.lock().take();
        drop(self.admission.write());

        let deadline = Instant::now() + self.options.shutdown_timeout;

        if let Some(Reconciler { stop_tx, handle }) = self.reconciler.lock().take() {
            drop(stop_tx);
            if join {
                join_until(handle, deadline, "reconciler");
            }
        }

        let drain = self.options.shutdown_policy == ShutdownPolicy::Drain
            && previous != SchedulerState::Created;
        self.draining.store(drain, Ordering::Release);

        let (live, retired) = {
            let mut workers = self.workers.lock();
            (
                std::mem::take(&mut workers.live),
                std::mem::take(&mut workers.retired),
            )
        };
        let worker_count = live.len();
        let mut handles = retired;
        for Worker { retire_tx, handle, .. } in live {
            drop(retire_tx);
            handles.push(handle);
        }
        if join {
            for handle in handles {
                join_until(handle, deadline, "worker");
            }
        }

        let aborted = self.abort_queued();
        self.metrics.gauge(WORKER_COUNT, 0.0, &[]);
        self.state.store(SchedulerState::Stopped);
        info!(worker_count, aborted, "parallel processor stopped");
    }

    fn abort_queued(&self) -> u64 {
        let mut aborted = 0;
        while let Ok(mut executable) = self.intake_rx.try_recv() {
            self.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
            executable.abort();
            aborted += 1;
        }
        if aborted > 0 {
            self.counters
                .aborted_tasks
                .fetch_add(aborted, Ordering::Relaxed);
            self.metrics.counter(TASK_ABORTED, aborted, &[]);
        }
        aborted
    }
}

fn run_reconciler<T: Executable>(inner: &Arc<Inner<T>>, stop_rx: &Receiver<()>) {
    let interval = inner.options.reconcile_interval;
    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => inner.reconcile(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("worker reconciler exiting");
}

/// Join `handle` unless `deadline` passes first, in which case the thread is
/// detached.
pub(crate) fn join_until(handle: JoinHandle<()>, deadline: Instant, what: &'static str) {
    let (tx, rx) = bounded::<bool>(1);
    let joiner = thread::Builder::new()
        .name("fair-joiner".into())
        .spawn(move || {
            let _ = tx.send(handle.join().is_ok());
        });
    if let Err(e) = joiner {
        warn!(thread = what, error = %e, "failed to spawn joiner, detaching thread");
        return;
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining.max(Duration::from_millis(1))) {
        Ok(true) => debug!(thread = what, "thread joined"),
        Ok(false) => warn!(thread = what, "thread panicked"),
        Err(_) => warn!(thread = what, "thread did not exit before the shutdown deadline - detaching"),
    }
}
