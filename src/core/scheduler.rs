//! The scheduler capability shared by every scheduler in this crate.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::{Executable, SchedulerError};

/// Outcome of a non-blocking submission.
///
/// `Rejected` is backpressure, not an error: the caller gets its executable
/// back and decides whether to retry, drop or re-route it.
#[must_use = "a rejected executable is handed back and must be dealt with"]
pub enum Submission<T> {
    /// The executable was accepted and will be dispatched.
    Accepted,
    /// Downstream capacity is saturated; the executable is returned untouched.
    Rejected(T),
}

impl<T> Submission<T> {
    /// Whether the executable was accepted.
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Take back a rejected executable.
    pub fn into_rejected(self) -> Option<T> {
        match self {
            Self::Accepted => None,
            Self::Rejected(executable) => Some(executable),
        }
    }
}

impl<T> fmt::Debug for Submission<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "Accepted"),
            Self::Rejected(_) => write!(f, "Rejected(..)"),
        }
    }
}

/// Lifecycle and submission API of a scheduler.
///
/// `submit` and `try_submit` are safe to call from any number of producer
/// threads. `stop` may be called from a different thread than `start` and is
/// idempotent. Once stopped, every submission aborts the executable and
/// returns [`SchedulerError::Closed`].
pub trait Scheduler<T: Executable>: Send + Sync {
    /// Begin dispatching. Idempotent; a no-op after `stop`.
    fn start(&self);

    /// Stop dispatching and settle pending work per the shutdown policy.
    fn stop(&self);

    /// Enqueue an executable, blocking while downstream capacity is exhausted.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Closed`] if the scheduler is stopping or stopped.
    fn submit(&self, executable: T) -> Result<(), SchedulerError>;

    /// Enqueue an executable without blocking.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Closed`] if the scheduler is stopping or stopped.
    fn try_submit(&self, executable: T) -> Result<Submission<T>, SchedulerError>;
}

/// What happens to accepted-but-unexecuted work on shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Dispatch and execute everything already accepted before exiting.
    Drain,
    /// Call `abort` on everything not yet executing.
    #[default]
    Abort,
}

/// Lifecycle state of a scheduler or processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, not yet started. Submissions queue up.
    Created,
    /// `start` was called; the dispatch loop has not picked up yet.
    Started,
    /// Dispatching with a settled configuration.
    Running,
    /// Applying a worker-count or weight change; exits on its own once the
    /// change is in place. Weight changes are applied by the dispatcher at a
    /// cycle boundary, worker-count changes by the processor.
    Reconfiguring,
    /// `stop` is settling pending work.
    Stopping,
    /// Terminal.
    Stopped,
}

impl SchedulerState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Started => 1,
            Self::Running => 2,
            Self::Reconfiguring => 3,
            Self::Stopping => 4,
            Self::Stopped => 5,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Running,
            3 => Self::Reconfiguring,
            4 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    /// Whether submissions are refused in this state.
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }

    /// Whether the dispatch loop is live.
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Started | Self::Running | Self::Reconfiguring)
    }

    /// State of a scheduler that owns a processor: a running scheduler is
    /// reconfiguring while its processor is.
    #[must_use]
    pub const fn with_processor(self, processor: Self) -> Self {
        match (self, processor) {
            (Self::Running, Self::Reconfiguring) => Self::Reconfiguring,
            _ => self,
        }
    }
}

/// Atomic cell holding a [`SchedulerState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new(state: SchedulerState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn load(&self) -> SchedulerState {
        SchedulerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: SchedulerState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    /// Move from `from` to `to`; returns false if the current state differs.
    pub(crate) fn transition(&self, from: SchedulerState, to: SchedulerState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter `Stopping` from any live state. Returns the previous state, or
    /// `None` if the cell was already stopping or stopped.
    pub(crate) fn begin_stop(&self) -> Option<SchedulerState> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let state = SchedulerState::from_u8(current);
            if state.is_closed() {
                return None;
            }
            match self.0.compare_exchange_weak(
                current,
                SchedulerState::Stopping.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(state),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_begin_stop_once() {
        let cell = StateCell::new(SchedulerState::Running);
        assert_eq!(cell.begin_stop(), Some(SchedulerState::Running));
        assert_eq!(cell.load(), SchedulerState::Stopping);
        assert_eq!(cell.begin_stop(), None);
    }

    #[test]
    fn test_state_cell_transition_requires_expected_state() {
        let cell = StateCell::new(SchedulerState::Created);
        assert!(!cell.transition(SchedulerState::Running, SchedulerState::Reconfiguring));
        assert!(cell.transition(SchedulerState::Created, SchedulerState::Started));
        assert_eq!(cell.load(), SchedulerState::Started);
    }

    #[test]
    fn test_processor_reconfiguring_shows_through() {
        use SchedulerState::{Created, Reconfiguring, Running, Stopping};

        assert_eq!(Running.with_processor(Reconfiguring), Reconfiguring);
        assert_eq!(Running.with_processor(Running), Running);
        assert_eq!(Reconfiguring.with_processor(Running), Reconfiguring);
        // Lifecycle edges belong to the scheduler.
        assert_eq!(Stopping.with_processor(Reconfiguring), Stopping);
        assert_eq!(Created.with_processor(Reconfiguring), Created);
    }

    #[test]
    fn test_submission_helpers() {
        let accepted: Submission<u32> = Submission::Accepted;
        assert!(accepted.is_accepted());
        assert!(accepted.into_rejected().is_none());

        let rejected = Submission::Rejected(7_u32);
        assert!(!rejected.is_accepted());
        assert_eq!(format!("{rejected:?}"), "Rejected(..)");
        assert_eq!(rejected.into_rejected(), Some(7));
    }
}
