//! The unit-of-work contract handed to schedulers.

use async_trait::async_trait;

use crate::core::priority::TaskPriority;
use crate::core::AppResult;

/// A unit of schedulable work.
///
/// The scheduler owns an executable from submission until a worker picks it
/// up, and the worker owns it for the duration of [`Executable::execute`].
/// Failures and retries are the executable's own business: the scheduler calls
/// `execute` exactly once per dispatch and treats the call as complete whatever
/// it returns.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_fair_scheduler::core::{AppResult, Executable};
///
/// struct Ack { tenant: String }
///
/// #[async_trait]
/// impl Executable for Ack {
///     async fn execute(&mut self) -> AppResult<()> {
///         println!("acked task for {}", self.tenant);
///         Ok(())
///     }
///
///     fn abort(&mut self) {}
/// }
/// ```
///
/// # Threading
///
/// On worker threads `execute` runs on a dedicated single-threaded tokio
/// runtime, so it may await timers and other tokio primitives freely.
#[async_trait]
pub trait Executable: Send + 'static {
    /// Perform the work.
    async fn execute(&mut self) -> AppResult<()>;

    /// Called instead of `execute` when the scheduler discards the executable,
    /// e.g. on shutdown or submission to a closed scheduler.
    fn abort(&mut self);
}

/// An executable that belongs to a namespace and carries its retry history.
///
/// The namespace priority scheduler derives the fairness key and weight of
/// these from the namespace and attempt count, and records the priority class
/// it assigned.
pub trait NamespaceExecutable: Executable {
    /// Identifier of the namespace the task targets.
    fn namespace_id(&self) -> &str;

    /// Number of times this task has been attempted so far.
    fn attempt(&self) -> u32;

    /// Priority class assigned at submission.
    fn priority(&self) -> TaskPriority;

    /// Record the priority class chosen by the assigner.
    fn set_priority(&mut self, priority: TaskPriority);
}
