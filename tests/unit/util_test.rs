//! Tests for utility functions

use prometheus_fair_scheduler::core::{SchedulerState, Submission, TaskPriority};
use prometheus_fair_scheduler::util::{init_tracing, Clock, ManualClock};
use std::time::Duration;

#[test]
fn test_manual_clock_clones_share_time() {
    let clock = ManualClock::new();
    let observer = clock.clone();
    let start = observer.now();

    clock.advance(Duration::from_millis(250));
    assert_eq!(observer.now() - start, Duration::from_millis(250));
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}

#[test]
fn test_state_predicates() {
    assert!(SchedulerState::Stopping.is_closed());
    assert!(SchedulerState::Stopped.is_closed());
    assert!(!SchedulerState::Created.is_closed());
    assert!(SchedulerState::Reconfiguring.is_running());
    assert!(!SchedulerState::Created.is_running());
}

#[test]
fn test_submission_accessors() {
    let accepted: Submission<u8> = Submission::Accepted;
    assert!(accepted.is_accepted());
    assert_eq!(accepted.into_rejected(), None);

    let rejected = Submission::Rejected(3_u8);
    assert!(!rejected.is_accepted());
    assert_eq!(rejected.into_rejected(), Some(3));
}

#[test]
fn test_priority_names() {
    assert_eq!(TaskPriority::Critical.to_string(), "critical");
    assert_eq!(TaskPriority::High.as_str(), "high");
    assert_eq!(TaskPriority::default(), TaskPriority::Low);
}
