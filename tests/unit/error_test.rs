//! Tests for error types

use prometheus_fair_scheduler::core::{RegistryError, SchedulerError, SubmitError};

#[test]
fn test_closed_error() {
    let err = SchedulerError::Closed;
    assert_eq!(format!("{}", err), "scheduler is closed");
}

#[test]
fn test_invalid_config_error() {
    let err = SchedulerError::InvalidConfig("queue_size must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: queue_size must be greater than 0"
    );
}

#[test]
fn test_submit_error_hands_back_executable() {
    let full = SubmitError::Full(7_u32);
    assert_eq!(format!("{}", full), "processor intake is full");
    assert_eq!(format!("{:?}", full), "Full(..)");
    assert_eq!(full.into_inner(), 7);

    let closed = SubmitError::Closed("task");
    assert_eq!(format!("{}", closed), "processor has been shut down");
    assert_eq!(closed.into_inner(), "task");
}

#[test]
fn test_registry_error() {
    let err = RegistryError::NotFound("ns-1".to_string());
    assert_eq!(format!("{}", err), "namespace not found: ns-1");

    let err = RegistryError::Unavailable("ns-2".to_string());
    assert_eq!(format!("{}", err), "namespace registry unavailable: ns-2");
}
