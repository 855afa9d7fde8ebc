//! Tests for configuration validation

use prometheus_fair_scheduler::config::env::{apply_overrides, load_from_file};
use prometheus_fair_scheduler::config::{
    NamespacePriorityConfig, ProcessorConfig, RateLimitConfig, SchedulerConfig,
};
use prometheus_fair_scheduler::core::{PriorityWeights, ShutdownPolicy};
use std::collections::BTreeMap;
use std::time::Duration;

#[test]
fn test_scheduler_config_defaults() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert!(cfg.enable_priority_scheduler);
    assert_eq!(cfg.processor.shutdown_policy, ShutdownPolicy::Abort);
    assert_eq!(cfg.priority.current_cluster, "active");
    assert_eq!(cfg.priority.critical_retry_attempts, 10);
    assert_eq!(cfg.priority.weights, PriorityWeights::default());
}

#[test]
fn test_processor_config_invalid_worker_count() {
    let invalid = ProcessorConfig {
        worker_count: 0,
        ..ProcessorConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_processor_config_invalid_queue_size() {
    let invalid = ProcessorConfig {
        queue_size: 0,
        ..ProcessorConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_priority_config_invalid_weight() {
    let invalid = NamespacePriorityConfig {
        weights: PriorityWeights {
            critical: 0,
            high: 2,
            low: 1,
        },
        ..NamespacePriorityConfig::default()
    };
    let err = invalid.validate().unwrap_err();
    assert!(err.contains("critical"));
}

#[test]
fn test_rate_limit_config_rejects_nan() {
    let invalid = RateLimitConfig {
        namespace_max_rps: f64::NAN,
        ..RateLimitConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"
    {
        "enable_priority_scheduler": false,
        "channel_capacity": 64,
        "processor": {
            "worker_count": 4,
            "queue_size": 128,
            "shutdown_policy": "drain",
            "shutdown_timeout_ms": 500
        },
        "priority": {
            "current_cluster": "east",
            "weights": { "critical": 10 }
        },
        "rate_limit": { "max_poll_rps": 50.0 }
    }
    "#;

    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    assert!(!cfg.enable_priority_scheduler);
    assert_eq!(cfg.channel_capacity, 64);
    assert_eq!(cfg.processor.worker_count, 4);
    assert_eq!(cfg.processor.shutdown_policy, ShutdownPolicy::Drain);
    assert_eq!(cfg.processor.shutdown_timeout(), Duration::from_millis(500));
    assert_eq!(cfg.priority.current_cluster, "east");
    // Unspecified weights keep their defaults.
    assert_eq!(cfg.priority.weights.critical, 10);
    assert_eq!(cfg.priority.weights.low, PriorityWeights::default().low);
    assert!((cfg.rate_limit.max_poll_rps - 50.0).abs() < f64::EPSILON);
}

#[test]
fn test_scheduler_config_invalid_json() {
    let err = SchedulerConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));

    let err = SchedulerConfig::from_json_str(r#"{"channel_capacity": 0}"#).unwrap_err();
    assert!(err.contains("channel_capacity"));

    let err = SchedulerConfig::from_json_str(r#"{"processor": {"queue_size": 0}}"#).unwrap_err();
    assert!(err.starts_with("processor invalid"));
}

#[test]
fn test_load_from_file_and_override() {
    let path = std::env::temp_dir().join(format!("fair-scheduler-{}.json", std::process::id()));
    std::fs::write(&path, r#"{"processor": {"worker_count": 2}}"#).unwrap();

    let mut cfg = load_from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(cfg.processor.worker_count, 2);

    let overrides: BTreeMap<String, String> = [
        ("FAIR_SCHEDULER_WORKER_COUNT", "6"),
        ("FAIR_SCHEDULER_CURRENT_CLUSTER", "west"),
        ("FAIR_SCHEDULER_ENABLE_PRIORITY_SCHEDULER", "false"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    apply_overrides(&mut cfg, &overrides).unwrap();
    assert_eq!(cfg.processor.worker_count, 6);
    assert_eq!(cfg.priority.current_cluster, "west");
    assert!(!cfg.enable_priority_scheduler);

    let bad: BTreeMap<String, String> =
        [("FAIR_SCHEDULER_SHUTDOWN_POLICY".to_string(), "later".to_string())].into();
    assert!(apply_overrides(&mut cfg, &bad).is_err());
}
