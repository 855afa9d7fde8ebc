//! Tests for builder modules

use async_trait::async_trait;
use prometheus_fair_scheduler::builders::{
    build_fifo_scheduler, build_host_rate_limiter, build_processor,
};
use prometheus_fair_scheduler::config::dynamic::{
    DynamicConfig, InMemoryConfigClient, MAX_POLL_HOST_RPS_KEY, WORKER_COUNT_KEY,
};
use prometheus_fair_scheduler::config::{ProcessorConfig, SchedulerConfig};
use prometheus_fair_scheduler::core::{
    AppResult, Executable, NoopMetricsHandler, Processor, RateLimiter, SchedulerError,
    SchedulerState,
};
use serde_json::json;
use std::sync::Arc;

struct Nop;

#[async_trait]
impl Executable for Nop {
    async fn execute(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn abort(&mut self) {}
}

#[test]
fn test_build_processor_reads_dynamic_worker_count() {
    let client = Arc::new(InMemoryConfigClient::new());
    client.set(WORKER_COUNT_KEY, json!(3));
    let cfg = ProcessorConfig {
        worker_count: 1,
        queue_size: 8,
        ..ProcessorConfig::default()
    };

    let processor =
        build_processor::<Nop>(&cfg, &DynamicConfig::new(client), Arc::new(NoopMetricsHandler))
            .unwrap();
    processor.start();
    assert_eq!(processor.stats().worker_count, 3);
    processor.stop();
    assert_eq!(processor.state(), SchedulerState::Stopped);
}

#[test]
fn test_build_processor_rejects_zero_workers() {
    let cfg = ProcessorConfig {
        worker_count: 0,
        ..ProcessorConfig::default()
    };
    let result = build_processor::<Nop>(&cfg, &DynamicConfig::noop(), Arc::new(NoopMetricsHandler));
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_build_fifo_scheduler() {
    let cfg = SchedulerConfig {
        enable_priority_scheduler: false,
        ..SchedulerConfig::default()
    };
    let scheduler =
        build_fifo_scheduler::<Nop>(&cfg, &DynamicConfig::noop(), Arc::new(NoopMetricsHandler))
            .unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Created);
    assert_eq!(scheduler.pending_count(), 0);
}

#[test]
fn test_build_fifo_scheduler_rejects_invalid_config() {
    let cfg = SchedulerConfig {
        channel_capacity: 0,
        ..SchedulerConfig::default()
    };
    match build_fifo_scheduler::<Nop>(&cfg, &DynamicConfig::noop(), Arc::new(NoopMetricsHandler)) {
        Err(SchedulerError::InvalidConfig(message)) => {
            assert!(message.starts_with("config invalid"));
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("zero channel capacity accepted"),
    }
}

#[test]
fn test_host_rate_limiter_falls_back_to_persistence_share() {
    let mut cfg = SchedulerConfig::default();
    cfg.rate_limit.max_poll_host_rps = 0.0;
    cfg.rate_limit.persistence_max_qps = 10.0;

    // 30% of 10 QPS: a burst of 3.
    let limiter = build_host_rate_limiter(&cfg, &DynamicConfig::noop());
    assert!((0..3).all(|_| limiter.allow()));
    assert!(!limiter.allow());
}

#[test]
fn test_host_rate_limiter_prefers_dynamic_host_budget() {
    let client = Arc::new(InMemoryConfigClient::new());
    client.set(MAX_POLL_HOST_RPS_KEY, json!(2.0));
    let cfg = SchedulerConfig::default();

    let limiter = build_host_rate_limiter(&cfg, &DynamicConfig::new(client));
    assert!(limiter.allow());
    assert!(limiter.allow());
    assert!(!limiter.allow());
}
