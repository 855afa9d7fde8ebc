//! Integration tests for namespace priority scheduling
//!
//! These tests validate:
//! - Priority assignment and retry escalation
//! - Weighted dispatch across priority classes
//! - Eventual delivery under host and namespace rate limits
//! - Degradation when the namespace registry fails
//! - Host scheduler construction from configuration

use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus_fair_scheduler::builders::build_host_scheduler;
use prometheus_fair_scheduler::config::dynamic::{
    DynamicConfig, InMemoryConfigClient, StaticProperty, NAMESPACE_MAX_RPS_KEY,
};
use prometheus_fair_scheduler::config::SchedulerConfig;
use prometheus_fair_scheduler::core::metrics::{
    InMemoryMetricsHandler, TASK_DEFERRED, TASK_PRIORITY_ASSIGNED,
};
use prometheus_fair_scheduler::core::{
    AppResult, Executable, InMemoryNamespaceRegistry, MetricsHandler, NamespaceEntry,
    NamespaceExecutable, NamespacePriorityAssigner, NamespacePriorityScheduler,
    NamespacePrioritySchedulerOptions, NamespaceRateLimitGate, NamespaceRateLimiters,
    NoopMetricsHandler, PriorityAssignerOptions, PriorityWeights, RateLimiter, Scheduler,
    SchedulerError, ShutdownPolicy, TaskPriority, TokenBucketRateLimiter,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CLUSTER: &str = "active";

// ============================================================================
// TEST EXECUTABLES
// ============================================================================

type ExecLog = Arc<Mutex<Vec<(String, TaskPriority, usize)>>>;

struct NsTask {
    namespace_id: String,
    attempt: u32,
    priority: TaskPriority,
    seq: usize,
    log: ExecLog,
}

#[async_trait]
impl Executable for NsTask {
    async fn execute(&mut self) -> AppResult<()> {
        self.log
            .lock()
            .push((self.namespace_id.clone(), self.priority, self.seq));
        Ok(())
    }

    fn abort(&mut self) {}
}

impl NamespaceExecutable for NsTask {
    fn namespace_id(&self) -> &str {
        &self.namespace_id
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    fn priority(&self) -> TaskPriority {
        self.priority
    }

    fn set_priority(&mut self, priority: TaskPriority) {
        self.priority = priority;
    }
}

struct Fixture {
    log: ExecLog,
    registry: Arc<InMemoryNamespaceRegistry>,
    metrics: Arc<InMemoryMetricsHandler>,
}

impl Fixture {
    fn new() -> Self {
        let registry = Arc::new(InMemoryNamespaceRegistry::new());
        registry.register(NamespaceEntry::new("ns-active", "orders", CLUSTER));
        registry.register(NamespaceEntry::new("ns-standby", "billing", "standby"));
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            registry,
            metrics: Arc::new(InMemoryMetricsHandler::new()),
        }
    }

    fn task(&self, namespace_id: &str, attempt: u32, seq: usize) -> NsTask {
        NsTask {
            namespace_id: namespace_id.to_string(),
            attempt,
            priority: TaskPriority::Low,
            seq,
            log: Arc::clone(&self.log),
        }
    }

    fn scheduler(
        &self,
        weights: PriorityWeights,
        gate: Option<NamespaceRateLimitGate>,
        retry_delay: Duration,
    ) -> NamespacePriorityScheduler<NsTask> {
        let metrics: Arc<dyn MetricsHandler> = self.metrics.clone();
        let assigner = Arc::new(NamespacePriorityAssigner::new(
            CLUSTER,
            self.registry.clone(),
            PriorityAssignerOptions {
                critical_retry_attempts: Arc::new(StaticProperty::new(5_usize)),
            },
            Arc::clone(&metrics),
        ));
        let options = NamespacePrioritySchedulerOptions {
            default_weights: PriorityWeights {
                critical: 1,
                high: 1,
                low: 1,
            },
            shutdown_policy: ShutdownPolicy::Drain,
            rate_limit_retry_delay: retry_delay,
            ..NamespacePrioritySchedulerOptions::new(
                Arc::new(StaticProperty::new(1_usize)),
                8,
                Arc::new(StaticProperty::new(weights)),
            )
        };
        NamespacePriorityScheduler::new(options, assigner, self.registry.clone(), gate, metrics)
            .unwrap()
    }

    fn executed(&self) -> usize {
        self.log.lock().len()
    }

    fn priorities(&self) -> Vec<TaskPriority> {
        self.log.lock().iter().map(|(_, priority, _)| *priority).collect()
    }
}

fn weights(critical: u32, high: u32, low: u32) -> PriorityWeights {
    PriorityWeights { critical, high, low }
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

// ============================================================================
// PRIORITY ASSIGNMENT
// ============================================================================

#[test]
fn test_priorities_assigned_at_submission() {
    let fixture = Fixture::new();
    let scheduler = fixture.scheduler(weights(3, 2, 1), None, Duration::from_millis(10));

    scheduler.submit(fixture.task("ns-active", 0, 0)).unwrap();
    scheduler.submit(fixture.task("ns-standby", 0, 1)).unwrap();
    scheduler.submit(fixture.task("ns-unknown", 0, 2)).unwrap();
    scheduler.submit(fixture.task("ns-standby", 7, 3)).unwrap();
    assert_eq!(scheduler.channel_count(), 4);

    scheduler.start();
    assert!(wait_until(Duration::from_secs(5), || fixture.executed() == 4));
    scheduler.stop();

    let mut by_seq = fixture.log.lock().clone();
    by_seq.sort_by_key(|(_, _, seq)| *seq);
    let priorities: Vec<TaskPriority> = by_seq.iter().map(|(_, priority, _)| *priority).collect();
    assert_eq!(
        priorities,
        [
            TaskPriority::High,
            TaskPriority::Low,
            TaskPriority::Low,
            TaskPriority::Critical,
        ]
    );
    assert_eq!(
        fixture
            .metrics
            .counter_value(TASK_PRIORITY_ASSIGNED, &[("priority", "low".into())]),
        2
    );
}

#[test]
fn test_escalated_retries_get_more_turns() {
    let fixture = Fixture::new();
    let scheduler = fixture.scheduler(weights(3, 2, 1), None, Duration::from_millis(10));

    // Same namespace: fresh tasks are low, retried ones critical.
    for seq in 0..30 {
        scheduler.submit(fixture.task("ns-standby", 0, seq)).unwrap();
        scheduler.submit(fixture.task("ns-standby", 10, seq)).unwrap();
    }
    scheduler.start();
    assert!(wait_until(Duration::from_secs(5), || fixture.executed() == 60));
    scheduler.stop();

    let priorities = fixture.priorities();
    let critical_in_first_40 = priorities[..40]
        .iter()
        .filter(|priority| **priority == TaskPriority::Critical)
        .count();
    assert_eq!(critical_in_first_40, 30);
    assert_eq!(
        &priorities[..4],
        &[
            TaskPriority::Critical,
            TaskPriority::Low,
            TaskPriority::Critical,
            TaskPriority::Critical,
        ]
    );
    println!("✅ Critical retries got 3 of every 4 turns");
}

// ============================================================================
// RATE LIMITING
// ============================================================================

#[test]
fn test_rate_limited_tasks_are_eventually_delivered() {
    let fixture = Fixture::new();
    let limiter: Arc<dyn RateLimiter> =
        Arc::new(TokenBucketRateLimiter::new(Arc::new(StaticProperty::new(20.0))));
    let gate = NamespaceRateLimitGate::new(limiter, fixture.registry.clone());
    let scheduler = fixture.scheduler(weights(3, 2, 1), Some(gate), Duration::from_millis(10));

    for seq in 0..30 {
        scheduler.submit(fixture.task("ns-active", 0, seq)).unwrap();
    }
    let started = Instant::now();
    scheduler.start();
    assert!(wait_until(Duration::from_secs(10), || fixture.executed() == 30));
    let elapsed = started.elapsed();
    scheduler.stop();

    // A burst of 20, then 10 more at 20 per second.
    assert!(elapsed >= Duration::from_millis(300), "took {elapsed:?}");
    assert!(fixture.metrics.counter_value(TASK_DEFERRED, &[]) > 0);

    // Deferred tasks go to the tail of their channel; none is lost or repeated.
    let mut seqs: Vec<usize> = fixture.log.lock().iter().map(|(_, _, seq)| *seq).collect();
    seqs.sort_unstable();
    assert!(seqs.into_iter().eq(0..30));
    println!("✅ 30 tasks delivered in {elapsed:?} under a 20 rps budget");
}

#[test]
fn test_namespace_budget_throttles_only_its_namespace() {
    let fixture = Fixture::new();
    let client = Arc::new(InMemoryConfigClient::new());
    client.set_for_namespace(NAMESPACE_MAX_RPS_KEY, "billing", serde_json::json!(5.0));
    let dynamic = DynamicConfig::new(client);

    let unlimited: Arc<dyn RateLimiter> =
        Arc::new(TokenBucketRateLimiter::new(Arc::new(StaticProperty::new(0.0))));
    let gate = NamespaceRateLimitGate::new(unlimited, fixture.registry.clone())
        .with_namespace_limiters(Arc::new(NamespaceRateLimiters::new(
            dynamic.namespace_property(NAMESPACE_MAX_RPS_KEY, 0.0),
        )));
    let scheduler = fixture.scheduler(weights(1, 1, 1), Some(gate), Duration::from_millis(10));

    for seq in 0..10 {
        scheduler.submit(fixture.task("ns-standby", 0, seq)).unwrap();
        scheduler.submit(fixture.task("ns-active", 0, seq)).unwrap();
    }
    scheduler.start();
    assert!(wait_until(Duration::from_secs(10), || fixture.executed() == 20));
    scheduler.stop();

    let log = fixture.log.lock().clone();
    let last_active = log
        .iter()
        .rposition(|(namespace, _, _)| namespace == "ns-active")
        .unwrap();
    let last_standby = log
        .iter()
        .rposition(|(namespace, _, _)| namespace == "ns-standby")
        .unwrap();
    assert!(last_active < last_standby);
    assert_eq!(log.last().map(|(namespace, _, _)| namespace.as_str()), Some("ns-standby"));
    assert!(fixture.metrics.counter_value(TASK_DEFERRED, &[]) > 0);
}

// ============================================================================
// REGISTRY FAILURE
// ============================================================================

#[test]
fn test_registry_outage_degrades_to_low_priority() {
    let fixture = Fixture::new();
    fixture.registry.set_unavailable(true);
    let limiter: Arc<dyn RateLimiter> =
        Arc::new(TokenBucketRateLimiter::new(Arc::new(StaticProperty::new(0.0))));
    let gate = NamespaceRateLimitGate::new(limiter, fixture.registry.clone());
    let scheduler = fixture.scheduler(weights(3, 2, 1), Some(gate), Duration::from_millis(10));

    for seq in 0..10 {
        scheduler.submit(fixture.task("ns-active", 0, seq)).unwrap();
    }
    scheduler.start();
    assert!(wait_until(Duration::from_secs(5), || fixture.executed() == 10));
    scheduler.stop();

    assert!(fixture
        .priorities()
        .iter()
        .all(|priority| *priority == TaskPriority::Low));
}

// ============================================================================
// BUILDERS
// ============================================================================

#[test]
fn test_build_host_scheduler_from_config() {
    for enable_priority_scheduler in [true, false] {
        let fixture = Fixture::new();
        let cfg = SchedulerConfig {
            enable_priority_scheduler,
            ..SchedulerConfig::from_json_str(
                r#"{"processor": {"worker_count": 2, "queue_size": 16, "shutdown_policy": "drain"}}"#,
            )
            .unwrap()
        };
        let scheduler = build_host_scheduler::<NsTask>(
            &cfg,
            &DynamicConfig::noop(),
            fixture.registry.clone(),
            Arc::new(NoopMetricsHandler),
        )
        .unwrap();

        scheduler.start();
        for seq in 0..10 {
            scheduler.submit(fixture.task("ns-active", 0, seq)).unwrap();
        }
        scheduler.stop();
        assert_eq!(fixture.executed(), 10, "priority scheduler: {enable_priority_scheduler}");

        let expected = if enable_priority_scheduler {
            TaskPriority::High
        } else {
            TaskPriority::Low
        };
        assert!(fixture.priorities().iter().all(|priority| *priority == expected));
    }
}

#[test]
fn test_build_host_scheduler_rejects_invalid_config() {
    let fixture = Fixture::new();
    let mut cfg = SchedulerConfig::default();
    cfg.priority.weights.low = 0;

    let result = build_host_scheduler::<NsTask>(
        &cfg,
        &DynamicConfig::noop(),
        fixture.registry.clone(),
        Arc::new(NoopMetricsHandler),
    );
    match result {
        Err(SchedulerError::InvalidConfig(message)) => assert!(message.contains("low")),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("zero weight accepted"),
    }
}
