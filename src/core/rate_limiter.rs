//! Token-bucket rate limiters consulted on the dispatch path.
//!
//! Budgets are requests per second read live from a [`DynamicProperty`];
//! a bucket holds at most `max(1, rps)` tokens and refills continuously. A
//! non-positive or non-finite budget disables throttling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::dynamic::{DynamicProperty, NamespaceProperty};
use crate::util::clock::{Clock, SystemClock};

/// Share of the persistence budget granted to the host when no explicit host
/// budget is configured.
pub const HOST_RPS_TO_PERSISTENCE_QPS_RATIO: f64 = 0.3;

/// Non-blocking admission check.
pub trait RateLimiter: Send + Sync {
    /// Take one token if available.
    fn allow(&self) -> bool;

    /// Return a token taken by a successful [`RateLimiter::allow`].
    fn refund(&self) {}
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Option<Instant>,
}

/// Token bucket with a live requests-per-second budget.
pub struct TokenBucketRateLimiter {
    rps: Arc<dyn DynamicProperty<f64>>,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

impl TokenBucketRateLimiter {
    /// Bucket reading its budget from `rps`, timed by the system clock.
    pub fn new(rps: Arc<dyn DynamicProperty<f64>>) -> Self {
        Self::with_clock(rps, Arc::new(SystemClock))
    }

    /// Bucket with a custom time source.
    pub fn with_clock(rps: Arc<dyn DynamicProperty<f64>>, clock: Arc<dyn Clock>) -> Self {
        let burst = burst_of(rps.current_value());
        Self {
            rps,
            clock,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: None,
            }),
        }
    }

    /// Tokens currently available (after refilling to now).
    pub fn available_tokens(&self) -> f64 {
        let rate = self.rps.current_value();
        let mut state = self.state.lock();
        self.refill(&mut state, rate);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState, rate: f64) {
        let now = self.clock.now();
        let burst = burst_of(rate);
        if let Some(last) = state.last_refill {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            state.tokens += elapsed * rate;
        }
        // Budget may have shrunk since the last refill.
        state.tokens = state.tokens.min(burst);
        state.last_refill = Some(now);
    }
}

impl RateLimiter for TokenBucketRateLimiter {
    fn allow(&self) -> bool {
        let rate = self.rps.current_value();
        if !is_throttled(rate) {
            return true;
        }
        let mut state = self.state.lock();
        self.refill(&mut state, rate);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refund(&self) {
        let rate = self.rps.current_value();
        if !is_throttled(rate) {
            return;
        }
        let mut state = self.state.lock();
        state.tokens = (state.tokens + 1.0).min(burst_of(rate));
    }
}

fn is_throttled(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

fn burst_of(rate: f64) -> f64 {
    if is_throttled(rate) {
        rate.max(1.0)
    } else {
        1.0
    }
}

/// Limiter that admits only when every stage admits.
///
/// Stages are consulted in order; when a later stage denies, tokens taken from
/// earlier stages are refunded.
pub struct MultiStageRateLimiter {
    stages: Vec<Arc<dyn RateLimiter>>,
}

impl MultiStageRateLimiter {
    /// Compose `stages`, consulted first to last.
    pub fn new(stages: Vec<Arc<dyn RateLimiter>>) -> Self {
        Self { stages }
    }
}

impl RateLimiter for MultiStageRateLimiter {
    fn allow(&self) -> bool {
        for (idx, stage) in self.stages.iter().enumerate() {
            if !stage.allow() {
                for taken in self.stages[..idx].iter().rev() {
                    taken.refund();
                }
                return false;
            }
        }
        true
    }

    fn refund(&self) {
        for stage in &self.stages {
            stage.refund();
        }
    }
}

struct NamespaceScopedRps {
    rps: Arc<dyn NamespaceProperty<f64>>,
    namespace: String,
}

impl DynamicProperty<f64> for NamespaceScopedRps {
    fn current_value(&self) -> f64 {
        self.rps.value_for(&self.namespace)
    }
}

/// One token bucket per namespace, created on first use.
pub struct NamespaceRateLimiters {
    rps: Arc<dyn NamespaceProperty<f64>>,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Arc<TokenBucketRateLimiter>>>,
}

impl NamespaceRateLimiters {
    /// Buckets budgeted by `rps`, resolved per namespace name.
    pub fn new(rps: Arc<dyn NamespaceProperty<f64>>) -> Self {
        Self::with_clock(rps, Arc::new(SystemClock))
    }

    /// Buckets with a custom time source.
    pub fn with_clock(rps: Arc<dyn NamespaceProperty<f64>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rps,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// The bucket of `namespace`.
    pub fn limiter_for(&self, namespace: &str) -> Arc<TokenBucketRateLimiter> {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get(namespace) {
            return Arc::clone(bucket);
        }
        let bucket = Arc::new(TokenBucketRateLimiter::with_clock(
            Arc::new(NamespaceScopedRps {
                rps: Arc::clone(&self.rps),
                namespace: namespace.to_string(),
            }),
            Arc::clone(&self.clock),
        ));
        buckets.insert(namespace.to_string(), Arc::clone(&bucket));
        bucket
    }

    /// Take a token from `namespace`'s bucket.
    pub fn allow(&self, namespace: &str) -> bool {
        self.limiter_for(namespace).allow()
    }
}

struct HostRps {
    host_rps: Arc<dyn DynamicProperty<f64>>,
    persistence_max_qps: Arc<dyn DynamicProperty<f64>>,
}

impl DynamicProperty<f64> for HostRps {
    fn current_value(&self) -> f64 {
        let host_rps = self.host_rps.current_value();
        if host_rps > 0.0 {
            return host_rps;
        }
        HOST_RPS_TO_PERSISTENCE_QPS_RATIO * self.persistence_max_qps.current_value()
    }
}

/// Host-wide limiter shared by every queue processor on the host.
///
/// Uses `host_rps` when positive, otherwise a fixed share of the persistence
/// budget.
pub fn host_rate_limiter(
    host_rps: Arc<dyn DynamicProperty<f64>>,
    persistence_max_qps: Arc<dyn DynamicProperty<f64>>,
    clock: Arc<dyn Clock>,
) -> Arc<dyn RateLimiter> {
    Arc::new(TokenBucketRateLimiter::with_clock(
        Arc::new(HostRps {
            host_rps,
            persistence_max_qps,
        }),
        clock,
    ))
}

/// Per-operation limiter layered over the host limiter.
pub fn operation_rate_limiter(
    host: Arc<dyn RateLimiter>,
    operation_rps: Arc<dyn DynamicProperty<f64>>,
    clock: Arc<dyn Clock>,
) -> Arc<dyn RateLimiter> {
    let operation: Arc<dyn RateLimiter> =
        Arc::new(TokenBucketRateLimiter::with_clock(operation_rps, clock));
    Arc::new(MultiStageRateLimiter::new(vec![operation, host]))
}
