//! # Prometheus Fair Scheduler
//!
//! Fair, backpressured task scheduling for multi-tenant processing queues.
//!
//! A high-volume stream of small executables is dispatched to a bounded pool
//! of worker threads so that no tenant can starve the others, memory stays
//! bounded, and concurrency and fairness weights can be retuned while the
//! system runs.
//!
//! ## Core Problem Solved
//!
//! Queue processors of a multi-tenant workflow engine share one worker pool:
//!
//! - **Noisy tenants**: a single namespace with a large backlog must not hold
//!   every worker while others wait
//! - **Retry storms**: tasks that keep failing need escalated priority before
//!   they starve behind fresh work
//! - **Downstream protection**: dispatch must respect host, operation and
//!   namespace request budgets without dropping work
//! - **Live tuning**: worker counts and weights change without a restart
//!
//! ## Key Features
//!
//! - **Interleaved weighted round robin**: per-key FIFO channels dispatched in
//!   an evenly spread cycle proportional to weight
//! - **Parallel processor**: dedicated OS threads draining a bounded intake,
//!   resized live from a dynamic property
//! - **Namespace priority scheduling**: `(namespace, priority)` channels with
//!   retry escalation and token-bucket rate limiting
//! - **Deterministic shutdown**: drain or abort, with a deadline so a stuck
//!   executable never blocks `stop`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_fair_scheduler::builders::build_host_scheduler;
//! use prometheus_fair_scheduler::config::{DynamicConfig, SchedulerConfig};
//! use prometheus_fair_scheduler::core::{InMemoryNamespaceRegistry, NoopMetricsHandler};
//!
//! let cfg = SchedulerConfig::from_json_str(r#"{"processor": {"worker_count": 8}}"#)?;
//! let scheduler = build_host_scheduler::<MyTask>(
//!     &cfg,
//!     &DynamicConfig::noop(),
//!     Arc::new(InMemoryNamespaceRegistry::new()),
//!     Arc::new(NoopMetricsHandler),
//! )?;
//!
//! scheduler.start();
//! scheduler.submit(task)?;
//! scheduler.stop();
//! ```
//!
//! For complete examples, see:
//! - `tests/iwrr_scheduler_test.rs` - Fairness and lifecycle tests
//! - `tests/namespace_priority_test.rs` - Priority and rate limiting

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions, fair dispatch and worker pools.
pub mod core;
/// Configuration models and live-reloadable properties.
pub mod config;
/// Builders to construct schedulers from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;
