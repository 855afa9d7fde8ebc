//! Builders to construct schedulers and worker pools from configuration.

pub mod scheduler_builder;

pub use scheduler_builder::{
    build_fifo_scheduler, build_host_rate_limiter, build_host_scheduler,
    build_namespace_priority_scheduler, build_processor,
};
