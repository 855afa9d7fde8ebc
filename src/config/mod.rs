//! Configuration models: static scheduler settings, environment loading and
//! live-reloadable properties.

pub mod dynamic;
pub mod env;
pub mod scheduler;

pub use dynamic::{
    ConfigClient, DynamicConfig, DynamicProperty, InMemoryConfigClient, NamespaceProperty,
    NoopConfigClient, StaticProperty,
};
pub use scheduler::{NamespacePriorityConfig, ProcessorConfig, RateLimitConfig, SchedulerConfig};
