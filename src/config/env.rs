//! Loading configuration from the environment.
//!
//! A `.env` file in the working directory is loaded first when present. The
//! configuration itself is a JSON file named by an environment variable;
//! individual fields can then be overridden with `FAIR_SCHEDULER_*`
//! variables.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use super::scheduler::SchedulerConfig;
use crate::core::scheduler::ShutdownPolicy;

/// Prefix of per-field override variables.
pub const ENV_OVERRIDE_PREFIX: &str = "FAIR_SCHEDULER_";

/// Load configuration from the JSON file named by `var`, then apply
/// `FAIR_SCHEDULER_*` overrides. Without `var` set, defaults are used.
///
/// # Errors
///
/// An unreadable file, a parse error, a malformed override or a validation
/// failure.
pub fn load_from_env(var: &str) -> Result<SchedulerConfig, String> {
    if let Ok(path) = dotenvy::dotenv() {
        debug!(path = %path.display(), "loaded .env file");
    }

    let mut cfg = match std::env::var(var) {
        Ok(path) => load_from_file(Path::new(&path))?,
        Err(_) => SchedulerConfig::default(),
    };

    let overrides: BTreeMap<String, String> = std::env::vars()
        .filter(|(key, _)| key.starts_with(ENV_OVERRIDE_PREFIX))
        .collect();
    apply_overrides(&mut cfg, &overrides)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Parse and validate a JSON configuration file.
///
/// # Errors
///
/// An unreadable file, a parse error or a validation failure.
pub fn load_from_file(path: &Path) -> Result<SchedulerConfig, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    SchedulerConfig::from_json_str(&contents)
}

/// Apply `FAIR_SCHEDULER_*` overrides. Unknown keys are ignored.
///
/// # Errors
///
/// A value that does not parse as its field's type.
pub fn apply_overrides(
    cfg: &mut SchedulerConfig,
    overrides: &BTreeMap<String, String>,
) -> Result<(), String> {
    for (key, value) in overrides {
        let Some(field) = key.strip_prefix(ENV_OVERRIDE_PREFIX) else {
            continue;
        };
        match field {
            "ENABLE_PRIORITY_SCHEDULER" => cfg.enable_priority_scheduler = parse(key, value)?,
            "CHANNEL_CAPACITY" => cfg.channel_capacity = parse(key, value)?,
            "WORKER_COUNT" => cfg.processor.worker_count = parse(key, value)?,
            "QUEUE_SIZE" => cfg.processor.queue_size = parse(key, value)?,
            "SHUTDOWN_POLICY" => cfg.processor.shutdown_policy = parse_policy(key, value)?,
            "SHUTDOWN_TIMEOUT_MS" => cfg.processor.shutdown_timeout_ms = parse(key, value)?,
            "CURRENT_CLUSTER" => cfg.priority.current_cluster = value.clone(),
            "CRITICAL_RETRY_ATTEMPTS" => cfg.priority.critical_retry_attempts = parse(key, value)?,
            "MAX_POLL_HOST_RPS" => cfg.rate_limit.max_poll_host_rps = parse(key, value)?,
            "PERSISTENCE_MAX_QPS" => cfg.rate_limit.persistence_max_qps = parse(key, value)?,
            "MAX_POLL_RPS" => cfg.rate_limit.max_poll_rps = parse(key, value)?,
            "NAMESPACE_MAX_RPS" => cfg.rate_limit.namespace_max_rps = parse(key, value)?,
            _ => debug!(key = %key, "ignoring unknown override"),
        }
    }
    Ok(())
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("{key}: invalid value `{value}`: {e}"))
}

fn parse_policy(key: &str, value: &str) -> Result<ShutdownPolicy, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "drain" => Ok(ShutdownPolicy::Drain),
        "abort" => Ok(ShutdownPolicy::Abort),
        other => Err(format!("{key}: expected `drain` or `abort`, got `{other}`")),
    }
}
