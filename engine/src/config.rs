use std::env;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Engine-wide configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum hop count through workflow-triggered-workflow chains.
    pub max_cascade_depth: i32,
    /// Default approval deadline, in business hours.
    pub approval_timeout_hours: u32,
    /// Organization fallback timezone for deadline arithmetic.
    pub default_timezone: Tz,
    pub business_hours: BusinessHoursConfig,
    /// What the action loop does when an action fails and the workflow
    /// does not set its own policy.
    pub default_failure_policy: FailurePolicy,
    /// How many due tasks / paused executions one sweep pass claims.
    pub sweep_batch_size: i64,
    /// Sweep cadence for the built-in scheduler, in minutes.
    pub sweep_interval_minutes: u32,
}

/// Local business window. Hours are wall-clock; `close_hour` may be 24
/// for organizations whose deadlines run to midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursConfig {
    pub open_hour: u32,
    pub close_hour: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the chain on the first failed action; execution ends `failed`.
    Abort,
    /// Record the failure and keep going; execution ends `partial`.
    Continue,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 3,
            approval_timeout_hours: 48,
            default_timezone: Tz::UTC,
            business_hours: BusinessHoursConfig {
                open_hour: 8,
                close_hour: 18,
            },
            default_failure_policy: FailurePolicy::Abort,
            sweep_batch_size: 50,
            sweep_interval_minutes: 1,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let default_timezone = match env::var("ENGINE_TIMEZONE") {
            Ok(name) => name
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("invalid ENGINE_TIMEZONE: {e}"))?,
            Err(_) => defaults.default_timezone,
        };

        let config = Self {
            max_cascade_depth: env_parse("ENGINE_MAX_CASCADE_DEPTH", defaults.max_cascade_depth),
            approval_timeout_hours: env_parse(
                "ENGINE_APPROVAL_TIMEOUT_HOURS",
                defaults.approval_timeout_hours,
            ),
            default_timezone,
            business_hours: BusinessHoursConfig {
                open_hour: env_parse("ENGINE_BUSINESS_OPEN_HOUR", defaults.business_hours.open_hour),
                close_hour: env_parse(
                    "ENGINE_BUSINESS_CLOSE_HOUR",
                    defaults.business_hours.close_hour,
                ),
            },
            default_failure_policy: match env::var("ENGINE_FAILURE_POLICY").as_deref() {
                Ok("continue") => FailurePolicy::Continue,
                _ => defaults.default_failure_policy,
            },
            sweep_batch_size: env_parse("ENGINE_SWEEP_BATCH_SIZE", defaults.sweep_batch_size),
            sweep_interval_minutes: env_parse(
                "ENGINE_SWEEP_INTERVAL_MINUTES",
                defaults.sweep_interval_minutes,
            ),
        };

        if config.business_hours.open_hour >= config.business_hours.close_hour
            || config.business_hours.close_hour > 24
        {
            anyhow::bail!(
                "business window {}..{} is not a valid local hour range",
                config.business_hours.open_hour,
                config.business_hours.close_hour
            );
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
