//! Restart policy: exponential backoff between attempts and an optional cap
//! on the number of attempts.

use crate::config::duration_serde;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff applied between restart attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// Delay before the first restart
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// `None` restarts forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: default_max_delay(),
            max_restarts: None,
        }
    }
}

impl RestartPolicy {
    /// Restart straight away, without limit.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: Duration::ZERO,
            max_restarts: None,
        }
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = Some(max_restarts);
        self
    }

    /// Raises `max_delay` too if it would cap `delay`.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self.max_delay = self.max_delay.max(delay);
        self
    }

    /// Whether restart number `attempt` (1-based) is allowed
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_restarts.map_or(true, |max| attempt <= max)
    }

    /// Delay before restart number `attempt` (1-based), capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs.max(0.0))
    }
}

/// Sleep for `delay` unless `stop` fires first.
///
/// Returns `false` if the sleep was cut short by `stop`.
pub(crate) async fn backoff(delay: Duration, stop: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !stop.is_cancelled();
    }

    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}
