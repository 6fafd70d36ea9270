//! Retry strategies and deadline-bounded polling for gasport.
//!
//! Two shapes of waiting live here:
//!
//! - [`RetryStrategyConfig`] + [`calculate_delay`]: attempt-counted backoff
//!   with jitter, for operations that fail fast and may be re-issued.
//! - [`PollBudget`] + [`poll_until`]: wall-clock-bounded polling at a fixed
//!   cadence, for waiting on remote state to converge (a freshly created
//!   web-app deployment becoming servable).
//!
//! # Example
//!
//! ```
//! use gasport_retry::{PollBudget, PollOutcome, poll_until};
//! use std::time::Duration;
//!
//! let budget = PollBudget {
//!     total: Duration::from_millis(50),
//!     interval: Duration::from_millis(10),
//! };
//! let mut calls = 0u32;
//! let out = poll_until(&budget, |attempt| {
//!     calls = attempt;
//!     if attempt >= 2 { PollOutcome::Ready(attempt) } else { PollOutcome::NotReady }
//! });
//! assert_eq!(out, Some(2));
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries.
    Immediate,
    /// Exponential backoff: delay doubles each attempt (default).
    #[default]
    Exponential,
    /// Linear backoff: delay increases linearly each attempt.
    Linear,
    /// Constant delay: same delay every attempt.
    Constant,
}

/// Configuration for an attempt-counted retry strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    /// Strategy type for calculating delay between retries.
    #[serde(default)]
    pub strategy: RetryStrategyType,
    /// Maximum number of attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for backoff calculations.
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Maximum delay cap for backoff.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor (0.0 = none, 0.5 = delay * 0.5..1.5).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyType::Exponential,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Calculate the delay before the next attempt (1-indexed).
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

/// Apply jitter to a delay value. A factor of 0.5 maps delay to 0.5x..1.5x.
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::RngExt;

    let jitter_range = 2.0 * jitter;
    let mut rng = rand::rng();
    let random_value: f64 = rng.random();
    let random_factor = 1.0 - jitter + (random_value * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// A wall-clock budget for polling a remote condition at a fixed cadence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollBudget {
    /// Total wall-clock time to keep polling.
    #[serde(with = "humantime_serde")]
    pub total: Duration,
    /// Delay between polls.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

/// Outcome of one poll iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The condition holds; polling stops and the value is returned.
    Ready(T),
    /// The condition does not hold yet; poll again after the interval.
    NotReady,
    /// Polling must stop without a value (a non-transient failure).
    Abort,
}

/// Poll `op` until it reports ready, aborts, or the budget elapses.
///
/// The first call happens immediately; subsequent calls are separated by
/// `budget.interval`. The attempt number passed to `op` is 1-indexed.
/// Returns `None` on abort or budget exhaustion.
pub fn poll_until<T, F>(budget: &PollBudget, mut op: F) -> Option<T>
where
    F: FnMut(u32) -> PollOutcome<T>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match op(attempt) {
            PollOutcome::Ready(value) => return Some(value),
            PollOutcome::Abort => return None,
            PollOutcome::NotReady => {}
        }

        if start.elapsed() + budget.interval > budget.total {
            return None;
        }
        std::thread::sleep(budget.interval);
    }
}

/// A retry executor that runs a fallible operation with configured backoff.
pub struct RetryExecutor {
    config: RetryStrategyConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the given configuration.
    pub fn new(config: RetryStrategyConfig) -> Self {
        Self { config }
    }

    /// Execute a fallible operation with retry behavior.
    ///
    /// The operation receives the current attempt number (starting at 1).
    pub fn run<T, E, F>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt = 1;

        loop {
            match operation(attempt) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= self.config.max_attempts {
                        return Err(e);
                    }

                    let delay = calculate_delay(&self.config, attempt);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
