//! Retry strategies and backoff policies for store calls.
//!
//! This crate provides configurable retry strategies with support for:
//! - Multiple backoff strategies (immediate, exponential, linear, constant)
//! - Jitter for avoiding synchronized retries
//! - Error classification so only transient failures are retried
//!
//! # Example
//!
//! ```
//! use playship_retry::{ErrorClass, RetryExecutor, RetryStrategyConfig, RetryStrategyType};
//! use std::time::Duration;
//!
//! let executor = RetryExecutor::new(RetryStrategyConfig {
//!     strategy: RetryStrategyType::Immediate,
//!     max_attempts: 2,
//!     base_delay: Duration::ZERO,
//!     max_delay: Duration::ZERO,
//!     jitter: 0.0,
//! });
//!
//! let result = executor.run_classified(
//!     |_err: &&str| ErrorClass::Retryable,
//!     |_attempt, _err, _delay| {},
//!     |attempt| if attempt < 2 { Err("reset") } else { Ok(attempt) },
//! );
//! assert_eq!(result, Ok(2));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries - retry immediately
    Immediate,
    /// Exponential backoff: delay doubles each attempt (default)
    #[default]
    Exponential,
    /// Linear backoff: delay increases linearly each attempt
    Linear,
    /// Constant delay: same delay every attempt
    Constant,
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStrategyConfig {
    /// Strategy type for calculating delay between retries.
    #[serde(default)]
    pub strategy: RetryStrategyType,
    /// Total attempts, including the first one.
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
    /// Jitter factor for randomized delays (0.0 = no jitter, 1.0 = full jitter).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
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

/// Error classification for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Error is transient and should be retried
    #[default]
    Retryable,
    /// Error outcome is unknown (the call may have taken effect)
    Ambiguous,
    /// Error is permanent and should not be retried
    Permanent,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::Ambiguous => write!(f, "ambiguous"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

/// Calculate the delay before the next attempt.
///
/// `attempt` is the attempt that just failed (1-indexed).
///
/// ```
/// use playship_retry::{RetryStrategyConfig, RetryStrategyType, calculate_delay};
/// use std::time::Duration;
///
/// let config = RetryStrategyConfig {
///     strategy: RetryStrategyType::Exponential,
///     base_delay: Duration::from_secs(1),
///     max_delay: Duration::from_secs(60),
///     jitter: 0.0,
///     max_attempts: 10,
/// };
///
/// assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
/// assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
/// ```
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

/// Jitter factor of 0.5 means delay * (0.5 to 1.5).
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    let random_value: f64 = rand::random();
    let factor = 1.0 - jitter + (random_value * 2.0 * jitter);
    let millis = (delay.as_millis() as f64 * factor).round() as u64;
    Duration::from_millis(millis)
}

/// Runs a fallible operation with configured retry behavior.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryStrategyConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryStrategyConfig) -> Self {
        Self { config }
    }

    /// Retry only errors classified as [`ErrorClass::Retryable`].
    ///
    /// `on_retry` is called with the failed attempt number, its error and the
    /// delay before the next attempt.
    pub fn run_classified<T, E, F, C, R>(
        &self,
        classify: C,
        mut on_retry: R,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        C: Fn(&E) -> ErrorClass,
        R: FnMut(u32, &E, Duration),
    {
        let mut attempt = 1;

        loop {
            match operation(attempt) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= self.config.max_attempts
                        || classify(&e) != ErrorClass::Retryable
                    {
                        return Err(e);
                    }

                    let delay = calculate_delay(&self.config, attempt);
                    on_retry(attempt, &e, delay);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn immediate(max_attempts: u32) -> RetryStrategyConfig {
        RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    #[test]
    fn default_config_retries_once() {
        let config = RetryStrategyConfig::default();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.strategy, RetryStrategyType::Exponential);
        assert_eq!(config.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn calculate_delay_exponential_is_capped() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: 10,
        };

        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 3), Duration::from_secs(4));
        assert_eq!(calculate_delay(&config, 10), Duration::from_secs(60));
    }

    #[test]
    fn calculate_delay_linear_and_constant() {
        let mut config = RetryStrategyConfig {
            strategy: RetryStrategyType::Linear,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&config, 5), Duration::from_secs(5));
        assert_eq!(calculate_delay(&config, 15), Duration::from_secs(10));

        config.strategy = RetryStrategyType::Constant;
        assert_eq!(calculate_delay(&config, 7), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: 0.5,
            max_attempts: 10,
        };

        for _ in 0..100 {
            let delay = calculate_delay(&config, 1);
            assert!(delay >= Duration::from_millis(5000));
            assert!(delay <= Duration::from_millis(15000));
        }
    }

    #[test]
    fn retries_until_success() {
        let executor = RetryExecutor::new(immediate(5));
        let mut attempts = 0;
        let result = executor.run_classified(
            |_: &&str| ErrorClass::Retryable,
            |_, _, _| {},
            |attempt| {
                attempts = attempt;
                if attempt < 3 { Err("transient") } else { Ok("ok") }
            },
        );
        assert_eq!(result, Ok("ok"));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let executor = RetryExecutor::new(immediate(3));
        let mut calls = 0;
        let result = executor.run_classified(
            |_: &&str| ErrorClass::Retryable,
            |_, _, _| {},
            |_| {
                calls += 1;
                Err::<(), _>("down")
            },
        );
        assert_eq!(result, Err("down"));
        assert_eq!(calls, 3);
    }

    #[test]
    fn run_classified_does_not_retry_permanent_errors() {
        let executor = RetryExecutor::new(immediate(5));
        let mut calls = 0;
        let result = executor.run_classified(
            |e: &&str| {
                if *e == "forbidden" {
                    ErrorClass::Permanent
                } else {
                    ErrorClass::Retryable
                }
            },
            |_, _, _| {},
            |_| {
                calls += 1;
                Err::<(), _>("forbidden")
            },
        );
        assert_eq!(result, Err("forbidden"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn run_classified_does_not_retry_ambiguous_errors() {
        let executor = RetryExecutor::new(immediate(5));
        let mut calls = 0;
        let _ = executor.run_classified(
            |_: &&str| ErrorClass::Ambiguous,
            |_, _, _| {},
            |_| {
                calls += 1;
                Err::<(), _>("timeout")
            },
        );
        assert_eq!(calls, 1);
    }

    #[test]
    fn run_classified_reports_each_retry() {
        let executor = RetryExecutor::new(immediate(2));
        let mut retried = Vec::new();
        let result = executor.run_classified(
            |_: &String| ErrorClass::Retryable,
            |attempt, err, delay| retried.push((attempt, err.clone(), delay)),
            |attempt| {
                if attempt == 1 {
                    Err("connection reset".to_string())
                } else {
                    Ok(attempt)
                }
            },
        );
        assert_eq!(result, Ok(2));
        assert_eq!(
            retried,
            vec![(1, "connection reset".to_string(), Duration::ZERO)]
        );
    }

    #[test]
    fn config_deserializes_humantime_durations() {
        let config: RetryStrategyConfig =
            serde_json::from_str(r#"{"maxAttempts":3,"baseDelay":"250ms","maxDelay":"5s"}"#)
                .expect("parse");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(5));
        assert_eq!(config.strategy, RetryStrategyType::Exponential);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delay_without_jitter_never_exceeds_max(
                base_ms in 0u64..10_000,
                max_ms in 0u64..300_000,
                attempt in 1u32..100,
            ) {
                let config = RetryStrategyConfig {
                    strategy: RetryStrategyType::Exponential,
                    max_attempts: 100,
                    base_delay: Duration::from_millis(base_ms),
                    max_delay: Duration::from_millis(max_ms),
                    jitter: 0.0,
                };
                prop_assert!(calculate_delay(&config, attempt) <= config.max_delay);
            }
        }
    }
}
