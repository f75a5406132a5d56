//! Bounded retry around a single phase execution.
//!
//! The policy only decides whether to try again and how long to wait.
//! It never substitutes a fallback; that is the orchestrator's call.

use crate::cancellation::CancellationToken;
use crate::errors::PhaseError;
use crate::utils::duration_ms;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    Fixed,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Exact delays.
    #[default]
    None,
    /// Random from 0 to delay.
    Full,
    /// Half fixed, half random.
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

/// Retry budget and backoff shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetryConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }
}

/// Delay bookkeeping across the retries of one phase.
#[derive(Debug, Default)]
pub struct RetryState {
    retries: u32,
    previous_delay_ms: Option<u64>,
}

impl RetryState {
    /// Creates a fresh state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries scheduled so far.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Computes the delay before the next retry and counts it.
    pub fn next_delay(&mut self, config: &RetryConfig) -> Duration {
        let delay = self.calculate_delay(config);
        self.retries += 1;
        delay
    }

    fn calculate_delay(&mut self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;

        let delay = match config.backoff {
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(self.retries)).min(max)
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(self.retries) + 1).min(max),
            BackoffStrategy::Fixed => base.min(max),
        };

        let jittered = match config.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let prev = self.previous_delay_ms.unwrap_or(base);
                let upper = prev.saturating_mul(3).min(max);
                if upper <= base {
                    base.min(max)
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                }
            }
        };

        self.previous_delay_ms = Some(jittered);
        Duration::from_millis(jittered)
    }
}

/// A failed attempt that is about to be retried.
#[derive(Debug)]
pub struct RetryNotice<'a> {
    /// 1-based number of the attempt that failed.
    pub attempt: u32,
    /// Why it failed.
    pub error: &'a PhaseError,
    /// Wait before the next attempt.
    pub delay: Duration,
}

/// What the retry loop ended with.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The successful value, or the error that ended the loop.
    pub result: Result<T, PhaseError>,
    /// Attempts started, at least 1.
    pub attempts: u32,
    /// Every attempt error, in order.
    pub attempt_errors: Vec<PhaseError>,
}

impl<T> RetryOutcome<T> {
    /// Attempts beyond the first.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// True if the loop gave up because every attempt failed with a retryable error.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_retryable())
    }
}

/// A retry budget plus an optional per-attempt deadline.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Creates a policy from a config.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt_timeout: None,
        }
    }

    /// Overrides the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Total attempts allowed.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    /// The underlying config.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation` until it succeeds, fails permanently or the budget is spent.
    ///
    /// `operation` receives the 1-based attempt number. Validation and
    /// cancellation errors end the loop at once. The token is checked between
    /// attempts and raced against every backoff sleep. `on_retry` is called
    /// before each wait.
    pub async fn run<T, F, Fut, R>(
        &self,
        phase: &str,
        token: &CancellationToken,
        mut on_retry: R,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, PhaseError>>,
        R: FnMut(&RetryNotice<'_>),
    {
        let mut state = RetryState::new();
        let mut attempt_errors = Vec::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(PhaseError::timeout(
                        phase,
                        duration_ms(limit),
                    )),
                },
                None => operation(attempt).await,
            };

            let error = match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        attempt_errors,
                    }
                }
                Err(e) => e,
            };
            attempt_errors.push(error.clone());

            if !error.is_retryable() || attempt >= self.max_attempts() {
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                    attempt_errors,
                };
            }

            if token.is_cancelled() {
                return Self::cancelled(phase, token, attempt, attempt_errors);
            }

            let delay = state.next_delay(&self.config);
            tracing::debug!(
                phase = %phase,
                attempt,
                delay_ms = duration_ms(delay),
                error = %error,
                "Retrying phase after error"
            );
            on_retry(&RetryNotice {
                attempt,
                error: &error,
                delay,
            });

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = token.cancelled() => {
                    return Self::cancelled(phase, token, attempt, attempt_errors);
                }
            }
        }
    }

    fn cancelled<T>(
        phase: &str,
        token: &CancellationToken,
        attempts: u32,
        attempt_errors: Vec<PhaseError>,
    ) -> RetryOutcome<T> {
        let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
        RetryOutcome {
            result: Err(PhaseError::cancelled(phase, reason)),
            attempts,
            attempt_errors,
        }
    }
}
