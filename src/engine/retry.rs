// src/engine/retry.rs

//! Retry controller.
//!
//! On a task failure the coordinator asks [`RetryController::decide`] whether
//! to re-enqueue the task. Attempts are counted per task across its whole
//! lifetime: `attempt_count` is the number of executions started so far, so a
//! policy with `max_retries = k` allows `k + 1` executions.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::TaskExecutionError;

/// How long to wait before a retry is re-admitted to the ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayStrategy {
    /// Re-enqueue in the same coordinator step (no backoff).
    #[default]
    Immediate,
    /// Same delay before every retry.
    Fixed(Duration),
    /// `base + base * n`, capped at `max`.
    Linear { base: Duration, max: Duration },
    /// `base * multiplier^n`, capped at `max`.
    Exponential {
        base: Duration,
        multiplier: u32,
        max: Duration,
    },
}

impl DelayStrategy {
    /// Delay before retry number `retry_index` (0-based).
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        match *self {
            DelayStrategy::Immediate => Duration::ZERO,
            DelayStrategy::Fixed(d) => d,
            DelayStrategy::Linear { base, max } => base
                .checked_mul(retry_index.saturating_add(1))
                .unwrap_or(max)
                .min(max),
            DelayStrategy::Exponential {
                base,
                multiplier,
                max,
            } => multiplier
                .checked_pow(retry_index)
                .and_then(|factor| base.checked_mul(factor))
                .unwrap_or(max)
                .min(max),
        }
    }
}

/// Extra condition on the failure itself; `false` gives up immediately.
pub type RetryCondition = Arc<dyn Fn(&TaskExecutionError) -> bool + Send + Sync>;

/// Per-task retry configuration.
#[derive(Clone, Default)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: DelayStrategy,
    retry_if: Option<RetryCondition>,
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self::default()
    }

    /// Retry up to `max_retries` times with no delay.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::immediate(max_retries).with_delay(DelayStrategy::Fixed(delay))
    }

    /// Linear backoff capped at five minutes.
    pub fn linear(max_retries: u32, base: Duration) -> Self {
        Self::immediate(max_retries).with_delay(DelayStrategy::Linear {
            base,
            max: Duration::from_secs(300).max(base),
        })
    }

    /// Doubling backoff capped at `max`.
    pub fn exponential(max_retries: u32, base: Duration, max: Duration) -> Self {
        Self::immediate(max_retries).with_delay(DelayStrategy::Exponential {
            base,
            multiplier: 2,
            max,
        })
    }

    pub fn with_delay(mut self, delay: DelayStrategy) -> Self {
        self.delay = delay;
        self
    }

    /// Only retry failures for which `condition` returns `true`.
    pub fn retry_if<F>(mut self, condition: F) -> Self
    where
        F: Fn(&TaskExecutionError) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(condition));
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn delay(&self) -> DelayStrategy {
        self.delay
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        match self.delay {
            DelayStrategy::Immediate | DelayStrategy::Fixed(_) => Ok(()),
            DelayStrategy::Linear { base, max } if max < base => Err(format!(
                "linear retry max delay {max:?} is below base delay {base:?}"
            )),
            DelayStrategy::Exponential { multiplier, .. } if multiplier == 0 => {
                Err("exponential retry multiplier must be >= 1".to_string())
            }
            DelayStrategy::Exponential { base, max, .. } if max < base => Err(format!(
                "exponential retry max delay {max:?} is below base delay {base:?}"
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("delay", &self.delay)
            .field("retry_if", &self.retry_if.is_some())
            .finish()
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Stateless decision maker; all counters live in the scheduler's task table
/// and are only touched on the coordinator thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryController;

impl RetryController {
    pub fn decide(
        &self,
        policy: &RetryPolicy,
        attempt_count: u32,
        error: &TaskExecutionError,
    ) -> RetryDecision {
        if attempt_count > policy.max_retries {
            debug!(attempt_count, max_retries = policy.max_retries, "retries exhausted");
            return RetryDecision::GiveUp;
        }

        if let Some(condition) = &policy.retry_if {
            match catch_unwind(AssertUnwindSafe(|| condition(error))) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(%error, "retry condition declined failure");
                    return RetryDecision::GiveUp;
                }
                Err(_) => {
                    warn!(%error, "retry condition panicked; giving up");
                    return RetryDecision::GiveUp;
                }
            }
        }

        let retry_index = attempt_count.saturating_sub(1);
        RetryDecision::Retry {
            delay: policy.delay.delay_for(retry_index),
        }
    }
}
