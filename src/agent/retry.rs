//! Delay strategies between failed reconnect attempts.

use std::fmt::Debug;
use std::time::Duration;

use rand::Rng;

use crate::error::{AgentError, Result};

/// Maps the number of consecutive failures (starting at 1) to a delay.
pub trait RetryPolicy: Send + Sync {
    /// Delay before the next attempt after `failures` consecutive failures.
    fn delay(&self, failures: u32) -> Duration;

    /// Reject unusable parameters. Checked when the agent is built.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl<F> RetryPolicy for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, failures: u32) -> Duration {
        self(failures)
    }
}

/// Same delay after every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedInterval(pub Duration);

impl Default for FixedInterval {
    fn default() -> Self {
        Self(Duration::from_secs(1))
    }
}

impl RetryPolicy for FixedInterval {
    fn delay(&self, _failures: u32) -> Duration {
        self.0
    }
}

/// Exponential backoff with optional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound
    pub max_delay: Duration,
    /// Growth per failure, >= 1.0
    pub factor: f64,
    /// Fraction of the delay that is randomized, 0.0..=1.0
    pub jitter: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl ExponentialBackoff {
    /// Backoff without jitter
    pub fn new(initial_delay: Duration, max_delay: Duration, factor: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            factor,
            jitter: 0.0,
        }
    }

    /// Set the jitter fraction
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Convert seconds to a delay no larger than `max_delay`.
    fn clamp(&self, secs: f64) -> Duration {
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn delay(&self, failures: u32) -> Duration {
        let initial = self.initial_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = (initial * self.factor.powi(exponent)).min(max);

        if self.jitter <= 0.0 || base <= 0.0 {
            return self.clamp(base);
        }

        let randomized = rand::thread_rng().gen_range(0.0..=base);
        let blended = base * (1.0 - self.jitter) + randomized * self.jitter;
        self.clamp(blended)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(AgentError::Config(msg.to_string()));

        if self.initial_delay.is_zero() {
            return invalid("Initial reconnect delay must be > 0");
        }
        if self.max_delay < self.initial_delay {
            return invalid("Max reconnect delay must be >= initial reconnect delay");
        }
        if self.factor < 1.0 || !self.factor.is_finite() {
            return invalid("Backoff factor must be >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return invalid("Jitter must be between 0.0 and 1.0");
        }
        Ok(())
    }
}
