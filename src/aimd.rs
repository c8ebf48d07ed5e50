//! Additive-increase/multiplicative-decrease update law.
//!
//! Successes grow the limit linearly, backpressure shrinks it geometrically,
//! producing the characteristic sawtooth: a slow climb towards capacity and a
//! sharp drop whenever the downstream pushes back.

use crate::{Config, Outcome};

/// The update law, frozen from a validated [Config].
///
/// Operates on a real-valued limit so that fractional step sizes accumulate;
/// the limiter floors the value when comparing against the in-flight count.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Aimd {
    min: f64,
    max: f64,
    step: f64,
    backoff: f64,
}

impl Aimd {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            min: config.min_concurrency as f64,
            max: config.max_concurrency as f64,
            step: config.step_size,
            backoff: config.backoff_factor,
        }
    }

    pub(crate) fn update(&self, limit: f64, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Success => self.increase(limit),
            Outcome::Backpressure => self.decrease(limit),
        }
    }

    fn increase(&self, limit: f64) -> f64 {
        (limit + self.step).min(self.max)
    }

    fn decrease(&self, limit: f64) -> f64 {
        (limit * self.backoff).max(self.min)
    }
}
