use thiserror::Error;

/// Tuning parameters for a [Limiter](crate::Limiter).
///
/// Validated once when the limiter is constructed; invalid combinations are
/// rejected with a [ConfigError].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// The maximum value the concurrency limit can be increased to.
    pub max_concurrency: u32,
    /// The minimum value the concurrency limit can be reduced to.
    pub min_concurrency: u32,
    /// The amount to increase the limit by on an unsignaled success.
    ///
    /// Fractional steps are supported: the limit is tracked as a real number
    /// and floored when checked against the in-flight count, so steps smaller
    /// than 1 still make gradual progress.
    pub step_size: f64,
    /// On backpressure the limit is reduced to `limit * backoff_factor`.
    /// Must be strictly between 0 and 1.
    pub backoff_factor: f64,
    /// Initial concurrency limit. Defaults to halfway between the minimum
    /// and maximum: `min + (max - min) / 2`.
    pub starting_concurrency: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 1000,
            min_concurrency: 1,
            step_size: 1.0,
            backoff_factor: 0.95,
            starting_concurrency: None,
        }
    }
}

impl Config {
    pub fn with_max_concurrency(mut self, max: u32) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_min_concurrency(mut self, min: u32) -> Self {
        self.min_concurrency = min;
        self
    }

    pub fn with_step_size(mut self, step: f64) -> Self {
        self.step_size = step;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_starting_concurrency(mut self, starting: f64) -> Self {
        self.starting_concurrency = Some(starting);
        self
    }

    /// Check every parameter against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_concurrency == 0 {
            return Err(ConfigError::ZeroMinConcurrency);
        }
        if self.min_concurrency > self.max_concurrency {
            return Err(ConfigError::MinAboveMax);
        }
        if !(self.step_size > 0.0) {
            return Err(ConfigError::NonPositiveStepSize);
        }
        if !(self.backoff_factor > 0.0 && self.backoff_factor < 1.0) {
            return Err(ConfigError::BackoffFactorOutOfRange);
        }
        if let Some(starting) = self.starting_concurrency {
            if !(starting >= self.min_concurrency as f64
                && starting <= self.max_concurrency as f64)
            {
                return Err(ConfigError::StartingConcurrencyOutOfRange);
            }
        }
        Ok(())
    }

    /// The initial limit, resolving the derived default.
    ///
    /// Only meaningful on a validated config.
    pub(crate) fn starting_limit(&self) -> f64 {
        self.starting_concurrency.unwrap_or_else(|| {
            let min = self.min_concurrency as f64;
            let max = self.max_concurrency as f64;
            min + (max - min) / 2.0
        })
    }
}

/// A configuration parameter was outside its allowed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("minimum concurrency must be at least 1")]
    ZeroMinConcurrency,
    #[error("minimum concurrency must not exceed maximum concurrency")]
    MinAboveMax,
    #[error("step size must be a positive number")]
    NonPositiveStepSize,
    #[error("backoff factor must be between 0 and 1 (exclusive)")]
    BackoffFactorOutOfRange,
    #[error("starting concurrency must be between minimum and maximum concurrency")]
    StartingConcurrencyOutOfRange,
}
