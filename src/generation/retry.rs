//! Classified retry with exponential backoff.

use crate::config::RetryConfig;
use crate::error::{RetryClass, RetryError, ServiceError};
use crate::generation::events::{EngineEvent, EventSink, WaitingNotice};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_multiplier: f64,
    pub transient_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            rate_limit_multiplier: config.rate_limit_multiplier,
            transient_multiplier: config.transient_multiplier,
        }
    }

    /// Wait before the retry that follows failure number `attempt + 1`:
    /// `base × multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, class: RetryClass, attempt: u32) -> Duration {
        let multiplier = match class {
            RetryClass::RateLimited => self.rate_limit_multiplier,
            RetryClass::Transient | RetryClass::Fatal => self.transient_multiplier,
        };
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped > 0.0 {
            self.max_delay
        } else {
            Duration::ZERO
        }
    }

    /// Run `op` until it succeeds, fails fatally, runs out of attempts or is
    /// cancelled. `op` receives the zero-based attempt number. Every wait is
    /// announced on `events` before it starts.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        events: &EventSink,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut failures = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = op(failures) => outcome,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(ServiceError::Cancelled) => return Err(RetryError::Cancelled),
                Err(err) => err,
            };

            let class = err.class();
            if class == RetryClass::Fatal {
                return Err(RetryError::Fatal(err));
            }

            failures += 1;
            if failures >= self.max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: failures,
                    last: err,
                });
            }

            let delay = self.delay_for(class, failures - 1);
            match class {
                RetryClass::RateLimited => warn!(
                    label,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                ),
                _ => debug!(
                    label,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, backing off"
                ),
            }
            events.emit(EngineEvent::Waiting(WaitingNotice {
                label: label.to_string(),
                class,
                attempt: failures,
                delay,
            }));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
