//! Retry classification and exponential backoff.

use std::time::Duration;

use crate::TransferError;
use crate::config::RetryConfig;

/// How an error should be handled by the chunk retry loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorClass {
    /// Retry after computed backoff.
    Retryable,
    /// Retry after the server-provided delay (429 `Retry-After`).
    RetryableAfter(Duration),
    /// Surface immediately; no retry.
    Fatal,
}

/// Classifies transfer errors and computes backoff delays.
///
/// Retryable: timeout, connection failure, 5xx, 429. Everything else,
/// including expired signed URLs (403/410) and digest mismatches, is
/// fatal to the chunk attempt.
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Maximum attempts per operation, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Classifies an error as retryable or fatal.
    pub fn classify(&self, err: &TransferError) -> ErrorClass {
        match err {
            TransferError::RateLimited { retry_after } => match retry_after {
                Some(delay) => ErrorClass::RetryableAfter(*delay),
                None => ErrorClass::Retryable,
            },
            TransferError::Status { status, .. } if *status >= 500 => ErrorClass::Retryable,
            TransferError::Http(e) if e.is_timeout() || e.is_connect() => ErrorClass::Retryable,
            _ => ErrorClass::Fatal,
        }
    }

    /// Calculates the backoff delay after a failed attempt (1-based),
    /// with ±25% jitter so many concurrent chunk workers don't retry in
    /// lockstep.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.config.initial_delay.as_secs_f64() * self.config.backoff_factor.powi(exp);
        let capped = secs.min(self.config.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.001);
        Duration::from_secs_f64(with_jitter)
    }

    /// Resolves the delay before the next attempt, or `None` when the
    /// error is fatal or attempts are exhausted.
    pub fn delay_before_retry(&self, err: &TransferError, attempt: u32) -> Option<Duration> {
        if attempt >= self.config.max_attempts {
            return None;
        }
        match self.classify(err) {
            ErrorClass::Retryable => Some(self.next_delay(attempt)),
            ErrorClass::RetryableAfter(delay) => Some(delay),
            ErrorClass::Fatal => None,
        }
    }
}
