//! Exponential backoff policy for per-file download retries

use std::time::Duration;

use crate::config::net_config;
use crate::error::FetchError;

/// Exponential backoff parameters.
///
/// `backoff(n) = min(initial · multiplier^n, max)`, deterministic (no jitter).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Policy from the environment snapshot: initial 1s, cap 60s,
    /// multiplier and attempt count from `DATAFINANCE_NETWORK_*`.
    pub fn from_env() -> Self {
        let cfg = net_config();
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: cfg.backoff_multiplier,
            max_retries: cfg.max_retries,
        }
    }

    /// Delay before retry number `retry_count` (0-based).
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = self.multiplier.powi(retry_count as i32);
        let secs = self.initial_backoff.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: 5,
        }
    }
}

/// Retry a fallible fetch with exponential backoff.
///
/// Sleeps `backoff(n)` between attempts on retryable errors, up to
/// `max_retries` retries. Returns the first success or the last error.
pub fn retry_with_backoff<T>(
    policy: &RetryPolicy,
    label: &str,
    mut attempt_fn: impl FnMut() -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_retries && e.is_retryable() => {
                let delay = policy.backoff(attempt);
                attempt += 1;
                log::warn!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying in {:.1}s",
                    policy.max_retries,
                    delay.as_secs_f64()
                );
                std::thread::sleep(delay);
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_retries: 5,
        }
    }

    #[test]
    fn backoff_doubles() {
        let p = policy();
        assert_eq!(p.backoff(0), Duration::from_secs(1));
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        assert_eq!(p.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_capped_at_max() {
        let p = policy();
        assert_eq!(p.backoff(10), Duration::from_secs(60));
        assert_eq!(p.backoff(30), Duration::from_secs(60));
    }

    #[test]
    fn backoff_monotonic_up_to_cap() {
        let p = policy();
        for n in 0..12 {
            assert!(p.backoff(n + 1) >= p.backoff(n));
            assert!(p.backoff(n) <= p.max_backoff);
        }
    }

    #[test]
    fn retry_returns_first_success() {
        let p = RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            ..policy()
        };
        let mut calls = 0;
        let result = retry_with_backoff(&p, "test", || {
            calls += 1;
            if calls < 3 {
                Err(FetchError::Http {
                    status: Some(503),
                    message: "unavailable".to_string(),
                })
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_stops_on_terminal_error() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff(&policy(), "test", || {
            calls += 1;
            Err(FetchError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "denied",
            )))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_exhausts_attempts() {
        let p = RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_retries: 2,
            ..policy()
        };
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff(&p, "test", || {
            calls += 1;
            Err(FetchError::Timeout {
                message: "stalled".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 3); // initial + 2 retries
    }
}
