//! Bounded retry with a constant inter-attempt delay.
//!
//! A failing run waits exactly `base_delay * (max_attempts - 1)` in total.

use std::time::Duration;

use crate::signals::CancelToken;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Constant delay between consecutive attempts.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no delay.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Upper bound on time spent sleeping between attempts.
    pub fn total_delay(&self) -> Duration {
        self.base_delay * self.max_attempts.max(1).saturating_sub(1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The last attempt failed with a non-retryable error or attempts ran out.
    #[error("{last}{}", attempts_note(.attempts))]
    Failed { attempts: u32, last: E },

    /// Cancellation was observed before the next attempt or during a delay.
    #[error("Cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32, last: Option<E> },
}

fn attempts_note(attempts: &u32) -> String {
    if *attempts > 1 {
        format!(" after {attempts} attempts")
    } else {
        String::new()
    }
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Failed { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` attempts have been made.
///
/// `op` receives the 1-based attempt number. Cancellation is checked before
/// every attempt and throughout each delay; a cancelled run never starts
/// another attempt.
pub fn with_retry<T, E, F>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last: Option<E> = None;
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                attempts: attempt,
                last,
            });
        }
        attempt += 1;
        let err = match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_retryable() || attempt >= max_attempts {
            return Err(RetryError::Failed {
                attempts: attempt,
                last: err,
            });
        }
        tracing::warn!(
            attempt,
            max_attempts,
            delay = ?policy.base_delay,
            "attempt failed: {err}; retrying"
        );
        last = Some(err);
        if cancel.sleep(policy.base_delay) {
            return Err(RetryError::Cancelled {
                attempts: attempt,
                last,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::errors::MountError;

    fn unreachable_err() -> MountError {
        MountError::Unreachable {
            host: "10.0.0.5".to_string(),
            detail: "no response from host".to_string(),
        }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn default_policy_is_three_attempts_five_seconds() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.base_delay, Duration::from_secs(5));
        assert_eq!(p.total_delay(), Duration::from_secs(10));
    }

    #[test]
    fn once_policy_has_no_delay() {
        assert_eq!(RetryPolicy::once().total_delay(), Duration::ZERO);
    }

    #[test]
    fn succeeds_on_first_attempt() {
        let mut calls = 0;
        let result: Result<u32, RetryError<MountError>> =
            with_retry(&fast(3), &CancelToken::new(), |n| {
                calls += 1;
                Ok(n)
            });
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = with_retry(&fast(3), &CancelToken::new(), |n| {
            calls += 1;
            if n < 3 { Err(unreachable_err()) } else { Ok(n) }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn permission_denied_is_attempted_once() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&fast(3), &CancelToken::new(), |_| {
            calls += 1;
            Err(MountError::PermissionDenied {
                detail: "mount error(13): Permission denied".to_string(),
            })
        });
        assert_eq!(calls, 1);
        match result {
            Err(RetryError::Failed { attempts, last }) => {
                assert_eq!(attempts, 1);
                assert!(matches!(last, MountError::PermissionDenied { .. }));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn exhaustion_returns_last_error_with_attempt_count() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&fast(4), &CancelToken::new(), |n| {
            calls += 1;
            Err(MountError::PortClosed {
                host: format!("attempt-{n}"),
                port: 445,
                detail: format!("connection refused on try {n}"),
            })
        });
        assert_eq!(calls, 4);
        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 4);
        assert_eq!(
            err.to_string(),
            "PortClosed: port 445 closed on host attempt-4 (connection refused on try 4) after 4 attempts"
        );
        assert!(err.to_string().contains("connection refused on try 4"));
    }

    #[test]
    fn permanent_unreachable_makes_three_attempts_over_ten_seconds() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let start = Instant::now();
        let result: Result<(), _> = with_retry(&policy, &CancelToken::new(), |_| {
            calls += 1;
            Err(unreachable_err())
        });
        let elapsed = start.elapsed();
        assert_eq!(calls, 3);
        assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(20), "elapsed {elapsed:?}");
        match result {
            Err(RetryError::Failed { attempts: 3, last }) => {
                assert!(matches!(last, MountError::Unreachable { .. }));
            }
            other => panic!("expected Failed after 3 attempts, got {other:?}"),
        }
    }

    #[test]
    fn zero_max_attempts_still_tries_once() {
        let mut calls = 0;
        let _: Result<(), _> = with_retry(&fast(0), &CancelToken::new(), |_| {
            calls += 1;
            Err(unreachable_err())
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn cancelled_before_start_makes_no_attempt() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut calls = 0;
        let result: Result<(), RetryError<MountError>> = with_retry(&fast(3), &cancel, |_| {
            calls += 1;
            Ok(())
        });
        assert_eq!(calls, 0);
        assert!(matches!(
            result,
            Err(RetryError::Cancelled { attempts: 0, .. })
        ));
    }

    #[test]
    fn cancellation_during_delay_stops_further_attempts() {
        let cancel = CancelToken::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
        };
        let mut calls = 0;
        let start = Instant::now();
        let result: Result<(), _> = with_retry(&policy, &cancel, |_| {
            calls += 1;
            // Cancel from "outside" right after the first failure.
            cancel.cancel();
            Err(unreachable_err())
        });
        assert_eq!(calls, 1);
        assert!(start.elapsed() < Duration::from_secs(5));
        match result {
            Err(RetryError::Cancelled { attempts, last }) => {
                assert_eq!(attempts, 1);
                assert!(matches!(last, Some(MountError::Unreachable { .. })));
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }
}
