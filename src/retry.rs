//! Retry policy for network operations.
//!
//! Transient failures (connection errors, timeouts, stalled transfers) back
//! off exponentially with jitter for `attempts` tries, then move into an
//! extended cooldown window (`cooldown_base + n * cooldown_step`) for
//! `cooldown_attempts` more tries before giving up. Rate-limited responses
//! are always retried, honoring the server-suggested delay when present.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

/// Backoff schedule shared by the catalog client and the transfer primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Regular backoff attempts
    pub attempts: u32,
    /// Delay of the first retry; doubles on each further failure
    pub base_delay: Duration,
    /// Extra attempts made during the extended cooldown
    pub cooldown_attempts: u32,
    /// Minimum delay once in the cooldown window
    pub cooldown_base: Duration,
    /// Added to the cooldown delay for each further cooldown attempt
    pub cooldown_step: Duration,
    /// Relative jitter applied to exponential delays (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(5),
            cooldown_attempts: 3,
            cooldown_base: Duration::from_secs(30),
            cooldown_step: Duration::from_secs(15),
            jitter: 0.2,
        }
    }
}

/// How long to wait before the next try, and which phase we are in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Regular(Duration),
    Cooldown(Duration),
}

impl Backoff {
    pub fn delay(self) -> Duration {
        match self {
            Backoff::Regular(d) | Backoff::Cooldown(d) => d,
        }
    }
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryable {
    /// Terminal, return the error immediately
    No,
    /// Connection failure, timeout, stall
    Transient,
    /// Server asked us to slow down
    RateLimited(Option<Duration>),
}

/// Outcome of [`RetryPolicy::run`] when the operation never succeeded.
#[derive(Debug)]
pub enum RetryError<E> {
    /// A non-retryable error
    Fatal(E),
    /// Transient errors persisted through the whole schedule
    Exhausted { attempts: u32, last: E },
}

/// `Retry-After` in whole seconds; HTTP dates are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

impl RetryPolicy {
    /// A policy that never sleeps; handy for tests.
    pub fn immediate(attempts: u32, cooldown_attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
            cooldown_attempts,
            cooldown_base: Duration::ZERO,
            cooldown_step: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay after `failures` consecutive transient failures (1-based).
    ///
    /// Returns `None` once both the regular and the cooldown budgets are spent.
    pub fn transient_delay(&self, failures: u32) -> Option<Backoff> {
        if failures == 0 {
            return Some(Backoff::Regular(Duration::ZERO));
        }
        if failures <= self.attempts {
            return Some(Backoff::Regular(self.exponential(failures)));
        }
        if failures <= self.attempts + self.cooldown_attempts {
            return Some(Backoff::Cooldown(self.cooldown(failures)));
        }
        None
    }

    /// Delay after `failures` consecutive rate-limited responses. Never gives up.
    pub fn rate_limit_delay(&self, failures: u32, retry_after: Option<Duration>) -> Backoff {
        let scheduled = if failures <= self.attempts {
            Backoff::Regular(self.exponential(failures.max(1)))
        } else {
            Backoff::Cooldown(self.cooldown(failures))
        };
        match retry_after {
            Some(server) => match scheduled {
                Backoff::Regular(_) => Backoff::Regular(server),
                Backoff::Cooldown(d) => Backoff::Cooldown(d.max(server)),
            },
            None => scheduled,
        }
    }

    fn exponential(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exp);
        if self.jitter <= 0.0 || raw.is_zero() {
            return raw;
        }
        let factor = 1.0 + self.jitter * rand::rng().random_range(-1.0..=1.0);
        raw.mul_f64(factor.max(0.0))
    }

    fn cooldown(&self, failures: u32) -> Duration {
        let step = failures.saturating_sub(self.attempts + 1);
        let extended = self.cooldown_base + self.cooldown_step.saturating_mul(step);
        self.exponential(failures).max(extended)
    }

    /// Run `op` until it succeeds, fails fatally, or the schedule is spent.
    ///
    /// `op` receives the zero-based attempt number.
    pub async fn run<F, Fut, T, E>(
        &self,
        label: &str,
        mut op: F,
        classify: impl Fn(&E) -> Retryable,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut transient_failures = 0u32;
        let mut rate_limited = 0u32;
        let mut attempt = 0u32;

        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            attempt += 1;

            let backoff = match classify(&err) {
                Retryable::No => return Err(RetryError::Fatal(err)),
                Retryable::Transient => {
                    transient_failures += 1;
                    match self.transient_delay(transient_failures) {
                        Some(b) => b,
                        None => {
                            warn!("{} failed after {} attempts: {}", label, attempt, err);
                            return Err(RetryError::Exhausted {
                                attempts: attempt,
                                last: err,
                            });
                        }
                    }
                }
                Retryable::RateLimited(retry_after) => {
                    rate_limited += 1;
                    self.rate_limit_delay(rate_limited, retry_after)
                }
            };

            match backoff {
                Backoff::Regular(d) => info!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:.1}s",
                    label,
                    attempt,
                    self.attempts,
                    err,
                    d.as_secs_f64()
                ),
                Backoff::Cooldown(d) => warn!(
                    "{} still failing after {} attempts: {}. Extended cooldown: waiting {:.1}s",
                    label,
                    attempt,
                    err,
                    d.as_secs_f64()
                ),
            }
            tokio::time::sleep(backoff.delay()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_exponential_schedule() {
        let policy = no_jitter();
        assert_eq!(
            policy.transient_delay(1),
            Some(Backoff::Regular(Duration::from_secs(5)))
        );
        assert_eq!(
            policy.transient_delay(2),
            Some(Backoff::Regular(Duration::from_secs(10)))
        );
        assert_eq!(
            policy.transient_delay(3),
            Some(Backoff::Regular(Duration::from_secs(20)))
        );
    }

    #[test]
    fn test_cooldown_then_exhaustion() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            ..no_jitter()
        };
        // 4th failure enters the cooldown window at 30s
        assert_eq!(
            policy.transient_delay(4),
            Some(Backoff::Cooldown(Duration::from_secs(30)))
        );
        assert_eq!(
            policy.transient_delay(5),
            Some(Backoff::Cooldown(Duration::from_secs(45)))
        );
        assert_eq!(
            policy.transient_delay(6),
            Some(Backoff::Cooldown(Duration::from_secs(60)))
        );
        assert_eq!(policy.transient_delay(7), None);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let d = policy.transient_delay(1).unwrap().delay();
            assert!(d >= Duration::from_secs(4) && d <= Duration::from_secs(6));
        }
    }

    #[test]
    fn test_rate_limit_honors_server_delay() {
        let policy = no_jitter();
        assert_eq!(
            policy.rate_limit_delay(1, Some(Duration::from_secs(2))),
            Backoff::Regular(Duration::from_secs(2))
        );
        assert_eq!(
            policy.rate_limit_delay(1, None),
            Backoff::Regular(Duration::from_secs(5))
        );
        // Past the regular budget, rate limits keep going with the cooldown
        assert!(matches!(policy.rate_limit_delay(10, None), Backoff::Cooldown(_)));
    }

    #[tokio::test]
    async fn test_run_retries_transient_then_succeeds() {
        let policy = RetryPolicy::immediate(3, 0);
        let calls = AtomicU32::new(0);

        let result: Result<u32, RetryError<String>> = policy
            .run(
                "flaky",
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err("timeout".to_string())
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |_| Retryable::Transient,
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_returns_fatal_immediately() {
        let policy = RetryPolicy::immediate(3, 3);
        let calls = AtomicU32::new(0);

        let result: Result<(), RetryError<String>> = policy
            .run(
                "broken",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("bad manifest".to_string()) }
                },
                |_| Retryable::No,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_exhausts_budget() {
        let policy = RetryPolicy::immediate(2, 1);

        let result: Result<(), RetryError<String>> = policy
            .run(
                "dead host",
                |_| async { Err("connection refused".to_string()) },
                |_| Retryable::Transient,
            )
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                // 1 initial + 2 regular + 1 cooldown
                assert_eq!(attempts, 4);
                assert_eq!(last, "connection refused");
            }
            other => panic!("expected exhaustion, got {:?}", other.map(|_| ())),
        }
    }
}
