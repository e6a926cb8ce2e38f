//! Bounded retry, back-off and pacing shared by every network boundary:
//! model calls, source page reads, fact upserts and aggregation pages.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Failure classification consumed by [`RetryPolicy`].
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * n` after the n-th failure.
    Linear,
    /// `base * 2^(n-1)` after the n-th failure, capped.
    Exponential { cap: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    /// Three attempts with 1s, 2s between them.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff: Backoff::Linear,
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, last: E },
    /// A non-retryable error; returned on the attempt that produced it.
    Terminal(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Terminal(e) => e,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            RetryError::Terminal(e) => write!(f, "{e}"),
        }
    }
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Linear,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Exponential { cap },
        }
    }

    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    pub fn delay_after(&self, failures: u32) -> Duration {
        let n = failures.max(1);
        match self.backoff {
            Backoff::Linear => self.base_delay * n,
            Backoff::Exponential { cap } => {
                let factor = 2u32.saturating_pow(n - 1);
                self.base_delay.saturating_mul(factor).min(cap)
            }
        }
    }

    /// Run `operation` until it succeeds, fails terminally, or the attempt
    /// budget is spent. Sleeps between attempts per the back-off.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, RetryError<E>>
    where
        E: Transient + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => return Err(RetryError::Terminal(err)),
                Err(err) if attempt >= max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Deliberate pause after every `every` pages, independent of failures.
#[derive(Debug, Clone)]
pub struct Pacer {
    every: usize,
    pause: Duration,
    pages: usize,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100))
    }
}

impl Pacer {
    pub fn new(every: usize, pause: Duration) -> Self {
        Self {
            every,
            pause,
            pages: 0,
        }
    }

    /// Record one processed page; sleeps when a pacing boundary is crossed.
    /// Returns whether it paused.
    pub async fn tick(&mut self) -> bool {
        self.pages += 1;
        if self.every == 0 || self.pause.is_zero() || self.pages % self.every != 0 {
            return false;
        }
        debug!(pages = self.pages, pause_ms = self.pause.as_millis() as u64, "Pacing pause");
        tokio::time::sleep(self.pause).await;
        true
    }

    pub fn pages(&self) -> usize {
        self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "transient={}", self.transient)
        }
    }

    impl Transient for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    #[test]
    fn linear_delays_increase_strictly() {
        let policy = RetryPolicy::linear(3, Duration::from_secs(1));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(3));
    }

    #[test]
    fn exponential_delays_are_capped() {
        let policy = RetryPolicy::exponential(8, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(4), Duration::from_secs(8));
        assert_eq!(policy.delay_after(5), Duration::from_secs(10));
        assert_eq!(policy.delay_after(30), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_two_backoffs() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let result = policy
            .run("page", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError { transient: true })
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run("upsert", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError { transient: false }) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Terminal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempt_count() {
        let result: Result<(), _> = RetryPolicy::default()
            .run("page", || async { Err(TestError { transient: true }) })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_pauses_on_every_nth_page() {
        let mut pacer = Pacer::new(5, Duration::from_millis(100));
        let mut paused = Vec::new();
        for _ in 0..10 {
            paused.push(pacer.tick().await);
        }
        assert_eq!(
            paused,
            vec![false, false, false, false, true, false, false, false, false, true]
        );
        assert_eq!(pacer.pages(), 10);
    }
}
