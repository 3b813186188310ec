//! Exponential backoff with jitter
//!
//! Every network-touching operation in this crate runs inside
//! [`Retrier::retry_with_backoff`]. An attempt reports its outcome through
//! [`ControlFlow`]: `Break(Ok(v))` finishes with a value, `Break(Err(e))`
//! bails with a non-retriable error, and `Continue(e)` hands the error to the
//! retrier for another round. Throwing and bailing are independent channels;
//! an attempt picks one per error.
//!
//! See <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>

use rand::prelude::*;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Retry policy shared by every operation of a cluster.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// First backoff interval, before jitter.
    pub initial_retry_time: Duration,

    /// Upper bound for a single backoff interval and for the total time spent
    /// retrying one operation.
    pub max_retry_time: Duration,

    /// Per-attempt exponential growth.
    pub multiplier: f64,

    /// Linear scaling applied to every interval.
    pub factor: f64,

    /// Attempts after the first one.
    pub retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_retry_time: Duration::from_millis(300),
            max_retry_time: Duration::from_secs(30),
            multiplier: 2.,
            factor: 1.,
            retries: 5,
        }
    }
}

/// Attempt context handed to the closure on every round.
#[derive(Debug, Clone, Copy)]
pub struct Attempt {
    /// Zero-based attempt counter.
    pub count: u32,

    /// Time spent in this retry loop so far.
    pub elapsed: Duration,
}

/// [`Backoff`] can be created from a [`RetryConfig`]
///
/// Consecutive calls to [`Backoff::next`] will return the next backoff
/// interval: `min(max, initial * multiplier^attempt * factor * rand(0.5..1.0))`.
pub struct Backoff {
    initial_secs: f64,
    max_secs: f64,
    multiplier: f64,
    factor: f64,
    attempt: i32,
    rng: Option<Box<dyn RngCore + Sync + Send>>,
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("initial_secs", &self.initial_secs)
            .field("max_secs", &self.max_secs)
            .field("multiplier", &self.multiplier)
            .field("factor", &self.factor)
            .field("attempt", &self.attempt)
            .finish()
    }
}

impl Backoff {
    /// Create a new [`Backoff`] from the provided [`RetryConfig`]
    pub fn new(config: &RetryConfig) -> Self {
        Self::new_with_rng(config, None)
    }

    /// Creates a new `Backoff` with the optional `rng`
    ///
    /// Uses [`rand::thread_rng()`] if no rng provided
    pub fn new_with_rng(
        config: &RetryConfig,
        rng: Option<Box<dyn RngCore + Sync + Send>>,
    ) -> Self {
        Self {
            initial_secs: config.initial_retry_time.as_secs_f64(),
            max_secs: config.max_retry_time.as_secs_f64(),
            multiplier: config.multiplier,
            factor: config.factor,
            attempt: 0,
            rng,
        }
    }

    /// Returns the next backoff duration to wait for
    fn next(&mut self) -> Duration {
        let unjittered = self.initial_secs * self.multiplier.powi(self.attempt) * self.factor;
        self.attempt += 1;

        let range = 0.5..1.0;
        let jitter = match self.rng.as_mut() {
            Some(rng) => rng.gen_range(range),
            None => thread_rng().gen_range(range),
        };

        Duration::from_secs_f64(self.max_secs.min(unjittered * jitter))
    }
}

/// Runs attempt closures under a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct Retrier {
    config: RetryConfig,
}

impl Retrier {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Perform an async operation that retries with a backoff
    ///
    /// Retries stop once the attempt count exceeds `retries` or the elapsed
    /// retry time exceeds `max_retry_time`; the last error is then surfaced
    /// unchanged.
    pub async fn retry_with_backoff<F, F1, B, E>(&self, request_name: &str, do_stuff: F) -> Result<B, E>
    where
        F: (Fn(Attempt) -> F1) + Send + Sync,
        F1: std::future::Future<Output = ControlFlow<Result<B, E>, E>> + Send,
        E: std::error::Error + Send,
    {
        let mut backoff = Backoff::new(&self.config);
        let started_at = Instant::now();
        let mut count = 0;

        loop {
            let attempt = Attempt {
                count,
                elapsed: started_at.elapsed(),
            };

            // split match statement from `tokio::time::sleep`, because otherwise rustc requires `B: Send`
            let sleep_time = match do_stuff(attempt).await {
                ControlFlow::Break(r) => {
                    break r;
                }
                ControlFlow::Continue(e) => {
                    let elapsed = started_at.elapsed();
                    if count >= self.config.retries || elapsed >= self.config.max_retry_time {
                        warn!(
                            e=%e,
                            request_name,
                            attempts = count + 1,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "retries exhausted - surfacing last error",
                        );
                        break Err(e);
                    }

                    let backoff = backoff.next();
                    info!(
                        e=%e,
                        request_name,
                        backoff_secs = backoff.as_secs(),
                        "request encountered non-fatal error - backing off",
                    );
                    backoff
                }
            };

            tokio::time::sleep(sleep_time).await;
            count += 1;
        }
    }
}
