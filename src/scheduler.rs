//! # Rate Scheduler
//!
//! Token bucket shared by every worker of a test step. A background ticker adds
//! one token per period into a bucket holding at most one second's worth of
//! tokens; ticks that find the bucket full are dropped, so an idle period never
//! turns into an unbounded burst.
//!
//! ## Plans
//!
//! - [`RatePlan::Fixed`] with `rate > 0`: one token every `1s / rate`
//! - [`RatePlan::Fixed`] with `rate == 0`: unlimited, [`Scheduler::acquire`] never waits
//! - [`RatePlan::Ramp`]: each non-zero rate held for `step_duration`, then the
//!   bucket is closed
//!
//! [`Scheduler::shutdown`] closes the bucket: every waiting and future
//! [`Scheduler::acquire`] call returns [`Acquire::Closed`].
//!
//! ```rust,no_run
//! use voltage_loadtest::scheduler::{Acquire, RatePlan, Scheduler};
//!
//! # async fn example() {
//! let scheduler = Scheduler::start(RatePlan::Fixed { rate: 500 });
//! while scheduler.acquire().await == Acquire::Granted {
//!     // send one request
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::debug;

/// How tokens are produced over the life of a test step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatePlan {
    /// Constant rate in requests per second, 0 for unlimited
    Fixed { rate: u32 },
    /// Sequence of rates, each held for `step_duration`
    Ramp {
        rates: Vec<u32>,
        step_duration: Duration,
    },
}

impl RatePlan {
    /// Time until the plan runs out on its own, `None` if it never does
    pub fn total_duration(&self) -> Option<Duration> {
        match self {
            RatePlan::Fixed { .. } => None,
            RatePlan::Ramp {
                rates,
                step_duration,
            } => {
                let steps = rates.iter().filter(|&&rate| rate > 0).count() as u32;
                Some(step_duration.saturating_mul(steps))
            }
        }
    }
}

/// Answer to a token request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    /// The scheduler was shut down or its plan is exhausted
    Closed,
}

/// Token bucket rate limiter
#[derive(Debug)]
pub struct Scheduler {
    tokens: Arc<Semaphore>,
    unlimited: bool,
    ticker: Option<AbortHandle>,
}

/// Interval between tokens at `rate` per second
fn tick_period(rate: u32) -> Duration {
    Duration::from_nanos((1_000_000_000 / u64::from(rate)).max(1))
}

/// Add a token unless the bucket already holds `capacity`
fn deposit(tokens: &Semaphore, capacity: usize) {
    if tokens.available_permits() < capacity {
        tokens.add_permits(1);
    }
}

/// Produce tokens at `rate` until `deadline` or until the bucket is closed
async fn tick(tokens: &Semaphore, rate: u32, deadline: Option<Instant>) {
    let period = tick_period(rate);
    let capacity = rate as usize;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = sleep_until(deadline) => return,
                    _ = ticker.tick() => {}
                }
            }
            None => {
                ticker.tick().await;
            }
        }

        if tokens.is_closed() {
            return;
        }
        deposit(tokens, capacity);
    }
}

impl Scheduler {
    /// Start the token source for `plan`
    ///
    /// Must be called from within a tokio runtime unless the plan is unlimited.
    pub fn start(plan: RatePlan) -> Self {
        let tokens = Arc::new(Semaphore::new(0));

        let (unlimited, ticker) = match plan {
            RatePlan::Fixed { rate: 0 } => {
                debug!("Scheduler: unlimited rate");
                (true, None)
            }
            RatePlan::Fixed { rate } => {
                debug!("Scheduler: fixed rate {} req/s", rate);
                let source = Arc::clone(&tokens);
                let handle = tokio::spawn(async move { tick(&source, rate, None).await });
                (false, Some(handle.abort_handle()))
            }
            RatePlan::Ramp {
                rates,
                step_duration,
            } => {
                debug!(
                    "Scheduler: ramp {:?} req/s, {:?} per step",
                    rates, step_duration
                );
                let source = Arc::clone(&tokens);
                let handle = tokio::spawn(async move {
                    for rate in rates.into_iter().filter(|&rate| rate > 0) {
                        if source.is_closed() {
                            return;
                        }
                        debug!("Ramp step: {} req/s", rate);
                        let deadline = Instant::now() + step_duration;
                        tick(&source, rate, Some(deadline)).await;
                    }
                    debug!("Ramp exhausted");
                    source.close();
                });
                (false, Some(handle.abort_handle()))
            }
        };

        Self {
            tokens,
            unlimited,
            ticker,
        }
    }

    /// Wait for a token
    pub async fn acquire(&self) -> Acquire {
        if self.unlimited {
            return if self.tokens.is_closed() {
                Acquire::Closed
            } else {
                Acquire::Granted
            };
        }

        match self.tokens.acquire().await {
            Ok(permit) => {
                permit.forget();
                Acquire::Granted
            }
            Err(_) => Acquire::Closed,
        }
    }

    /// Close the token source and wake every waiter
    pub fn shutdown(&self) {
        self.tokens.close();
        if let Some(ticker) = &self.ticker {
            ticker.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tokens.is_closed()
    }

    /// Tokens currently waiting in the bucket
    pub fn available_tokens(&self) -> usize {
        self.tokens.available_permits()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(ticker) = &self.ticker {
            ticker.abort();
        }
    }
}
