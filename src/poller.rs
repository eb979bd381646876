//! Convergence polling of a server-side counter
//!
//! Captures a baseline, then samples again until the value is strictly
//! greater or the attempt budget runs out. The delay between attempts is
//! fixed; the pool's block cadence is external, so there is no backoff.
//! Transport and schema failures abort the poll at once and never consume
//! budget.

use crate::client::WebUiClient;
use crate::schema::describe;
use crate::{Error, PollResult, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Something that yields the current value of a monotonically non-decreasing counter
#[async_trait]
pub trait CounterSource: Send + Sync {
    /// Name of the counter, for logs and errors
    fn key(&self) -> &str;

    /// Fetch the current value
    async fn sample(&self) -> Result<i64>;
}

/// Pause between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Attempt count and fixed delay of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    max_attempts: u32,
    delay: Duration,
}

impl PollBudget {
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::config("Poll budget needs at least one attempt"));
        }
        Ok(Self {
            max_attempts,
            delay,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for PollBudget {
    /// 60 attempts one minute apart
    fn default() -> Self {
        Self {
            max_attempts: 60,
            delay: Duration::from_secs(60),
        }
    }
}

/// Polls a [`CounterSource`] until it advances past its baseline
pub struct ConvergencePoller<S = TokioSleeper> {
    budget: PollBudget,
    sleeper: S,
}

impl ConvergencePoller<TokioSleeper> {
    pub fn new(budget: PollBudget) -> Self {
        Self::with_sleeper(budget, TokioSleeper)
    }
}

impl<S: Sleeper> ConvergencePoller<S> {
    pub fn with_sleeper(budget: PollBudget, sleeper: S) -> Self {
        Self { budget, sleeper }
    }

    pub fn budget(&self) -> PollBudget {
        self.budget
    }

    /// Sample a baseline, then poll until a strictly greater value shows up.
    ///
    /// Returns `succeeded = true` on the first attempt that observes a value
    /// above the baseline, or `succeeded = false` with `attempts_used ==
    /// max_attempts` once every attempt saw a value at or below it.
    #[instrument(skip(self, source), fields(key = source.key()))]
    pub async fn poll_until_advanced(&self, source: &dyn CounterSource) -> Result<PollResult> {
        let baseline = source.sample().await?;
        info!(
            "Baseline {} = {}, polling up to {} times every {:?}",
            source.key(),
            baseline,
            self.budget.max_attempts,
            self.budget.delay
        );

        let mut last = baseline;
        for attempt in 1..=self.budget.max_attempts {
            last = source.sample().await?;

            if last > baseline {
                info!("{} advanced {} -> {} on attempt {}", source.key(), baseline, last, attempt);
                return Ok(PollResult {
                    succeeded: true,
                    baseline,
                    final_value: last,
                    attempts_used: attempt,
                });
            }

            if last < baseline {
                warn!("{} went backwards: {} < baseline {}", source.key(), last, baseline);
            }

            if attempt < self.budget.max_attempts {
                debug!(
                    "Attempt {}/{}: {} still {}, sleeping {:?}",
                    attempt,
                    self.budget.max_attempts,
                    source.key(),
                    last,
                    self.budget.delay
                );
                self.sleeper.sleep(self.budget.delay).await;
            }
        }

        warn!(
            "{} did not advance past {} in {} attempts",
            source.key(),
            baseline,
            self.budget.max_attempts
        );
        Ok(PollResult {
            succeeded: false,
            baseline,
            final_value: last,
            attempts_used: self.budget.max_attempts,
        })
    }
}

/// Integer counter read from the pool's `/stats` payload
pub struct StatsCounter {
    client: WebUiClient,
    key: String,
}

impl StatsCounter {
    pub fn new(client: WebUiClient, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }
}

#[async_trait]
impl CounterSource for StatsCounter {
    fn key(&self) -> &str {
        &self.key
    }

    async fn sample(&self) -> Result<i64> {
        let stats = self.client.get_stats(None).await?;
        let value = stats
            .get(&self.key)
            .ok_or_else(|| Error::schema(&self.key, "integer", "missing"))?;
        value
            .as_i64()
            .ok_or_else(|| Error::schema(&self.key, "integer", describe(value)))
    }
}
