//! Backoff arithmetic and cancellable sleeps for retry loops.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backoff strategy for retry loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: delay doubles each retry, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay to wait after the given 1-based attempt has failed.
    ///
    /// For `Exponential` this is `min(initial * 2^(attempt-1), max)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { initial, max } => {
                let exponent = attempt.saturating_sub(1).min(31);
                initial
                    .checked_mul(1u32 << exponent)
                    .map_or(*max, |d| std::cmp::min(d, *max))
            }
        }
    }
}

/// Outcome of [`sleep_or_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Cancelled,
}

/// Sleeps for `delay` unless `cancel` fires first.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> SleepOutcome {
    if cancel.is_cancelled() {
        return SleepOutcome::Cancelled;
    }
    tokio::select! {
        _ = cancel.cancelled() => {
            debug!(delay_ms = delay.as_millis() as u64, "sleep interrupted by cancellation");
            SleepOutcome::Cancelled
        }
        _ = tokio::time::sleep(delay) => SleepOutcome::Elapsed,
    }
}
