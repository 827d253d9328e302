use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, warn};

/// Remaining API budget as reported by the hosting platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
}

/// Blocks the walk until the API quota resets when it is nearly spent
#[derive(Debug, Clone)]
pub struct RateGovernor {
    min_remaining: u64,
    /// Added to the reset time to absorb clock skew with the platform
    reset_margin: Duration,
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(5 * 60))
    }
}

impl RateGovernor {
    pub fn new(min_remaining: u64, reset_margin: Duration) -> Self {
        Self {
            min_remaining,
            reset_margin,
        }
    }

    /// How long to wait given `status` at wall-clock time `now`, if at all
    pub fn delay_for(&self, status: &QuotaStatus, now: DateTime<Utc>) -> Option<Duration> {
        if status.remaining >= self.min_remaining {
            return None;
        }

        // A reset time already in the past only leaves the margin
        let until_reset = (status.reset_at - now).to_std().unwrap_or(Duration::ZERO);
        Some(until_reset + self.reset_margin)
    }

    /// Sleep until the quota resets if it is nearly exhausted.
    ///
    /// Returns the delay that was waited out.
    pub async fn check_and_wait(&self, status: &QuotaStatus) -> Option<Duration> {
        let delay = self.delay_for(status, Utc::now())?;

        warn!(
            remaining = status.remaining,
            limit = status.limit,
            "API rate limit expended. Used {} of {}. Delay {:?}",
            status.limit.saturating_sub(status.remaining),
            status.limit,
            delay
        );

        tokio::time::sleep(delay).await;
        Some(delay)
    }

    /// Record a quota reading taken mid-walk. Never blocks.
    pub fn observe(&self, status: &QuotaStatus) {
        if status.remaining < self.min_remaining {
            warn!(
                "API quota nearly exhausted mid-walk: {} of {} remaining, resets at {}",
                status.remaining, status.limit, status.reset_at
            );
        } else {
            debug!(
                "API quota: {} of {} remaining",
                status.remaining, status.limit
            );
        }
    }
}
