//! Fixed inter-request pacing toward upstream APIs.
//!
//! Deliberately not a token bucket: upstream quotas here are coarse
//! per-minute budgets, and a constant delay between requests is enough to
//! stay under them.

use std::time::Duration;

use tokio::time::Instant;

/// Spaces consecutive requests by a fixed delay derived from a
/// requests-per-minute budget.
#[derive(Debug)]
pub struct RequestPacer {
    delay: Duration,
    next_at: Option<Instant>,
    requests: u64,
}

impl RequestPacer {
    /// `requests_per_minute` must be at least 1; config validation
    /// guarantees this before a pacer is built.
    #[must_use]
    pub fn from_rpm(requests_per_minute: u64) -> Self {
        let rpm = requests_per_minute.max(1);
        Self {
            delay: Duration::from_secs_f64(60.0 / rpm as f64),
            next_at: None,
            requests: 0,
        }
    }

    /// Sleep until the next request slot. The first call never sleeps.
    pub async fn pace(&mut self) {
        if let Some(next_at) = self.next_at {
            let now = Instant::now();
            if next_at > now {
                tokio::time::sleep(next_at - now).await;
            }
        }
        self.next_at = Some(Instant::now() + self.delay);
        self.requests += 1;
    }

    /// Requests paced so far, reported in run summaries.
    #[must_use]
    pub fn requests_made(&self) -> u64 {
        self.requests
    }
}
