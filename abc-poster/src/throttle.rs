use backoff::exponential::ExponentialBackoff;
use backoff::SystemClock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum gap between the starts of consecutive backend calls.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: None,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Waits until the interval since the previous call has elapsed, then marks
    /// a new call as started.
    pub async fn acquire(&mut self) {
        if let Some(last_call) = self.last_call {
            let elapsed = last_call.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }
        self.last_call = Some(Instant::now());
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

/// Exponential schedule for transient retries: starts at `retry_delay_ms`,
/// doubles, caps at 32x the start and never gives up on its own (the retry
/// ceiling is enforced by the caller).
pub fn retry_backoff(retry_delay_ms: u64) -> ExponentialBackoff<SystemClock> {
    let initial = Duration::from_millis(retry_delay_ms);
    ExponentialBackoff {
        current_interval: initial,
        initial_interval: initial,
        max_interval: initial * 32,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}
