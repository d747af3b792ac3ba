//! Presence-track call-rate monitoring.
//!
//! A sliding-window counter over track calls. It never throttles: typing
//! updates are already suppressed outside human sessions and bounded by
//! the input debounce, so this only surfaces abuse in the logs.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::error;

/// Sliding-window call counter with a warn threshold.
pub struct TrackRateMonitor {
    window: Duration,
    threshold: usize,
    timestamps: Mutex<Vec<Instant>>,
}

impl TrackRateMonitor {
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            timestamps: Mutex::new(Vec::new()),
        }
    }

    /// Record a track call and return the current calls-per-window rate.
    /// Logs when the threshold is exceeded.
    pub fn record(&self) -> usize {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().unwrap();
        timestamps.retain(|t| now.duration_since(*t) < self.window);
        timestamps.push(now);

        let rate = timestamps.len();
        if rate > self.threshold {
            error!(
                rate,
                threshold = self.threshold,
                "Realtime track rate exceeded"
            );
        }
        rate
    }

    /// Drop all bookkeeping (channel teardown, session refresh).
    pub fn clear(&self) {
        self.timestamps.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let monitor = TrackRateMonitor::new(Duration::from_millis(1000), 10);
        for _ in 0..5 {
            monitor.record();
        }
        assert_eq!(monitor.record(), 6);

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(monitor.record(), 1); // old calls aged out
    }

    #[tokio::test]
    async fn test_clear_resets_rate() {
        let monitor = TrackRateMonitor::new(Duration::from_millis(1000), 10);
        monitor.record();
        monitor.record();
        monitor.clear();
        assert_eq!(monitor.record(), 1);
    }
}
