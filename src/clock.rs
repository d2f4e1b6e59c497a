//! Shared session clock.
//!
//! Every generator's starting time and every recorded timestamp is measured
//! from one epoch. Peers align by adopting the elapsed time reported by the
//! hub, so each keeps a local epoch that means the same moment.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// The zero-time reference of a session.
#[derive(Clone, Copy, Debug)]
pub struct SessionClock {
    epoch: Instant,
}

impl SessionClock {
    /// A clock whose epoch is now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Seconds since the epoch.
    pub fn elapsed(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Re-zero the clock at the current instant.
    pub fn reset(&mut self) {
        self.epoch = Instant::now();
        debug!("session clock reset");
    }

    /// Align with a peer that reports `elapsed` seconds on its clock.
    pub fn adopt(&mut self, elapsed: f64) {
        let now = Instant::now();
        let offset = Duration::try_from_secs_f64(elapsed.max(0.0)).unwrap_or_default();
        // An epoch before the process started cannot be represented on every
        // platform; fall back to now in that case.
        self.epoch = now.checked_sub(offset).unwrap_or(now);
        debug!(elapsed, "adopted session clock");
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_follows_time_and_reset_rezeros() {
        let mut clock = SessionClock::new();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!((clock.elapsed() - 1.5).abs() < 1e-9);

        clock.reset();
        assert_eq!(clock.elapsed(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn adopt_sets_elapsed() {
        tokio::time::advance(Duration::from_secs(60)).await;
        let mut clock = SessionClock::new();
        clock.adopt(42.25);
        assert!((clock.elapsed() - 42.25).abs() < 1e-9);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!((clock.elapsed() - 42.5).abs() < 1e-9);
    }
}
