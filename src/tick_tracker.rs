//! Drift-free tick scheduling
//!
//! A [`TickTracker`] counts how many fixed-size ticks have elapsed since it was started.
//! Every poll recomputes the total from the absolute elapsed time instead of adding a
//! fixed step, so skipped or late polls never accumulate error. The compositor uses one
//! tracker to pace rendering; effects use their own trackers with different tick sizes.
//!
//! ```
//! use std::time::{Duration, Instant};
//! use fbcompose::tick_tracker::TickTracker;
//!
//! let mut tracker = TickTracker::new(Duration::from_millis(10));
//! let epoch = Instant::now();
//! tracker.start_at(epoch);
//!
//! assert_eq!(tracker.new_elapsed_ticks_at(epoch + Duration::from_millis(35)), 3);
//! assert_eq!(tracker.new_elapsed_ticks_at(epoch + Duration::from_millis(41)), 1);
//! ```

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TickTracker {
    tick_size: Duration,
    epoch: Option<Instant>,
    observed_ticks: u64,
}

impl TickTracker {
    /// Creates a stopped tracker. A zero tick size is bumped to one microsecond.
    pub fn new(tick_size: Duration) -> Self {
        Self {
            tick_size: tick_size.max(Duration::from_micros(1)),
            epoch: None,
            observed_ticks: 0,
        }
    }

    /// Tracker ticking `rate` times per second.
    pub fn with_rate(rate: u32) -> Self {
        Self::new(Duration::from_micros(1_000_000 / rate.max(1) as u64))
    }

    pub fn tick_size(&self) -> Duration {
        self.tick_size
    }

    pub fn is_running(&self) -> bool {
        self.epoch.is_some()
    }

    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    pub fn start_at(&mut self, now: Instant) {
        self.epoch = Some(now);
        self.observed_ticks = 0;
    }

    pub fn stop(&mut self) {
        self.epoch = None;
        self.observed_ticks = 0;
    }

    /// Ticks elapsed since the previous poll.
    pub fn new_elapsed_ticks(&mut self) -> u64 {
        self.new_elapsed_ticks_at(Instant::now())
    }

    pub fn new_elapsed_ticks_at(&mut self, now: Instant) -> u64 {
        let Some(epoch) = self.epoch else {
            return 0;
        };
        let total = self.ticks_since(epoch, now);
        // A clock that went backwards yields no new ticks rather than a huge delta.
        let new_ticks = total.saturating_sub(self.observed_ticks);
        self.observed_ticks = self.observed_ticks.max(total);
        new_ticks
    }

    /// Total ticks since `start()`, without consuming them.
    pub fn total_elapsed_ticks(&self) -> u64 {
        self.total_elapsed_ticks_at(Instant::now())
    }

    pub fn total_elapsed_ticks_at(&self, now: Instant) -> u64 {
        self.epoch.map_or(0, |epoch| self.ticks_since(epoch, now))
    }

    fn ticks_since(&self, epoch: Instant, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(epoch);
        (elapsed.as_nanos() / self.tick_size.as_nanos()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_stopped_tracker_reports_nothing() {
        let mut tracker = TickTracker::new(ms(10));
        assert!(!tracker.is_running());
        assert_eq!(tracker.new_elapsed_ticks(), 0);
        assert_eq!(tracker.total_elapsed_ticks(), 0);
    }

    #[test]
    fn test_missed_polls_do_not_drift() {
        let mut tracker = TickTracker::new(ms(10));
        let epoch = Instant::now();
        tracker.start_at(epoch);

        // Irregular polling still adds up to the absolute tick count.
        let mut sum = 0;
        for t in [3, 9, 14, 27, 29, 58, 101] {
            sum += tracker.new_elapsed_ticks_at(epoch + ms(t));
        }
        assert_eq!(sum, 10);
        assert_eq!(tracker.total_elapsed_ticks_at(epoch + ms(101)), 10);
    }

    #[test]
    fn test_backward_jump_clamps_to_zero() {
        let mut tracker = TickTracker::new(ms(10));
        let epoch = Instant::now();
        tracker.start_at(epoch + ms(50));

        assert_eq!(tracker.new_elapsed_ticks_at(epoch + ms(80)), 3);
        // Earlier than the last poll and earlier than the epoch.
        assert_eq!(tracker.new_elapsed_ticks_at(epoch + ms(60)), 0);
        assert_eq!(tracker.new_elapsed_ticks_at(epoch), 0);
        // Time catching up does not replay the ticks already reported.
        assert_eq!(tracker.new_elapsed_ticks_at(epoch + ms(90)), 1);
    }

    #[test]
    fn test_restart_resets_count() {
        let mut tracker = TickTracker::new(ms(1));
        let epoch = Instant::now();
        tracker.start_at(epoch);
        assert_eq!(tracker.new_elapsed_ticks_at(epoch + ms(5)), 5);

        tracker.start_at(epoch + ms(5));
        assert_eq!(tracker.new_elapsed_ticks_at(epoch + ms(7)), 2);

        tracker.stop();
        assert_eq!(tracker.new_elapsed_ticks_at(epoch + ms(100)), 0);
    }

    #[test]
    fn test_rate_constructor() {
        let tracker = TickTracker::with_rate(50);
        assert_eq!(tracker.tick_size(), ms(20));
        assert_eq!(TickTracker::with_rate(0).tick_size(), Duration::from_secs(1));
    }
}
