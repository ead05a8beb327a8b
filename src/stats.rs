//! Statistics and single-shot error registers (spec §4.8 / C8).

use std::time::{Duration, Instant};

/// Per-zone counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneStats {
    pub span_zones_read: u32,
    pub span_zones_write: u32,
    pub unaligned_write: u32,
    pub extra_write_total: u64,
    pub write_total: u64,
}

/// Device-wide counters and idle-time tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateStats {
    pub idle_time_min_s: u64,
    pub idle_time_max_s: u64,
    pub total_writes: u64,
    pub total_extra_writes: u64,
}

impl Default for AggregateStats {
    fn default() -> Self {
        AggregateStats {
            idle_time_min_s: u64::MAX,
            idle_time_max_s: 0,
            total_writes: 0,
            total_extra_writes: 0,
        }
    }
}

impl AggregateStats {
    /// Folds the gap since the last recorded activity into the running
    /// idle-time min/max. Called once per incoming block request or ioctl,
    /// as the original module does at the top of its request handler.
    pub fn note_activity(&mut self, idle: Duration) {
        let idle_s = idle.as_secs();
        self.idle_time_max_s = self.idle_time_max_s.max(idle_s);
        self.idle_time_min_s = self.idle_time_min_s.min(idle_s);
    }

    pub fn reset(&mut self) {
        *self = AggregateStats::default();
    }
}

/// Tracks the timestamp of the last observed activity, so idle time can be
/// computed on the next one. Kept outside `AggregateStats` because `Instant`
/// has no meaningful on-disk representation.
#[derive(Debug, Clone, Copy)]
pub struct ActivityClock {
    last: Option<Instant>,
}

impl Default for ActivityClock {
    fn default() -> Self {
        ActivityClock { last: None }
    }
}

impl ActivityClock {
    /// Records activity "now" and returns the idle gap since the previous
    /// call (zero on the first call).
    pub fn tick(&mut self, now: Instant) -> Duration {
        let idle = self.last.map(|l| now.saturating_duration_since(l)).unwrap_or_default();
        self.last = Some(now);
        idle
    }
}

/// A single-shot error register: reading it returns the stored value and
/// clears it, per spec §4.8.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastErrorRegister(u32);

impl LastErrorRegister {
    pub fn set(&mut self, code: u32) {
        self.0 = code;
    }

    /// Returns and clears the stored value.
    pub fn take(&mut self) -> u32 {
        std::mem::take(&mut self.0)
    }

    pub fn peek(&self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_register_clears_on_read() {
        let mut reg = LastErrorRegister::default();
        reg.set(7);
        assert_eq!(reg.take(), 7);
        assert_eq!(reg.take(), 0);
    }

    #[test]
    fn idle_min_max_track_extremes() {
        let mut stats = AggregateStats::default();
        stats.note_activity(Duration::from_secs(5));
        stats.note_activity(Duration::from_secs(1));
        stats.note_activity(Duration::from_secs(9));
        assert_eq!(stats.idle_time_min_s, 1);
        assert_eq!(stats.idle_time_max_s, 9);
    }

    #[test]
    fn activity_clock_first_tick_is_zero_idle() {
        let mut clock = ActivityClock::default();
        let now = Instant::now();
        assert_eq!(clock.tick(now), Duration::ZERO);
    }
}
