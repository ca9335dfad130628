//! Wall-clock bookkeeping
//!
//! Timers live in their trails as remaining microseconds. This module only
//! tracks the smallest of them, how late the current tick is, and the
//! minimum that was active when the tick started. The update order is part
//! of the observable behavior: several timers expiring in one tick are
//! compensated one after another exactly as below.

/// Sentinel for "no timer pending".
pub const INACTIVE: i32 = i32::MAX;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WallClock {
    late: i32,
    min: i32,
    min_tmp: i32,
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            late: 0,
            min: INACTIVE,
            min_tmp: INACTIVE,
        }
    }

    /// Smallest pending remaining time, if any timer is armed.
    pub fn minimum(&self) -> Option<i32> {
        (self.min != INACTIVE).then_some(self.min)
    }

    /// How far past its deadline the current tick fired.
    pub fn lateness(&self) -> i32 {
        self.late
    }

    /// Contribute `dt` to the minimum. True if it became the new minimum.
    pub fn lower(&mut self, dt: i32) -> bool {
        if self.min > dt {
            self.min = dt;
            true
        } else {
            false
        }
    }

    /// Value to store for a timer armed for `dt`, compensated for lateness,
    /// and whether the driver must be told about a new minimum.
    pub fn arm(&mut self, dt: i32) -> (i32, Option<i32>) {
        let t = dt.saturating_sub(self.late);
        let notify = self.lower(t).then_some(t);
        (t, notify)
    }

    /// Whether a timer with `*t` remaining fires on a tick of `dt`. A timer
    /// that keeps waiting is decremented and re-contributes silently.
    pub fn expired(&mut self, t: &mut i32, dt: i32) -> bool {
        if *t > self.min_tmp || *t > dt {
            *t = t.saturating_sub(dt);
            self.lower(*t);
            false
        } else {
            true
        }
    }

    pub fn begin_tick(&mut self, dt: i32) {
        if self.min <= dt {
            self.late = dt.saturating_sub(self.min);
        }
        self.min_tmp = self.min;
        self.min = INACTIVE;
    }

    /// Minimum to report after the tick pass.
    pub fn end_tick(&mut self) -> Option<i32> {
        self.late = 0;
        self.minimum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_lowers_minimum_once() {
        let mut clk = WallClock::new();
        assert_eq!(clk.minimum(), None);
        assert_eq!(clk.arm(100), (100, Some(100)));
        assert_eq!(clk.arm(300), (300, None));
        assert_eq!(clk.arm(50), (50, Some(50)));
        assert_eq!(clk.minimum(), Some(50));
    }

    #[test]
    fn test_tick_exactly_on_deadline() {
        let mut clk = WallClock::new();
        let (mut t, _) = clk.arm(100);

        clk.begin_tick(100);
        assert_eq!(clk.lateness(), 0);
        assert!(clk.expired(&mut t, 100));
        assert_eq!(clk.end_tick(), None);
    }

    #[test]
    fn test_short_tick_decrements() {
        let mut clk = WallClock::new();
        let (mut t, _) = clk.arm(100);

        clk.begin_tick(40);
        assert!(!clk.expired(&mut t, 40));
        assert_eq!(t, 60);
        assert_eq!(clk.end_tick(), Some(60));
    }

    #[test]
    fn test_late_tick_compensates_next_arm() {
        let mut clk = WallClock::new();
        let (mut t, _) = clk.arm(100);

        clk.begin_tick(130);
        assert_eq!(clk.lateness(), 30);
        assert!(clk.expired(&mut t, 130));
        // re-armed inside the expiring body
        let (next, notify) = clk.arm(100);
        assert_eq!(next, 70);
        assert_eq!(notify, Some(70));
        assert_eq!(clk.end_tick(), Some(70));
        assert_eq!(clk.lateness(), 0);
    }

    #[test]
    fn test_only_the_minimum_expires_per_tick() {
        let mut clk = WallClock::new();
        let (mut a, _) = clk.arm(10);
        let (mut b, _) = clk.arm(20);

        clk.begin_tick(30);
        assert_eq!(clk.lateness(), 20);
        assert!(clk.expired(&mut a, 30));
        assert!(!clk.expired(&mut b, 30));
        assert_eq!(b, -10);
        assert_eq!(clk.end_tick(), Some(-10));

        clk.begin_tick(0);
        assert_eq!(clk.lateness(), 10);
        assert!(clk.expired(&mut b, 0));
        assert_eq!(clk.end_tick(), None);
    }
}
