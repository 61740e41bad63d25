//! Fixed-width set of virtual one-shot timers sharing one monotonic clock.

use crate::config::TIMER_COUNT;

/// No active timer expires; returned by [`TimerPack::get_next_expiration`].
pub const NO_EXPIRE: i32 = -1;

/// A fixed-size set of virtual timers, queried by id, driven by an injected
/// `now()` rather than real interrupts.
///
/// An expired timer is deactivated but left "not disabled" so that
/// [`TimerPack::is_expired`] keeps reporting `true` exactly once, until the
/// timer is restarted or explicitly stopped — mirroring a one-shot
/// hardware timer that free-runs after firing.
#[derive(Debug)]
pub struct TimerPack {
    now: u32,
    expire_at: [u32; TIMER_COUNT],
    active: [bool; TIMER_COUNT],
    disabled: [bool; TIMER_COUNT],
    /// Raised on every mutation, so a scheduler can decide whether to
    /// re-arm a hardware timer. Cleared by the caller, not by this type.
    pub timers_changed: bool,
}

impl Default for TimerPack {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerPack {
    /// Create a timer pack with every timer disabled.
    pub fn new() -> Self {
        Self {
            now: 0,
            expire_at: [0; TIMER_COUNT],
            active: [false; TIMER_COUNT],
            disabled: [true; TIMER_COUNT],
            timers_changed: false,
        }
    }

    /// Advance the shared clock. Call once per tick before polling timers.
    pub fn set_time(&mut self, now: u32) {
        self.now = now;
    }

    /// Start (or restart) `timer_id`, expiring `period_ms` from now.
    pub fn start(&mut self, timer_id: usize, period_ms: u32) {
        self.active[timer_id] = true;
        self.disabled[timer_id] = false;
        self.expire_at[timer_id] = self.now.wrapping_add(period_ms);
        self.timers_changed = true;
    }

    /// Stop `timer_id`; it reports neither active nor (newly) expired.
    pub fn stop(&mut self, timer_id: usize) {
        self.active[timer_id] = false;
        self.disabled[timer_id] = true;
        self.timers_changed = true;
    }

    /// Stop every timer id in `first..=last`.
    pub fn stop_range(&mut self, first: usize, last: usize) {
        for id in first..=last {
            self.stop(id);
        }
    }

    /// True if `timer_id` was explicitly stopped (and not since restarted).
    pub fn is_disabled(&self, timer_id: usize) -> bool {
        self.disabled[timer_id]
    }

    /// True iff the timer was active and has now reached its deadline.
    /// Consumes the expiration: a second call returns `false` until the
    /// timer is restarted.
    pub fn is_expired(&mut self, timer_id: usize) -> bool {
        if self.active[timer_id] {
            if time_diff(self.expire_at[timer_id], self.now) <= 0 {
                self.deactivate(timer_id);
                return true;
            }
            return false;
        }
        // Not active but not disabled: already reported expired once.
        !self.disabled[timer_id]
    }

    /// Deactivate every timer that has reached its deadline, without
    /// requiring a later [`Self::is_expired`] call per id. Used by the task
    /// loop to bound the number of active timers it rechecks.
    pub fn cleanup(&mut self) {
        for id in 0..TIMER_COUNT {
            if self.active[id] {
                let _ = self.is_expired(id);
            }
        }
    }

    /// The smallest positive delay until any active timer expires, or
    /// [`NO_EXPIRE`] if none are active. A zero-or-negative diff is clamped
    /// to `0` (fire immediately).
    pub fn get_next_expiration(&self) -> i32 {
        let mut min = i32::MAX;
        for id in 0..TIMER_COUNT {
            if self.active[id] {
                let diff = time_diff(self.expire_at[id], self.now);
                if diff <= 0 {
                    return 0;
                }
                if diff < min {
                    min = diff;
                }
            }
        }
        if min == i32::MAX {
            NO_EXPIRE
        } else {
            min
        }
    }

    fn deactivate(&mut self, timer_id: usize) {
        self.active[timer_id] = false;
        self.disabled[timer_id] = false;
        self.timers_changed = true;
    }
}

/// Signed difference tolerant of `u32` wraparound, matching a 32-bit
/// monotonic millisecond clock.
fn time_diff(expiration: u32, now: u32) -> i32 {
    expiration.wrapping_sub(now) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_exactly_once() {
        let mut timers = TimerPack::new();
        timers.set_time(0);
        timers.start(0, 100);
        timers.set_time(100);
        assert!(timers.is_expired(0));
        assert!(!timers.is_expired(0));
    }

    #[test]
    fn survives_clock_wraparound() {
        let mut timers = TimerPack::new();
        timers.set_time(u32::MAX - 10);
        timers.start(0, 20);
        timers.set_time(15); // wrapped past u32::MAX
        assert!(timers.is_expired(0));
    }

    #[test]
    fn stop_range_disables_exactly_requested_ids() {
        let mut timers = TimerPack::new();
        timers.set_time(0);
        for id in 0..5 {
            timers.start(id, 1000);
        }
        timers.stop_range(1, 3);
        assert!(!timers.is_disabled(0));
        for id in 1..=3 {
            assert!(timers.is_disabled(id));
        }
        assert!(!timers.is_disabled(4));
    }

    #[test]
    fn next_expiration_tracks_minimum() {
        let mut timers = TimerPack::new();
        timers.set_time(0);
        timers.start(0, 500);
        timers.start(1, 100);
        assert_eq!(timers.get_next_expiration(), 100);
    }

    #[test]
    fn next_expiration_is_no_expire_when_idle() {
        let timers = TimerPack::new();
        assert_eq!(timers.get_next_expiration(), NO_EXPIRE);
    }
}
