//! Network Allocation Vector (virtual carrier sense)

use crate::timer::Timer;

/// Channel time reserved by other stations, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NavTracker {
    nav: f64,
}

impl NavTracker {
    pub fn new() -> Self {
        Self { nav: 0.0 }
    }

    /// Remaining reservation in seconds
    pub fn remaining(&self) -> f64 {
        self.nav
    }

    pub fn is_clear(&self) -> bool {
        self.nav <= 0.0
    }

    /// Extend the reservation to at least `secs` from now
    pub fn reserve(&mut self, secs: f64) {
        if secs > self.nav {
            self.nav = secs;
        }
    }

    /// Count the reservation down by one slot, see [`update_nav`]
    pub fn update<T: Timer>(&mut self, timer: &T, slot: f64) -> f64 {
        self.nav = update_nav(timer, self.nav, slot);
        self.nav
    }
}

/// Count a NAV value down by (at least) one slot of elapsed time.
///
/// A zero NAV returns immediately. Otherwise this blocks for one slot and
/// subtracts the elapsed time; a remainder within one slot of expiry is
/// slept out so the result lands on exactly zero.
pub fn update_nav<T: Timer>(timer: &T, nav: f64, slot: f64) -> f64 {
    if nav <= 0.0 {
        return 0.0;
    }

    let start = timer.now();
    timer.sleep(slot);

    let nav = nav - (timer.now() - start);
    if nav > 0.0 && nav <= slot {
        timer.sleep(nav);
        return 0.0;
    }

    nav.max(0.0)
}
