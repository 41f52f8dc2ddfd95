//! MAC Timer API
//
// dcf-mac
// SPDX-License-Identifier: MPL-2.0

use std::time::{Duration, Instant};

/// Timer trait provides mechanisms for accessing monotonic times
/// and blocking delays to assist with procotol implementations.
///
/// All methods are monotonic and relative to the same unknown epoc
pub trait Timer {
    /// Returns the number of microsecond ticks since some unknown epoc
    fn ticks_us(&self) -> u64;

    /// Block for the provided number of microseconds
    fn delay_us(&self, us: u64);

    /// Current time in seconds since the timer epoc
    fn now(&self) -> f64 {
        self.ticks_us() as f64 * 1e-6
    }

    /// Block for the provided (non-negative) number of seconds
    fn sleep(&self, secs: f64) {
        if secs > 0.0 {
            self.delay_us((secs * 1e6).round() as u64);
        }
    }
}

/// Wall-clock timer backed by [`Instant`]
#[derive(Clone, Debug)]
pub struct SystemTimer {
    start: Instant,
}

impl SystemTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now()
        }
    }
}

impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for SystemTimer {
    fn ticks_us(&self) -> u64 {
        Instant::now().duration_since(self.start).as_micros() as u64
    }

    fn delay_us(&self, us: u64) {
        std::thread::sleep(Duration::from_micros(us));
    }
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};

    /// Mock timer implementation to assist with testing,
    /// delays advance the shared virtual clock instantly
    #[derive(Clone, Debug)]
    pub struct MockTimer (Arc<Mutex<u64>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(0)))
        }

        pub fn set_us(&self, val: u64) {
            *self.0.lock().unwrap() = val;
        }

        pub fn advance_us(&self, us: u64) {
            let mut v = self.0.lock().unwrap();
            *v += us;
        }

        pub fn val(&self) -> u64 {
            *self.0.lock().unwrap()
        }
    }

    impl super::Timer for MockTimer {
        fn ticks_us(&self) -> u64 {
            *self.0.lock().unwrap()
        }

        fn delay_us(&self, us: u64) {
            self.advance_us(us);
        }
    }
}
