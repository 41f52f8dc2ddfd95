//! Adaptive Auto Rate Fallback

use log::debug;

use super::RateAdapter;

/// Ceiling for the per-rate increase threshold
pub const AARF_MAX_THRESHOLD: u32 = 20;

/// Default number of consecutive successes before trying a faster rate
pub const AARF_N: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
struct AarfRate {
    successes: u32,
    failed: bool,
    threshold: u32,
}

/// AARF controller.
///
/// Steps up after `threshold` consecutive successes and down after two
/// consecutive failures. A failure on the first frame after a step up
/// falls straight back and doubles the lower rate's threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Aarf {
    n: u32,
    rates: Vec<AarfRate>,
    just_increased: bool,
}

impl Aarf {
    pub fn new(num_rates: usize, n: u32) -> Self {
        let r = AarfRate{ successes: 0, failed: false, threshold: n };
        Self {
            n,
            rates: vec![r; num_rates.max(1)],
            just_increased: false,
        }
    }

    /// Current increase threshold for a rate
    pub fn threshold(&self, rate: usize) -> Option<u32> {
        self.rates.get(rate).map(|r| r.threshold)
    }

    fn max_rate(&self) -> usize {
        self.rates.len() - 1
    }
}

impl RateAdapter for Aarf {
    fn update(&mut self, rate: usize, success: bool) -> usize {
        let rate = rate.min(self.max_rate());
        let max_rate = self.max_rate();
        let n = self.n;

        if success {
            let r = &mut self.rates[rate];
            r.failed = false;

            if self.just_increased {
                self.just_increased = false;
                return rate;
            }

            r.successes += 1;
            if r.successes >= r.threshold {
                r.threshold = n;
                r.successes = 0;

                let next = (rate + 1).min(max_rate);
                self.just_increased = true;
                debug!("AARF: {} successes, rate {} -> {}", n, rate, next);
                return next;
            }

            return rate;
        }

        self.rates[rate].successes = 0;

        if self.just_increased {
            self.just_increased = false;

            if let Some(prev) = rate.checked_sub(1) {
                let p = &mut self.rates[prev];
                p.threshold = (p.threshold * 2).min(AARF_MAX_THRESHOLD);
                debug!("AARF: failed after increase, rate {} -> {} (threshold {})", rate, prev, p.threshold);
                return prev;
            }

            return rate;
        }

        let r = &mut self.rates[rate];
        if r.failed {
            r.failed = false;
            return rate.saturating_sub(1);
        }

        r.failed = true;
        rate
    }

    fn name(&self) -> &'static str {
        "aarf"
    }
}
