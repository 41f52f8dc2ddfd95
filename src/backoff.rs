//! Binary exponential backoff

use rand_core::RngCore;

/// Minimum contention window (slots)
pub const CW_MIN: u32 = 15;

/// Maximum contention window (slots)
pub const CW_MAX: u32 = 1023;

/// Draws contention windows from a random source
#[derive(Debug)]
pub struct BackoffEngine<R> {
    rng: R,
}

impl <R: RngCore> BackoffEngine<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Contention window (in slots) after `attempt` failed attempts.
    ///
    /// The first attempt always uses `cw_min`, later attempts draw
    /// uniformly from `[cw_min, min(CW_MAX, cw_min * 2^attempt)]`.
    pub fn retry(&mut self, attempt: u32, cw_min: u32) -> u32 {
        if attempt == 0 {
            return cw_min;
        }

        let upper = Self::upper_bound(attempt, cw_min);
        let range = upper - cw_min + 1;

        cw_min + self.rng.next_u32() % range
    }

    /// Largest window reachable after `attempt` failures
    pub fn upper_bound(attempt: u32, cw_min: u32) -> u32 {
        let scale = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        cw_min.saturating_mul(scale).min(CW_MAX).max(cw_min)
    }
}
