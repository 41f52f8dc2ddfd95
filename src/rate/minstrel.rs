//! Minstrel rate adaptation
//!
//! Tracks a success probability per rate and always picks the rate with the
//! best expected throughput, while a fixed share of transmissions is
//! diverted to a sample table so that every rate keeps getting sampled.

use log::{debug, trace};
use rand_core::RngCore;

use super::RateAdapter;

/// Rows in the sample table
pub const SAMPLE_ROWS: usize = 10;

/// Counters are reset / decayed past this value
pub const COUNTER_LIMIT: u32 = 60_000;

/// Probabilities (percent) below this score zero throughput
pub const MIN_PROBABILITY: u32 = 10;

/// Per-rate statistics
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateStats {
    pub hist_success: u32,
    pub hist_attempts: u32,
    /// Blended probability (percent) from the last folded window
    pub hist_prob: u32,
    pub cur_success: u32,
    pub cur_attempts: u32,
    /// Effective success probability in percent
    pub prob: u32,
    /// Expected throughput score, probability x nominal rate
    pub throughput: u32,
}

/// Minstrel controller
#[derive(Debug, Clone, PartialEq)]
pub struct Minstrel {
    mbps: Vec<u32>,
    retry_ceiling: u32,
    sample_ratio: u32,

    stats: Vec<RateStats>,
    sample_table: Vec<Vec<usize>>,

    total: u32,
    sampled: u32,
    sample_row: usize,
    sample_col: usize,
}

impl Minstrel {
    /// Create a controller for the provided nominal rates (Mbit/s)
    pub fn new<R: RngCore>(mbps: &[u32], retry_ceiling: u32, sample_ratio: u32, rng: &mut R) -> Self {
        let sample_table = sample_table(mbps.len(), SAMPLE_ROWS, rng);

        trace!("Minstrel sample table: {:?}", sample_table);

        Self {
            mbps: mbps.to_vec(),
            retry_ceiling,
            sample_ratio: sample_ratio.min(100),
            stats: vec![RateStats::default(); mbps.len()],
            sample_table,
            total: 0,
            sampled: 0,
            sample_row: 0,
            sample_col: 0,
        }
    }

    pub fn stats(&self) -> &[RateStats] {
        &self.stats
    }

    pub fn sample_table(&self) -> &[Vec<usize>] {
        &self.sample_table
    }

    /// Index of the first rate with the highest throughput score
    pub fn select_best_rate(&self) -> usize {
        select_best_rate(&self.stats)
    }

    /// Next entry of the sample table, walking columns then rows
    fn next_sample(&mut self) -> usize {
        let rate = self.sample_table[self.sample_row][self.sample_col];

        self.sample_col += 1;
        if self.sample_col == self.mbps.len() {
            self.sample_col = 0;
            self.sample_row = (self.sample_row + 1) % self.sample_table.len();
        }

        rate
    }

    fn record(&mut self, rate: usize, success: bool) {
        let retry_ceiling = self.retry_ceiling;
        let mbps = self.mbps[rate];
        let s = &mut self.stats[rate];

        s.cur_attempts += 1;
        if success {
            s.cur_success += 1;
        }

        s.prob = 100 * s.cur_success / s.cur_attempts;

        if s.cur_attempts >= retry_ceiling {
            // Blend 75 % history with 25 % of the window just completed
            s.hist_prob = match s.hist_attempts {
                0 => s.prob,
                a => ((75 * s.hist_success / a) as f64 + 0.25 * s.prob as f64) as u32,
            };

            if s.hist_success > COUNTER_LIMIT || s.hist_attempts > COUNTER_LIMIT {
                s.hist_success /= 2;
                s.hist_attempts /= 2;
            }

            s.hist_success += s.cur_success;
            s.hist_attempts += s.cur_attempts;
            s.cur_success = 0;
            s.cur_attempts = 0;
            s.prob = s.hist_prob;
        }

        s.throughput = throughput(s.prob, mbps);
    }
}

impl RateAdapter for Minstrel {
    fn update(&mut self, rate: usize, success: bool) -> usize {
        let mut rate = rate.min(self.mbps.len() - 1);

        self.total += 1;
        if self.total > COUNTER_LIMIT {
            self.total = 0;
            self.sampled = 0;
        }

        let delta = (self.total * self.sample_ratio / 100) as i64 - self.sampled as i64;
        if delta > 0 {
            rate = self.next_sample();
            self.sampled += 1;
            trace!("Minstrel: sampling rate {}", rate);
        }

        self.record(rate, success);

        let best = self.select_best_rate();
        debug!("Minstrel: rate {} {} -> best {}", rate, if success { "ok" } else { "failed" }, best);
        best
    }

    fn name(&self) -> &'static str {
        "minstrel"
    }
}

/// Throughput score for a probability (percent) at a nominal rate
pub fn throughput(prob: u32, mbps: u32) -> u32 {
    if prob < MIN_PROBABILITY {
        0
    } else {
        prob * mbps
    }
}

/// Index of the first maximum throughput, 0 when nothing scores
pub fn select_best_rate(stats: &[RateStats]) -> usize {
    let mut best = 0;
    let mut best_tp = 0;
    for (i, s) in stats.iter().enumerate() {
        if s.throughput > best_tp {
            best = i;
            best_tp = s.throughput;
        }
    }
    best
}

/// Build a sample table where every row is a permutation of `0..n`.
///
/// Each rate is dropped at a random offset from its own index and moved
/// along to the next free column on collision.
pub fn sample_table<R: RngCore>(n: usize, rows: usize, rng: &mut R) -> Vec<Vec<usize>> {
    let mut table = vec![vec![usize::MAX; n]; rows];
    if n == 0 {
        return table;
    }

    for row in table.iter_mut() {
        for i in 0..n {
            let offset = rng.next_u32() as usize % n;
            let mut idx = (i + offset) % n;
            while row[idx] != usize::MAX {
                idx = (idx + 1) % n;
            }
            row[idx] = i;
        }
    }

    table
}
