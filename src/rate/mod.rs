//! Link rate adaptation
//!
//! A [`RateAdapter`] is told the outcome of every unicast DATA
//! transmission and picks the encoding index for the next one.

use log::info;
use rand_core::RngCore;
use strum::{Display, EnumString};

use crate::error::MacError;
use crate::frame::rates::{NOMINAL_MBPS, NUM_ENCODINGS};

pub mod aarf;
pub use aarf::Aarf;

pub mod minstrel;
pub use minstrel::Minstrel;

/// Rate selection strategy
pub trait RateAdapter {
    /// Report the outcome of a transmission at `rate`,
    /// returning the rate to use next
    fn update(&mut self, rate: usize, success: bool) -> usize;

    /// Strategy name for logging
    fn name(&self) -> &'static str;
}

/// Rate control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RateControl {
    None,
    Minstrel,
    Aarf,
}

impl Default for RateControl {
    fn default() -> Self {
        RateControl::Aarf
    }
}

/// Adapter tuning parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RateConfig {
    /// Starting encoding index
    pub initial: usize,
    /// Minstrel statistics window, usually the retry ceiling
    pub retry_ceiling: u32,
    /// Minstrel sampling ratio in percent
    pub sample_ratio: u32,
    /// AARF base increase threshold
    pub aarf_n: u32,
}

impl RateControl {
    /// Construct the adapter for this mode, `None` disables adaptation
    pub fn build<R: RngCore>(&self, config: &RateConfig, rng: &mut R) -> Result<Option<Box<dyn RateAdapter + Send>>, MacError> {
        if config.initial >= NUM_ENCODINGS {
            return Err(MacError::Config("initial rate outside the encoding table"));
        }

        let adapter: Box<dyn RateAdapter + Send> = match self {
            RateControl::None => return Ok(None),
            RateControl::Minstrel => {
                if config.retry_ceiling == 0 {
                    return Err(MacError::Config("minstrel requires a non-zero retry ceiling"));
                }
                Box::new(Minstrel::new(&NOMINAL_MBPS, config.retry_ceiling, config.sample_ratio, rng))
            },
            RateControl::Aarf => Box::new(Aarf::new(NUM_ENCODINGS, config.aarf_n)),
        };

        info!("Rate control: {} (initial {} Mbps)", adapter.name(), NOMINAL_MBPS[config.initial]);

        Ok(Some(adapter))
    }
}
