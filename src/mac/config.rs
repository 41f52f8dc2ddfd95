
use core::time::Duration;

use crate::backoff::CW_MIN;
use crate::error::MacError;
use crate::frame::{rates::NUM_ENCODINGS, MAX_DATA_PAYLOAD};
use crate::rate::{aarf::AARF_N, RateConfig, RateControl};
use crate::timing::{PROCESSING_DELAY, SIFS_BASE, SLOT_BASE};

/// Default MAC to PHY request port
pub const PHY_PORT: u16 = 8013;

/// Default MAC to upper layer request port
pub const UPPER_PORT: u16 = 8001;

/// Default PHY inbound frame stream port
pub const PHY_RX_PORT: u16 = 8500;

/// Configuration for the DCF MAC
#[derive(Clone, PartialEq, Debug)]
pub struct MacConfig {
    /// Node identifier, queried from the PHY when unset
    pub node: Option<u8>,

    /// Destination node for outgoing DATA, defaults to node + 1
    pub dest_node: Option<u8>,

    /// Baseband sample rate in Hz, queried from the PHY when unset
    pub sample_rate: Option<f64>,

    /// Initial OFDM encoding index for DATA frames
    pub encoding: usize,

    /// Scaling factor applied to every inter-frame interval
    pub beta: f64,

    /// Unscaled slot time in seconds
    pub slot_time: f64,

    /// Unscaled SIFS in seconds
    pub sifs: f64,

    /// Retransmissions after the first attempt, 0 disables retries
    pub retx_max: u32,

    /// Enable the RTS / CTS handshake
    pub rts: bool,

    /// Payloads longer than this (bytes) are preceded by an RTS
    pub rts_threshold: usize,

    /// Payloads longer than this (bytes) are fragmented
    pub frag_threshold: usize,

    pub rate_control: RateControl,

    /// Channel power (dBW) above which the medium is busy
    pub cca_threshold: f32,

    /// Minimum contention window in slots
    pub cw_min: u32,

    /// Slack added to the ACK timeout for PHY and socket processing, in seconds
    pub processing_delay: f64,

    /// Interval advertised in beacons
    pub beacon_interval: Duration,

    /// SSID carried in beacons, omitted when empty
    pub ssid: Vec<u8>,

    /// AARF base increase threshold
    pub aarf_n: u32,

    /// Minstrel sampling ratio in percent
    pub sample_ratio: u32,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            node: None,
            dest_node: None,
            sample_rate: None,

            encoding: 2,
            beta: 1000.0,
            slot_time: SLOT_BASE,
            sifs: SIFS_BASE,
            retx_max: 4,

            rts: false,
            rts_threshold: 150,
            frag_threshold: 1036,

            rate_control: RateControl::Aarf,
            cca_threshold: -35.0,
            cw_min: CW_MIN,
            processing_delay: PROCESSING_DELAY,

            beacon_interval: Duration::from_secs(1),
            ssid: Vec::new(),

            aarf_n: AARF_N,
            sample_ratio: 10,
        }
    }
}

impl MacConfig {
    /// Check for settings the MAC cannot run with
    pub fn validate(&self) -> Result<(), MacError> {
        if self.encoding >= NUM_ENCODINGS {
            return Err(MacError::Config("encoding must be in 0..8"));
        }
        if !(self.beta > 0.0) {
            return Err(MacError::Config("beta must be positive"));
        }
        if self.rate_control == RateControl::Minstrel && self.retx_max == 0 {
            return Err(MacError::Config("minstrel requires retransmissions to be enabled"));
        }
        if self.frag_threshold == 0 || self.frag_threshold > MAX_DATA_PAYLOAD {
            return Err(MacError::Config("fragmentation threshold must fit in one frame"));
        }
        if let Some(r) = self.sample_rate {
            if !(r > 0.0) {
                return Err(MacError::Config("sample rate must be positive"));
            }
        }
        Ok(())
    }

    /// Rate adapter parameters
    pub fn rate_config(&self) -> RateConfig {
        RateConfig {
            initial: self.encoding,
            retry_ceiling: self.retx_max,
            sample_ratio: self.sample_ratio,
            aarf_n: self.aarf_n,
        }
    }
}
