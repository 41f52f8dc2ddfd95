//! DCF timing parameters

use crate::error::FrameError;
use crate::frame::{rates::CONTROL_ENCODING, FrameCodec, FrameFields, FrameKind, MAX_DATA_PAYLOAD};

/// Unscaled 802.11a slot time (s)
pub const SLOT_BASE: f64 = 9e-6;

/// Unscaled 802.11a SIFS (s)
pub const SIFS_BASE: f64 = 16e-6;

/// Upper bound on one-way propagation delay, 200 m at the speed of light (s)
pub const AIR_DELAY_MAX: f64 = 200.0 / 299_792_458.0;

/// Rounding allowance added to every RTS / CTS reservation (µs)
pub const RESERVATION_SLACK_US: u32 = 1;

/// Default allowance for PHY / socket processing when waiting for an ACK (s)
pub const PROCESSING_DELAY: f64 = 0.2;

/// Inter-frame spacing and timeout values for a session.
///
/// All times are in seconds except the airtimes, which are in µs to
/// match the frame duration fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingModel {
    pub t_sym: f64,
    pub slot: f64,
    pub sifs: f64,
    pub difs: f64,
    pub ack_timeout: f64,

    /// Airtime of a CTS at the control encoding
    pub t_cts_us: u32,
    /// Airtime of an ACK at the control encoding
    pub t_ack_us: u32,
    /// Airtime of the largest DATA frame at the control encoding
    pub t_data_max_us: u32,
}

impl TimingModel {
    /// Derive timing values for a codec and scaling factor
    pub fn new(codec: &FrameCodec, beta: f64, slot_base: f64, sifs_base: f64, processing_delay: f64) -> Result<Self, FrameError> {
        let slot = slot_base * beta;
        let sifs = sifs_base * beta;
        let difs = sifs + 2.0 * slot;

        let empty = FrameFields::default();
        let t_cts_us = codec.encode(FrameKind::Cts, &empty, CONTROL_ENCODING)?.airtime_us;
        let t_ack_us = codec.encode(FrameKind::Ack, &empty, CONTROL_ENCODING)?.airtime_us;

        let max = [0u8; MAX_DATA_PAYLOAD];
        let data = FrameFields{ payload: &max, ..FrameFields::default() };
        let t_data_max_us = codec.encode(FrameKind::Data, &data, CONTROL_ENCODING)?.airtime_us;

        let ack_timeout = (t_data_max_us + t_ack_us) as f64 * 1e-6
            + sifs
            + 2.0 * AIR_DELAY_MAX
            + processing_delay;

        Ok(Self {
            t_sym: codec.t_sym(),
            slot,
            sifs,
            difs,
            ack_timeout,
            t_cts_us,
            t_ack_us,
            t_data_max_us,
        })
    }

    pub fn sifs_us(&self) -> u32 {
        (self.sifs * 1e6).round() as u32
    }

    /// Reservation carried by an RTS ahead of a DATA frame of `t_data_us`,
    /// covering CTS + DATA + ACK and the three SIFS gaps between them
    pub fn rts_reservation_us(&self, t_data_us: u32) -> u32 {
        3u32.saturating_mul(self.sifs_us())
            .saturating_add(self.t_cts_us)
            .saturating_add(t_data_us)
            .saturating_add(self.t_ack_us)
            .saturating_add(RESERVATION_SLACK_US)
    }

    /// Reservation carried by a CTS answering an RTS of `rts_duration`,
    /// the RTS reservation less the CTS exchange already elapsed
    pub fn cts_reservation_us(&self, rts_duration: u16) -> u32 {
        (rts_duration as u32)
            .saturating_sub(2 * self.t_cts_us)
            .saturating_sub(self.sifs_us())
            .saturating_add(RESERVATION_SLACK_US)
    }

    /// Seconds of NAV implied by a duration field
    pub fn nav_secs(duration: u16) -> f64 {
        duration as f64 * 1e-6
    }
}
