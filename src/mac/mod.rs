//! Distributed Coordination Function MAC
//!
//! [`Dcf`] is a cooperative state machine, each call to [`Dcf::tick`]
//! performs one transition. Waits are slot aligned against the [`Timer`]
//! and bounded by a locally computed window, so no state blocks past its
//! deadline. The sender path lives in `tx.rs`, the receiver path in `rx.rs`.
//
// dcf-mac
// SPDX-License-Identifier: MPL-2.0

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{trace, debug, info, warn, error};
use rand_core::RngCore;
use strum::{Display, IntoStaticStr};

use crate::backoff::{BackoffEngine, CW_MAX};
use crate::error::MacError;
use crate::frame::{self, Frame, FrameCodec, MacAddress, rates::{symbol_duration, NOMINAL_MBPS}};
use crate::link::{PhyLink, TailKind, UpperLink};
use crate::nav::NavTracker;
use crate::rate::RateAdapter;
use crate::timer::Timer;
use crate::timing::TimingModel;

pub mod config;
pub use config::MacConfig;

mod tx;
use tx::TxJob;

mod rx;
use rx::Reassembly;

#[cfg(test)]
mod test;

/// DCF states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum MacState {
    Idle,
    WaitForNav,
    WaitForDifs,
    BackingOff,
    TransmittingRts,
    TransmittingUnicast,
    TransmittingFragment,
    WaitingForCts,
    WaitingForAck,
    WaitAckFragment,
    TransmittingCts,
    WaitingForData,
    TransmittingAck,
    TransmittingAckFragment,
}

/// MAC counters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MacStats {
    pub data_tx: u32,
    pub data_retx: u32,
    pub ack_rx: u32,
    pub data_rx: u32,
    pub ack_tx: u32,
    pub cts_timeouts: u32,
    pub ack_timeouts: u32,
    pub drops: u32,
    /// Busy channel samples while contending
    pub busy_cca: u32,
    pub malformed: u32,
    pub duplicates: u32,
}

/// Next state and the reason for moving there
pub(crate) type Step = (MacState, &'static str);

/// 802.11 DCF MAC over a PHY (P) and upper layer (U) link,
/// driven by a Timer (T) with a random source (R) for backoff
pub struct Dcf<P, U, T, R> {
    config: MacConfig,
    address: MacAddress,
    destination: MacAddress,

    codec: FrameCodec,
    timing: TimingModel,

    phy: P,
    upper: U,
    timer: T,

    state: MacState,
    stats: MacStats,

    nav: NavTracker,
    backoff: BackoffEngine<R>,
    backoff_slots: u32,
    frozen: bool,
    busy_in_difs: bool,
    cts_failed: bool,
    tx_attempts: u32,

    rate: Option<Box<dyn RateAdapter + Send>>,
    encoding: usize,

    seq: u16,
    beaconing: bool,
    job: Option<TxJob>,
    train: VecDeque<Vec<u8>>,
    frag: u8,
    last_fragment: bool,

    /// Time left in the current wait state, seconds
    wait_remaining: f64,

    peer: MacAddress,
    rts_duration: u16,
    reassembly: Option<Reassembly>,
    last_rx: Option<(MacAddress, u16)>,
}

impl <P, U, T, R> Dcf<P, U, T, R>
where
    P: PhyLink,
    U: UpperLink,
    T: Timer,
    R: RngCore,
{
    /// Create a MAC, querying the PHY for any node id or sample rate
    /// the configuration leaves unset
    pub fn new(config: MacConfig, mut phy: P, upper: U, timer: T, mut rng: R) -> Result<Self, MacError> {
        config.validate()?;

        let node = match config.node {
            Some(n) => n,
            None => phy.node_id()?.ok_or(MacError::Config("node id unset and not reported by the PHY"))?,
        };
        let sample_rate = match config.sample_rate {
            Some(r) => r,
            None => phy.sample_rate()?.ok_or(MacError::Config("sample rate unset and not reported by the PHY"))?,
        };
        let dest_node = config.dest_node.unwrap_or_else(|| node.wrapping_add(1));

        let codec = FrameCodec::new(symbol_duration(sample_rate));
        let timing = TimingModel::new(&codec, config.beta, config.slot_time, config.sifs, config.processing_delay)?;

        let rate = config.rate_control.build(&config.rate_config(), &mut rng)?;

        let s = Self {
            address: MacAddress::from_node(node),
            destination: MacAddress::from_node(dest_node),
            encoding: config.encoding,
            config,

            codec,
            timing,

            phy,
            upper,
            timer,

            state: MacState::Idle,
            stats: MacStats::default(),

            nav: NavTracker::new(),
            backoff: BackoffEngine::new(rng),
            backoff_slots: 0,
            frozen: false,
            busy_in_difs: false,
            cts_failed: false,
            tx_attempts: 0,

            rate,

            seq: 0,
            beaconing: false,
            job: None,
            train: VecDeque::new(),
            frag: 0,
            last_fragment: false,

            wait_remaining: 0.0,

            peer: MacAddress::BROADCAST,
            rts_duration: 0,
            reassembly: None,
            last_rx: None,
        };

        s.banner(node);

        Ok(s)
    }

    fn banner(&self, node: u8) {
        let c = &self.config;
        let t = &self.timing;

        info!("DCF MAC node {} address {} destination {}", node, self.address, self.destination);
        info!("Rate: {} ({} Mbps)", self.encoding, NOMINAL_MBPS[self.encoding]);
        match c.retx_max {
            0 => info!("Retransmissions disabled"),
            n => info!("Retransmissions enabled (max retries: {})", n),
        }
        info!("Beta: {}, slot: {:.6} s, SIFS: {:.6} s, DIFS: {:.6} s, ACK timeout: {:.6} s",
            c.beta, t.slot, t.sifs, t.difs, t.ack_timeout);
        info!("Backoff window [{}, {}]", c.cw_min, CW_MAX);
        if c.rts {
            info!("RTS/CTS enabled (threshold: {} bytes)", c.rts_threshold);
        } else {
            info!("RTS/CTS disabled");
        }
        info!("Fragmentation threshold: {} bytes", c.frag_threshold);
    }

    pub fn state(&self) -> MacState {
        self.state
    }

    pub fn stats(&self) -> &MacStats {
        &self.stats
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn destination(&self) -> MacAddress {
        self.destination
    }

    pub fn timing(&self) -> &TimingModel {
        &self.timing
    }

    /// Encoding index used for the next DATA frame
    pub fn encoding(&self) -> usize {
        self.encoding
    }

    /// Sequence number of the next outgoing frame
    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn nav(&self) -> &NavTracker {
        &self.nav
    }

    /// Replace the rate adapter, `None` fixes the encoding
    pub fn set_rate_adapter(&mut self, rate: Option<Box<dyn RateAdapter + Send>>) {
        self.rate = rate;
    }

    /// Perform one state transition, returning the new state
    pub fn tick(&mut self) -> Result<MacState, MacError> {
        let (next, reason) = match self.state {
            MacState::Idle => self.idle()?,
            MacState::WaitForNav => self.wait_for_nav()?,
            MacState::WaitForDifs => self.wait_for_difs()?,
            MacState::BackingOff => self.backing_off()?,
            MacState::TransmittingRts => self.transmit_rts()?,
            MacState::TransmittingUnicast => self.transmit_unicast()?,
            MacState::TransmittingFragment => self.transmit_fragment()?,
            MacState::WaitingForCts => self.wait_for_cts()?,
            MacState::WaitingForAck => self.wait_for_ack()?,
            MacState::WaitAckFragment => self.wait_ack_fragment()?,
            MacState::TransmittingCts => self.transmit_cts()?,
            MacState::WaitingForData => self.wait_for_data()?,
            MacState::TransmittingAck => self.transmit_ack()?,
            MacState::TransmittingAckFragment => self.transmit_ack_fragment()?,
        };

        if next != self.state {
            debug!("{:?} -> {:?} ({})", self.state, next, reason);
        } else {
            trace!("{:?} ({})", next, reason);
        }
        self.state = next;

        Ok(next)
    }

    /// Tick until `running` is cleared or a fatal error occurs
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), MacError> {
        while running.load(Ordering::SeqCst) {
            if let Err(e) = self.tick() {
                error!("MAC stopped: {}", e);
                return Err(e);
            }
        }

        let s = &self.stats;
        info!("DATA TX: {}, DATA RETX: {}, ACK RX: {}, DATA RX: {}, ACK TX: {}, drops: {}",
            s.data_tx, s.data_retx, s.ack_rx, s.data_rx, s.ack_tx, s.drops);

        Ok(())
    }

    /// Poll the PHY for a frame of a kind, malformed frames read as nothing
    fn poll_frame(&mut self, kind: TailKind) -> Result<Option<Frame>, MacError> {
        let bytes = match self.phy.tail(kind)? {
            Some(b) => b,
            None => return Ok(None),
        };

        match frame::decode(&bytes) {
            Ok(f) => Ok(Some(f)),
            Err(e) => {
                warn!("Dropping malformed {} frame ({} bytes): {}", kind, bytes.len(), e);
                self.stats.malformed = self.stats.malformed.saturating_add(1);
                Ok(None)
            },
        }
    }

    /// Sense the channel once, true when busy
    fn channel_busy(&mut self) -> Result<bool, MacError> {
        let p = self.phy.cca()?;
        let busy = p > self.config.cca_threshold;
        trace!("Channel {} ({:.2} dBW)", if busy { "busy" } else { "free" }, p);

        if busy {
            self.stats.busy_cca = self.stats.busy_cca.saturating_add(1);
        }
        Ok(busy)
    }

    /// Sleep a non-negative remainder, a negative one means the slot budget was overrun
    fn sleep_remaining(&self, secs: f64) -> Result<(), MacError> {
        if secs < 0.0 {
            let state: &'static str = self.state.into();
            error!("Timing error in {} (short by {:.6} s), increase the beta parameter", state, -secs);
            return Err(MacError::Timing{ state, deficit: -secs });
        }
        self.timer.sleep(secs);
        Ok(())
    }

    /// Sleep out the rest of the slot that began at `start`
    fn end_slot(&self, start: f64) -> Result<(), MacError> {
        self.sleep_remaining(self.timing.slot - (self.timer.now() - start))
    }

    /// Finish one slot of a wait state, true while the wait window is open
    fn wait_slot(&mut self, start: f64) -> Result<bool, MacError> {
        self.end_slot(start)?;
        self.wait_remaining -= self.timer.now() - start;
        Ok(self.wait_remaining > 0.0)
    }

    /// Extend the NAV for an overheard reservation and count down one slot
    fn overheard(&mut self, duration: u16) {
        self.nav.reserve(TimingModel::nav_secs(duration));
        let nav = self.nav.update(&self.timer, self.timing.slot);
        debug!("NAV updated to {:.6} s", nav);
    }

    fn idle(&mut self) -> Result<Step, MacError> {
        if let Some(f) = self.poll_frame(TailKind::Rts)? {
            if let Frame::Rts(rts) = f {
                if rts.receiver == self.address {
                    info!("RX RTS from {} (duration {} us)", rts.transmitter, rts.duration);
                    self.peer = rts.transmitter;
                    self.rts_duration = rts.duration;
                    return Ok((MacState::TransmittingCts, "RTS received"));
                }

                debug!("Overheard RTS {} -> {} (duration {} us)", rts.transmitter, rts.receiver, rts.duration);
                self.overheard(rts.duration);
                self.timer.sleep(self.timing.slot);
                return Ok((MacState::Idle, "RTS captured"));
            }
        }

        if let Some(f) = self.poll_frame(TailKind::Data)? {
            if let Some(next) = self.receive_data(f)? {
                return Ok(next);
            }
        }

        if let Some(next) = self.poll_upper()? {
            return Ok(next);
        }

        if let Some(Frame::Cts(cts)) = self.poll_frame(TailKind::Cts)? {
            if cts.receiver != self.address {
                debug!("Overheard CTS to {} (duration {} us)", cts.receiver, cts.duration);
                self.overheard(cts.duration);
                return Ok((MacState::Idle, "CTS captured"));
            }
        }

        // An outstanding reservation drains while idle
        if self.nav.is_clear() {
            self.timer.sleep(self.timing.slot);
        } else {
            let nav = self.nav.update(&self.timer, self.timing.slot);
            trace!("Idle NAV countdown, {:.6} s left", nav);
        }

        Ok((MacState::Idle, "nothing to do"))
    }

    fn wait_for_nav(&mut self) -> Result<Step, MacError> {
        if self.nav.update(&self.timer, self.timing.slot) > 0.0 {
            return Ok((MacState::WaitForNav, "NAV > 0"));
        }
        Ok((MacState::WaitForDifs, "NAV = 0"))
    }

    fn wait_for_difs(&mut self) -> Result<Step, MacError> {
        let end = self.timer.now() + self.timing.difs;
        let mut busy = false;

        for _ in 0..2 {
            let start = self.timer.now();
            busy |= self.channel_busy()?;
            self.end_slot(start)?;
        }
        self.sleep_remaining(end - self.timer.now())?;

        if !busy {
            if !self.frozen && !self.busy_in_difs && !self.cts_failed {
                self.backoff_slots = 0;
            }
            return Ok((MacState::BackingOff, "channel idle"));
        }

        if !self.frozen && !self.cts_failed && !self.busy_in_difs {
            self.backoff_slots = self.backoff.retry(self.tx_attempts, self.config.cw_min);
            self.tx_attempts = self.tx_attempts.saturating_add(1);
            debug!("Backoff window {} slots", self.backoff_slots);
        }
        self.busy_in_difs = true;

        Ok((MacState::Idle, "channel busy"))
    }

    fn backing_off(&mut self) -> Result<Step, MacError> {
        self.busy_in_difs = false;

        if self.backoff_slots == 0 {
            self.frozen = false;
            return Ok((MacState::TransmittingRts, "backoff complete"));
        }

        let start = self.timer.now();
        let busy = self.channel_busy()?;
        self.backoff_slots -= 1;

        let step = if busy {
            self.frozen = true;
            (MacState::Idle, "channel busy, backoff frozen")
        } else if self.backoff_slots == 0 {
            self.frozen = false;
            (MacState::TransmittingRts, "backoff complete")
        } else {
            (MacState::BackingOff, "channel idle")
        };

        self.end_slot(start)?;

        Ok(step)
    }

    fn rate_update(&mut self, success: bool) {
        if let Some(r) = self.rate.as_mut() {
            let prev = self.encoding;
            self.encoding = r.update(prev, success);
            if self.encoding != prev {
                info!("Rate adaptation ({}): {} -> {}", r.name(), prev, self.encoding);
            }
        }
    }
}
