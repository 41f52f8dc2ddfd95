//! Sender path: upper layer polling, RTS, DATA, fragment trains and their
//! acknowledgement waits

use log::{debug, info, warn};
use rand_core::RngCore;

use crate::error::{FrameError, MacError};
use crate::frame::{self, EncodedFrame, Frame, FrameFields, FrameKind, rates::CONTROL_ENCODING};
use crate::link::{PhyLink, TailKind, UpperLink, UpperPoll};
use crate::timer::Timer;
use super::{Dcf, MacState, Step};

/// Payload at the head of the upper layer queue and its retry state
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TxJob {
    pub payload: Vec<u8>,
    /// Retransmissions left before the payload is dropped
    pub retries_left: u32,
    /// Previous attempt went unacknowledged, resend as DATA_RETX
    pub failed: bool,
}

impl <P, U, T, R> Dcf<P, U, T, R>
where
    P: PhyLink,
    U: UpperLink,
    T: Timer,
    R: RngCore,
{
    /// Check the upper layer for something to send
    pub(super) fn poll_upper(&mut self) -> Result<Option<Step>, MacError> {
        match self.upper.poll()? {
            UpperPoll::Payload(p) => {
                let fresh = self.job.as_ref().map(|j| j.payload != p).unwrap_or(true);
                if fresh {
                    debug!("New payload of {} bytes", p.len());
                    self.job = Some(TxJob{ payload: p, retries_left: self.config.retx_max, failed: false });
                }
                Ok(Some((MacState::WaitForNav, "DATA to send")))
            },
            UpperPoll::Beacon => {
                self.beaconing = true;
                Ok(Some((MacState::TransmittingRts, "beacon due")))
            },
            UpperPoll::Empty => Ok(None),
        }
    }

    /// Encode a frame and hand it to the PHY
    fn send(&mut self, kind: FrameKind, fields: &FrameFields, encoding: usize) -> Result<EncodedFrame, MacError> {
        let f = self.codec.encode(kind, fields, encoding)?;
        self.phy.transmit(&f.bytes, encoding as u8, self.timer.ticks_us())?;
        Ok(f)
    }

    /// Close out the current payload, successful or not
    fn finish_job(&mut self) {
        self.job = None;
        self.train.clear();
        self.frag = 0;
        self.last_fragment = false;

        self.seq = frame::next_seq(self.seq);

        self.tx_attempts = 0;
        self.backoff_slots = 0;
        self.frozen = false;
        self.busy_in_difs = false;
        self.cts_failed = false;
    }

    /// Remove an undeliverable payload from the upper layer
    fn drop_job(&mut self, reason: &str) -> Result<(), MacError> {
        warn!("Dropping payload (seq {}): {}", self.seq, reason);

        self.upper.remove()?;
        self.stats.drops = self.stats.drops.saturating_add(1);
        self.rate_update(false);
        self.finish_job();

        Ok(())
    }

    fn acknowledged(&mut self) -> Result<(), MacError> {
        self.upper.remove()?;
        self.rate_update(true);
        self.finish_job();
        Ok(())
    }

    pub(super) fn transmit_rts(&mut self) -> Result<Step, MacError> {
        if self.beaconing {
            self.beaconing = false;

            let fields = FrameFields {
                source: self.address,
                seq: self.seq,
                timestamp: self.timer.ticks_us(),
                beacon_interval: self.config.beacon_interval,
                ssid: &self.config.ssid,
                ..Default::default()
            };
            let f = self.codec.encode(FrameKind::Beacon, &fields, self.encoding)?;
            self.phy.transmit(&f.bytes, self.encoding as u8, fields.timestamp)?;
            info!("TX BEACON from {} (interval {:?}, seq {})", self.address, self.config.beacon_interval, self.seq);

            self.upper.remove()?;
            self.seq = frame::next_seq(self.seq);

            return Ok((MacState::Idle, "beacon sent"));
        }

        let len = match &self.job {
            Some(j) => j.payload.len(),
            None => return Ok((MacState::Idle, "no payload")),
        };

        if !self.config.rts || len <= self.config.rts_threshold {
            return Ok((MacState::TransmittingUnicast, "no RTS needed"));
        }

        let data_fields = FrameFields {
            source: self.address,
            destination: self.destination,
            payload: self.job.as_ref().map(|j| &j.payload[..]).unwrap_or(&[]),
            ..Default::default()
        };
        let t_data = match self.codec.encode(FrameKind::Data, &data_fields, self.encoding) {
            Ok(f) => f.airtime_us,
            // Oversized payloads are fragmented, reserve for the largest frame
            Err(FrameError::FrameTooLarge(_)) => self.timing.t_data_max_us,
            Err(e) => return Err(e.into()),
        };

        let fields = FrameFields {
            source: self.address,
            destination: self.destination,
            reservation_us: self.timing.rts_reservation_us(t_data),
            ..Default::default()
        };
        let f = self.send(FrameKind::Rts, &fields, CONTROL_ENCODING)?;
        info!("TX RTS {} -> {} (duration {} us)", self.address, self.destination, f.duration);

        self.wait_remaining = self.timing.sifs;

        Ok((MacState::WaitingForCts, "RTS sent"))
    }

    pub(super) fn wait_for_cts(&mut self) -> Result<Step, MacError> {
        let start = self.timer.now();
        let cts = match self.poll_frame(TailKind::Cts)? {
            Some(Frame::Cts(c)) => Some(c),
            _ => None,
        };
        let open = self.wait_slot(start)?;

        if let Some(cts) = cts {
            if cts.receiver == self.address {
                info!("RX CTS for {} (duration {} us)", cts.receiver, cts.duration);
                self.tx_attempts = 0;
                self.cts_failed = false;
                return Ok((MacState::TransmittingUnicast, "CTS received"));
            }

            debug!("Overheard CTS to {}, aborting", cts.receiver);
            self.overheard(cts.duration);
            return Ok((MacState::Idle, "CTS captured"));
        }

        if open {
            return Ok((MacState::WaitingForCts, "CTS not received yet"));
        }

        warn!("CTS timeout (seq {})", self.seq);
        self.stats.cts_timeouts = self.stats.cts_timeouts.saturating_add(1);

        let exhausted = match self.job.as_mut() {
            Some(j) if j.retries_left > 0 => {
                j.retries_left -= 1;
                false
            },
            _ => true,
        };
        if exhausted {
            self.drop_job("no CTS after all retries")?;
            return Ok((MacState::Idle, "CTS not received, retries exhausted"));
        }

        self.tx_attempts = self.tx_attempts.saturating_add(1);
        self.backoff_slots = self.backoff.retry(self.tx_attempts, self.config.cw_min);
        self.cts_failed = true;
        debug!("Backoff window {} slots", self.backoff_slots);

        Ok((MacState::Idle, "CTS not received"))
    }

    pub(super) fn transmit_unicast(&mut self) -> Result<Step, MacError> {
        let job = match self.job.take() {
            Some(j) => j,
            None => return Ok((MacState::Idle, "no payload")),
        };

        if job.payload.len() > self.config.frag_threshold {
            self.train = frame::fragment(&job.payload, self.config.frag_threshold).into();
            self.frag = 0;
            self.last_fragment = false;
            self.job = Some(job);
            return Ok((MacState::TransmittingFragment, "payload above fragmentation threshold"));
        }

        let kind = if job.failed { FrameKind::DataRetx } else { FrameKind::Data };
        let fields = FrameFields {
            source: self.address,
            destination: self.destination,
            seq: self.seq,
            payload: &job.payload,
            ..Default::default()
        };
        let sent = self.send(kind, &fields, self.encoding);

        let len = job.payload.len();
        self.job = Some(job);
        sent?;

        info!("TX {} {} -> {} (seq {}, {} bytes){}", kind, self.address, self.destination, self.seq,
            len, if kind == FrameKind::DataRetx { " [RETX]" } else { "" });

        if kind == FrameKind::DataRetx {
            self.stats.data_retx = self.stats.data_retx.saturating_add(1);
        } else {
            self.stats.data_tx = self.stats.data_tx.saturating_add(1);
        }

        self.wait_remaining = self.timing.ack_timeout;

        Ok((MacState::WaitingForAck, "DATA sent"))
    }

    pub(super) fn wait_for_ack(&mut self) -> Result<Step, MacError> {
        let start = self.timer.now();
        let acked = self.poll_ack()?;
        let open = self.wait_slot(start)?;

        if acked {
            info!("RX ACK for {} (seq {})", self.address, self.seq);
            self.acknowledged()?;
            return Ok((MacState::Idle, "ACK received"));
        }

        if open {
            return Ok((MacState::WaitingForAck, "ACK not received yet"));
        }

        self.stats.ack_timeouts = self.stats.ack_timeouts.saturating_add(1);

        if self.config.retx_max == 0 {
            self.drop_job("no ACK, retransmission disabled")?;
            return Ok((MacState::Idle, "ACK not received"));
        }

        match self.job.as_mut() {
            Some(j) if j.retries_left > 0 => {
                j.retries_left -= 1;
                j.failed = true;
                warn!("ACK timeout (seq {}, retries left {})", self.seq, j.retries_left);
                Ok((MacState::Idle, "ACK not received"))
            },
            _ => {
                self.drop_job("no ACK after all retries")?;
                Ok((MacState::Idle, "ACK not received, retries exhausted"))
            },
        }
    }

    pub(super) fn transmit_fragment(&mut self) -> Result<Step, MacError> {
        let payload = match self.train.pop_front() {
            Some(p) => p,
            None => return Ok((MacState::Idle, "no fragments")),
        };

        self.last_fragment = self.train.is_empty();
        let kind = if self.last_fragment { FrameKind::Data } else { FrameKind::DataFrag };

        let fields = FrameFields {
            source: self.address,
            destination: self.destination,
            seq: self.seq,
            frag: self.frag,
            payload: &payload,
            ..Default::default()
        };
        self.send(kind, &fields, self.encoding)?;
        info!("TX {} {} -> {} (seq {}, frag {}, {} bytes)", kind, self.address, self.destination,
            self.seq, self.frag, payload.len());

        self.stats.data_tx = self.stats.data_tx.saturating_add(1);
        self.frag = (self.frag + 1) & 0x0f;
        self.wait_remaining = self.timing.sifs;

        Ok((MacState::WaitAckFragment, "fragment sent"))
    }

    pub(super) fn wait_ack_fragment(&mut self) -> Result<Step, MacError> {
        let start = self.timer.now();
        let acked = self.poll_ack()?;
        let open = self.wait_slot(start)?;

        if acked {
            if self.last_fragment {
                info!("All fragments acknowledged (seq {})", self.seq);
                self.acknowledged()?;
                return Ok((MacState::Idle, "all fragments acknowledged"));
            }
            self.backoff_slots = 0;
            return Ok((MacState::TransmittingFragment, "fragment acknowledged"));
        }

        if open {
            return Ok((MacState::WaitAckFragment, "ACK not received yet"));
        }

        self.stats.ack_timeouts = self.stats.ack_timeouts.saturating_add(1);
        self.drop_job("fragment not acknowledged")?;

        Ok((MacState::Idle, "fragment ACK not received"))
    }

    /// Poll for an ACK addressed to this station
    fn poll_ack(&mut self) -> Result<bool, MacError> {
        match self.poll_frame(TailKind::Ack)? {
            Some(Frame::Ack(a)) if a.receiver == self.address => {
                self.stats.ack_rx = self.stats.ack_rx.saturating_add(1);
                Ok(true)
            },
            Some(f) => {
                debug!("Ignoring {} to {}", f.kind(), f.receiver());
                Ok(false)
            },
            None => Ok(false),
        }
    }
}
