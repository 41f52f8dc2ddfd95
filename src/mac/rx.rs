//! Receiver path: CTS replies, DATA delivery, fragment reassembly and ACKs

use log::{debug, info, warn};
use rand_core::RngCore;

use crate::error::MacError;
use crate::frame::{DataFrame, Frame, FrameFields, FrameKind, MacAddress, rates::CONTROL_ENCODING};
use crate::link::{PhyLink, TailKind, UpperLink};
use crate::timer::Timer;
use super::{Dcf, MacState, Step};

/// Fragments of one payload received so far
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reassembly {
    source: MacAddress,
    seq: u16,
    next_frag: u8,
    buf: Vec<u8>,
}

impl Reassembly {
    fn start(d: &DataFrame) -> Self {
        Self {
            source: d.source,
            seq: d.seq,
            next_frag: 1,
            buf: d.payload.clone(),
        }
    }

    /// Whether a fragment continues this payload in order
    fn follows(&self, d: &DataFrame) -> bool {
        d.source == self.source && d.seq == self.seq && d.frag == self.next_frag
    }

    fn append(&mut self, d: &DataFrame) {
        self.buf.extend_from_slice(&d.payload);
        self.next_frag = (self.next_frag + 1) & 0x0f;
    }
}

impl <P, U, T, R> Dcf<P, U, T, R>
where
    P: PhyLink,
    U: UpperLink,
    T: Timer,
    R: RngCore,
{
    /// Handle a DATA family frame, `None` if it is not for this station
    pub(super) fn receive_data(&mut self, f: Frame) -> Result<Option<Step>, MacError> {
        let kind = f.kind();
        let d = match f {
            Frame::Data(d) | Frame::DataFrag(d) | Frame::DataRetx(d) if d.destination == self.address => d,
            other => {
                debug!("Ignoring {} to {}", other.kind(), other.receiver());
                return Ok(None);
            },
        };

        info!("RX {} {} -> {} (seq {}, frag {}, {} bytes)", kind, d.source, d.destination, d.seq, d.frag, d.payload.len());
        self.stats.data_rx = self.stats.data_rx.saturating_add(1);
        self.peer = d.source;

        if kind == FrameKind::DataFrag {
            let follows = self.reassembly.as_ref().map(|r| r.follows(&d)).unwrap_or(false);
            if follows {
                if let Some(r) = self.reassembly.as_mut() {
                    r.append(&d);
                }
            } else if d.frag == 0 {
                if self.reassembly.is_some() {
                    warn!("Discarding incomplete payload, new fragment train from {}", d.source);
                }
                self.reassembly = Some(Reassembly::start(&d));
            } else {
                warn!("Fragment {} (seq {}) out of order, discarding payload", d.frag, d.seq);
                self.reassembly = None;
                return Ok(Some((MacState::Idle, "fragment out of order")));
            }
            return Ok(Some((MacState::TransmittingAckFragment, "fragment received")));
        }

        // Last fragment of a train, or a whole payload
        let payload = match self.reassembly.take() {
            Some(mut r) if r.follows(&d) => {
                r.append(&d);
                r.buf
            },
            _ if d.frag != 0 => {
                warn!("Fragments missing before {} (seq {}), discarding payload", d.frag, d.seq);
                return Ok(Some((MacState::Idle, "fragments missing")));
            },
            stale => {
                if stale.is_some() {
                    warn!("Discarding incomplete payload, unfragmented DATA from {}", d.source);
                }
                d.payload
            },
        };

        let duplicate = kind == FrameKind::DataRetx && self.last_rx == Some((d.source, d.seq));
        if duplicate {
            debug!("Duplicate DATA from {} (seq {}), acknowledging only", d.source, d.seq);
            self.stats.duplicates = self.stats.duplicates.saturating_add(1);
        } else {
            self.upper.deliver(&payload)?;
            self.last_rx = Some((d.source, d.seq));
        }

        Ok(Some((MacState::TransmittingAck, "DATA received")))
    }

    pub(super) fn transmit_cts(&mut self) -> Result<Step, MacError> {
        if self.nav.update(&self.timer, self.timing.slot) > 0.0 {
            return Ok((MacState::TransmittingCts, "NAV > 0"));
        }

        let fields = FrameFields {
            destination: self.peer,
            reservation_us: self.timing.cts_reservation_us(self.rts_duration),
            ..Default::default()
        };
        let f = self.codec.encode(FrameKind::Cts, &fields, CONTROL_ENCODING)?;
        self.phy.transmit(&f.bytes, CONTROL_ENCODING as u8, self.timer.ticks_us())?;
        info!("TX CTS to {} (duration {} us)", self.peer, f.duration);

        self.wait_remaining = self.timing.sifs;

        Ok((MacState::WaitingForData, "CTS sent"))
    }

    pub(super) fn wait_for_data(&mut self) -> Result<Step, MacError> {
        let start = self.timer.now();

        let step = match self.poll_frame(TailKind::Data)? {
            Some(f) => self.receive_data(f)?,
            None => None,
        };
        let open = self.wait_slot(start)?;

        if let Some(step) = step {
            return Ok(step);
        }
        if open {
            return Ok((MacState::WaitingForData, "DATA not received yet"));
        }

        if self.reassembly.take().is_some() {
            warn!("Fragment train from {} timed out, discarding payload", self.peer);
        }

        Ok((MacState::Idle, "DATA not received"))
    }

    fn send_ack(&mut self) -> Result<(), MacError> {
        let fields = FrameFields {
            destination: self.peer,
            ..Default::default()
        };
        let f = self.codec.encode(FrameKind::Ack, &fields, CONTROL_ENCODING)?;
        self.phy.transmit(&f.bytes, CONTROL_ENCODING as u8, self.timer.ticks_us())?;
        info!("TX ACK to {}", self.peer);

        self.stats.ack_tx = self.stats.ack_tx.saturating_add(1);

        Ok(())
    }

    pub(super) fn transmit_ack(&mut self) -> Result<Step, MacError> {
        self.send_ack()?;
        Ok((MacState::Idle, "ACK sent"))
    }

    pub(super) fn transmit_ack_fragment(&mut self) -> Result<Step, MacError> {
        self.send_ack()?;
        self.wait_remaining = self.timing.sifs;
        Ok((MacState::WaitingForData, "fragment ACK sent"))
    }
}
