//! Links to the PHY and upper layer services.
//!
//! The MAC only ever talks to its neighbours through the [`PhyLink`] and
//! [`UpperLink`] traits, implemented over sockets ([`socket`]), in process
//! ([`crate::service::upper::UpperBuffer`]) or by test doubles ([`mock`]).

use core::convert::TryFrom;

use strum::{Display, EnumString};

use crate::error::LinkError;

pub mod wire;

pub mod socket;
pub use socket::{SocketPhy, SocketUpper};

pub mod shared;
pub use shared::{SharedLinkState, Neighbor};

pub mod classifier;
pub use classifier::{Classifier, FrameSource};

#[cfg(any(test, feature = "mocks"))]
pub mod mock;

/// Queries the MAC can make of the PHY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum TailKind {
    #[strum(serialize = "DATA")]
    Data,
    #[strum(serialize = "ACK")]
    Ack,
    #[strum(serialize = "RTS")]
    Rts,
    #[strum(serialize = "CTS")]
    Cts,
    #[strum(serialize = "NODE")]
    Node,
    #[strum(serialize = "SAMP_RATE")]
    SampRate,
}

impl From<TailKind> for u8 {
    fn from(k: TailKind) -> u8 {
        match k {
            TailKind::Data => 0,
            TailKind::Ack => 1,
            TailKind::Rts => 2,
            TailKind::Cts => 3,
            TailKind::Node => 4,
            TailKind::SampRate => 5,
        }
    }
}

impl TryFrom<u8> for TailKind {
    type Error = LinkError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(TailKind::Data),
            1 => Ok(TailKind::Ack),
            2 => Ok(TailKind::Rts),
            3 => Ok(TailKind::Cts),
            4 => Ok(TailKind::Node),
            5 => Ok(TailKind::SampRate),
            _ => Err(LinkError::Protocol),
        }
    }
}

/// MAC to PHY interface
pub trait PhyLink {
    /// Pop the oldest received frame of a kind, `None` when the queue is empty.
    ///
    /// `Node` and `SampRate` return the PHY's configuration instead.
    fn tail(&mut self, kind: TailKind) -> Result<Option<Vec<u8>>, LinkError>;

    /// Hand a frame to the PHY for transmission at an encoding
    fn transmit(&mut self, frame: &[u8], encoding: u8, timestamp_us: u64) -> Result<(), LinkError>;

    /// Measure channel power in dBW
    fn cca(&mut self) -> Result<f32, LinkError>;

    /// Node identifier configured in the PHY
    fn node_id(&mut self) -> Result<Option<u8>, LinkError> {
        Ok(self.tail(TailKind::Node)?.and_then(|b| b.first().copied()))
    }

    /// Baseband sample rate of the PHY in Hz
    fn sample_rate(&mut self) -> Result<Option<f64>, LinkError> {
        match self.tail(TailKind::SampRate)? {
            Some(b) if b.len() == 8 => {
                let mut v = [0u8; 8];
                v.copy_from_slice(&b);
                Ok(Some(f64::from_le_bytes(v)))
            },
            Some(_) => Err(LinkError::Protocol),
            None => Ok(None),
        }
    }
}

/// Head of the upper layer transmit queue
#[derive(Debug, Clone, PartialEq)]
pub enum UpperPoll {
    /// A payload is waiting
    Payload(Vec<u8>),
    /// A beacon is due
    Beacon,
    /// Nothing queued
    Empty,
}

/// MAC to upper layer interface
pub trait UpperLink {
    /// Peek the head of the transmit queue without removing it
    fn poll(&mut self) -> Result<UpperPoll, LinkError>;

    /// Drop the head of the transmit queue
    fn remove(&mut self) -> Result<(), LinkError>;

    /// Deliver a received payload
    fn deliver(&mut self, payload: &[u8]) -> Result<(), LinkError>;
}
