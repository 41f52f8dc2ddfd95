//! DCF MAC crate prelude
//
// dcf-mac
// SPDX-License-Identifier: MPL-2.0

pub use crate::mac::{Dcf, MacConfig, MacState, MacStats};
pub use crate::mac::config::{PHY_PORT, PHY_RX_PORT, UPPER_PORT};

pub use crate::error::{FrameError, LinkError, MacError};
pub use crate::timer::{Timer as MacTimer, SystemTimer};

pub use crate::frame::{Frame, FrameCodec, FrameFields, FrameKind, MacAddress};
pub use crate::timing::TimingModel;
pub use crate::rate::{RateAdapter, RateControl};

pub use crate::link::{PhyLink, UpperLink, UpperPoll, TailKind, SocketPhy, SocketUpper};
pub use crate::service::{PhyBackend, PhyServer, UpperBuffer, UpperServer};
