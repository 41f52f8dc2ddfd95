//! MAC error types

use core::fmt;

/// Frame codec errors
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    /// Frame kind name not understood
    InvalidFrameKind,

    /// Encoding index outside the rate table
    UnsupportedEncoding(usize),

    /// Serialized frame (plus FCS) exceeds the maximum MPDU length
    FrameTooLarge(usize),

    /// Leading bytes match no known frame type
    UnrecognizedFrame,

    /// Not enough bytes for the claimed frame type
    TruncatedFrame,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::InvalidFrameKind => write!(f, "invalid frame kind"),
            FrameError::UnsupportedEncoding(e) => write!(f, "unsupported encoding index {}", e),
            FrameError::FrameTooLarge(n) => write!(f, "frame of {} bytes exceeds the maximum MPDU length", n),
            FrameError::UnrecognizedFrame => write!(f, "unrecognized frame type"),
            FrameError::TruncatedFrame => write!(f, "truncated frame"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Errors talking to the PHY or upper layer services
#[derive(Debug, Clone, PartialEq)]
pub enum LinkError {
    /// Underlying socket error
    Io(std::io::ErrorKind),

    /// Malformed or unexpected control message
    Protocol,

    /// Peer closed the connection before responding
    Closed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Io(k) => write!(f, "link i/o error: {:?}", k),
            LinkError::Protocol => write!(f, "link protocol error"),
            LinkError::Closed => write!(f, "link closed"),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => LinkError::Closed,
            k => LinkError::Io(k),
        }
    }
}

/// MAC state machine errors
#[derive(Debug, Clone, PartialEq)]
pub enum MacError {
    /// A computed sleep went negative, the scaling factor is too small
    /// for the processing latency of this setup
    Timing {
        state: &'static str,
        deficit: f64,
    },

    /// PHY or upper layer link failure
    Link(LinkError),

    /// Failed to build an outgoing frame
    Frame(FrameError),

    /// Invalid configuration
    Config(&'static str),
}

impl fmt::Display for MacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacError::Timing{state, deficit} => write!(f,
                "timing error in state {} (short by {:.6} s), increase the beta parameter", state, deficit),
            MacError::Link(e) => write!(f, "{}", e),
            MacError::Frame(e) => write!(f, "{}", e),
            MacError::Config(m) => write!(f, "invalid configuration: {}", m),
        }
    }
}

impl std::error::Error for MacError {}

impl From<LinkError> for MacError {
    fn from(e: LinkError) -> Self {
        MacError::Link(e)
    }
}

impl From<FrameError> for MacError {
    fn from(e: FrameError) -> Self {
        MacError::Frame(e)
    }
}
