//! 802.11 MAC frame codec
//!
//! Builds and parses the fixed frame layouts exchanged with the PHY.
//! The FCS is not part of the MPDU here, the PHY appends it on transmit
//! and strips it on receive, it is only accounted for in length checks.
//!
//! ```text
//! RTS     [b4 00][dur:2][ra:6][ta:6]
//! CTS     [c4 00][dur:2][ra:6]
//! ACK     [d4 00][dur:2][ra:6]
//! DATA    [08 fl][dur:2][da:6][sa:6][bssid:6][seqctl:2][payload..]
//! BEACON  [80 00][dur:2][da:6][sa:6][bssid:6][seqctl:2][ts:8][bi:2][cap:2][ssid ie..]
//! ```
//!
//! Multi-byte fields are little endian. BSSID is always broadcast and the
//! capability field is always zero, neither survives a decode.

use core::convert::TryFrom;
use core::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use strum::{Display, EnumString};

use crate::error::FrameError;

mod address;
pub use address::*;

pub mod rates;
use rates::NUM_ENCODINGS;

/// Maximum MPDU length including the FCS
pub const MAX_MPDU_LEN: usize = 2304;

/// FCS length appended by the PHY
pub const FCS_LEN: usize = 4;

/// Fixed DATA header length
pub const DATA_HEADER_LEN: usize = 24;

/// Largest DATA payload that still fits in an MPDU
pub const MAX_DATA_PAYLOAD: usize = MAX_MPDU_LEN - FCS_LEN - DATA_HEADER_LEN;

const BEACON_HEADER_LEN: usize = 36;
const RTS_LEN: usize = 16;
const CTL_LEN: usize = 10;

/// Sequence numbers wrap at 12 bits
pub const SEQ_MODULO: u16 = 4096;

/// Beacon intervals are expressed in time units of 1024 µs
pub const TIME_UNIT_US: u64 = 1024;

const TYPE_BEACON: u8 = 0x80;
const TYPE_RTS: u8 = 0xb4;
const TYPE_CTS: u8 = 0xc4;
const TYPE_ACK: u8 = 0xd4;
const TYPE_DATA: u8 = 0x08;

const SSID_ELEMENT_ID: u8 = 0x00;

bitflags::bitflags! {
    /// Second frame-control byte of DATA frames
    pub struct DataFlags: u8 {
        const MORE_FRAGMENTS = 0x04;
        const RETRY = 0x08;
    }
}

/// Frame kinds understood by the MAC, named as on the PHY control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum FrameKind {
    #[strum(serialize = "BEACON")]
    Beacon,
    #[strum(serialize = "CTS")]
    Cts,
    #[strum(serialize = "RTS")]
    Rts,
    #[strum(serialize = "ACK")]
    Ack,
    #[strum(serialize = "DATA")]
    Data,
    #[strum(serialize = "DATA_FRAG")]
    DataFrag,
    #[strum(serialize = "DATA_RETX")]
    DataRetx,
}

impl FrameKind {
    /// Parse a frame kind by name
    pub fn parse(name: &str) -> Result<Self, FrameError> {
        name.parse().map_err(|_| FrameError::InvalidFrameKind)
    }

    /// Whether this is one of the DATA family
    pub fn is_data(&self) -> bool {
        matches!(self, FrameKind::Data | FrameKind::DataFrag | FrameKind::DataRetx)
    }

    fn data_flags(&self) -> DataFlags {
        match self {
            FrameKind::DataFrag => DataFlags::MORE_FRAGMENTS,
            FrameKind::DataRetx => DataFlags::RETRY,
            _ => DataFlags::empty(),
        }
    }
}

/// RTS body
#[derive(Debug, Clone, PartialEq)]
pub struct Rts {
    pub duration: u16,
    pub receiver: MacAddress,
    pub transmitter: MacAddress,
}

/// CTS and ACK body
#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    pub duration: u16,
    pub receiver: MacAddress,
}

/// DATA, DATA_FRAG and DATA_RETX body
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub duration: u16,
    pub destination: MacAddress,
    pub source: MacAddress,
    pub seq: u16,
    pub frag: u8,
    pub payload: Vec<u8>,
}

/// Beacon body
#[derive(Debug, Clone, PartialEq)]
pub struct Beacon {
    pub duration: u16,
    pub source: MacAddress,
    pub seq: u16,
    pub frag: u8,
    /// Advertised timestamp in microseconds
    pub timestamp: u64,
    /// Beacon interval in time units
    pub interval_tu: u16,
    pub ssid: Vec<u8>,
}

impl Beacon {
    /// Beacon interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_tu as u64 * TIME_UNIT_US)
    }
}

/// Decoded MAC frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Beacon(Beacon),
    Cts(Control),
    Rts(Rts),
    Ack(Control),
    Data(DataFrame),
    DataFrag(DataFrame),
    DataRetx(DataFrame),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Beacon(_) => FrameKind::Beacon,
            Frame::Cts(_) => FrameKind::Cts,
            Frame::Rts(_) => FrameKind::Rts,
            Frame::Ack(_) => FrameKind::Ack,
            Frame::Data(_) => FrameKind::Data,
            Frame::DataFrag(_) => FrameKind::DataFrag,
            Frame::DataRetx(_) => FrameKind::DataRetx,
        }
    }

    /// Duration field in microseconds
    pub fn duration(&self) -> u16 {
        match self {
            Frame::Beacon(b) => b.duration,
            Frame::Cts(c) | Frame::Ack(c) => c.duration,
            Frame::Rts(r) => r.duration,
            Frame::Data(d) | Frame::DataFrag(d) | Frame::DataRetx(d) => d.duration,
        }
    }

    /// Receiver (first) address
    pub fn receiver(&self) -> MacAddress {
        match self {
            Frame::Beacon(_) => MacAddress::BROADCAST,
            Frame::Cts(c) | Frame::Ack(c) => c.receiver,
            Frame::Rts(r) => r.receiver,
            Frame::Data(d) | Frame::DataFrag(d) | Frame::DataRetx(d) => d.destination,
        }
    }

    /// Transmitter address where the frame carries one
    pub fn transmitter(&self) -> Option<MacAddress> {
        match self {
            Frame::Beacon(b) => Some(b.source),
            Frame::Cts(_) | Frame::Ack(_) => None,
            Frame::Rts(r) => Some(r.transmitter),
            Frame::Data(d) | Frame::DataFrag(d) | Frame::DataRetx(d) => Some(d.source),
        }
    }

    /// DATA family body
    pub fn data(&self) -> Option<&DataFrame> {
        match self {
            Frame::Data(d) | Frame::DataFrag(d) | Frame::DataRetx(d) => Some(d),
            _ => None,
        }
    }

    /// More-fragments flag
    pub fn more_fragments(&self) -> bool {
        matches!(self, Frame::DataFrag(_))
    }
}

/// Caller supplied values for a frame under construction.
///
/// Fields a kind does not carry are ignored.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameFields<'a> {
    /// Transmitter / source address
    pub source: MacAddress,
    /// Receiver / destination address
    pub destination: MacAddress,
    pub seq: u16,
    pub frag: u8,
    /// Extra medium reservation added to RTS / CTS durations, in µs
    pub reservation_us: u32,
    pub payload: &'a [u8],
    /// Beacon timestamp in µs
    pub timestamp: u64,
    pub beacon_interval: Duration,
    pub ssid: &'a [u8],
}

/// A serialized frame ready for the PHY
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub kind: FrameKind,
    pub bytes: Vec<u8>,
    /// Time on air of this frame alone in microseconds
    pub airtime_us: u32,
    /// Value written to the duration field
    pub duration: u16,
}

/// Frame encoder / decoder bound to a symbol duration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameCodec {
    t_sym: f64,
}

impl FrameCodec {
    /// Create a codec for the provided OFDM symbol duration (seconds)
    pub fn new(t_sym: f64) -> Self {
        Self { t_sym }
    }

    pub fn t_sym(&self) -> f64 {
        self.t_sym
    }

    /// Airtime in microseconds of an MPDU of `len` bytes
    pub fn airtime_us(&self, len: usize, encoding: usize) -> Result<u32, FrameError> {
        rates::airtime_us(len, encoding, self.t_sym).ok_or(FrameError::UnsupportedEncoding(encoding))
    }

    /// Build a frame of the given kind
    pub fn encode(&self, kind: FrameKind, fields: &FrameFields, encoding: usize) -> Result<EncodedFrame, FrameError> {
        if encoding >= NUM_ENCODINGS {
            return Err(FrameError::UnsupportedEncoding(encoding));
        }

        let len = match kind {
            FrameKind::Rts => RTS_LEN,
            FrameKind::Cts | FrameKind::Ack => CTL_LEN,
            FrameKind::Beacon if fields.ssid.is_empty() => BEACON_HEADER_LEN,
            FrameKind::Beacon => BEACON_HEADER_LEN + 2 + fields.ssid.len(),
            _ => DATA_HEADER_LEN + fields.payload.len(),
        };

        let ssid_too_long = kind == FrameKind::Beacon && fields.ssid.len() > u8::MAX as usize;
        if len + FCS_LEN > MAX_MPDU_LEN || ssid_too_long {
            return Err(FrameError::FrameTooLarge(len + FCS_LEN));
        }

        let airtime_us = self.airtime_us(len, encoding)?;

        let duration = match kind {
            FrameKind::Rts | FrameKind::Cts => saturate_us(airtime_us as u64 + fields.reservation_us as u64),
            FrameKind::Ack => 0,
            _ => saturate_us(airtime_us as u64),
        };

        let mut buf = BytesMut::with_capacity(len);

        match kind {
            FrameKind::Rts => {
                buf.put_slice(&[TYPE_RTS, 0x00]);
                buf.put_u16_le(duration);
                buf.put_slice(fields.destination.as_bytes());
                buf.put_slice(fields.source.as_bytes());
            },
            FrameKind::Cts | FrameKind::Ack => {
                let t = if kind == FrameKind::Cts { TYPE_CTS } else { TYPE_ACK };
                buf.put_slice(&[t, 0x00]);
                buf.put_u16_le(duration);
                buf.put_slice(fields.destination.as_bytes());
            },
            FrameKind::Beacon => {
                buf.put_slice(&[TYPE_BEACON, 0x00]);
                buf.put_u16_le(duration);
                buf.put_slice(MacAddress::BROADCAST.as_bytes());
                buf.put_slice(fields.source.as_bytes());
                buf.put_slice(MacAddress::BROADCAST.as_bytes());
                buf.put_u16_le(seq_control(fields.seq, fields.frag));
                buf.put_u64_le(fields.timestamp);
                buf.put_u16_le(interval_tu(fields.beacon_interval));
                buf.put_u16_le(0);
                if !fields.ssid.is_empty() {
                    buf.put_u8(SSID_ELEMENT_ID);
                    buf.put_u8(fields.ssid.len() as u8);
                    buf.put_slice(fields.ssid);
                }
            },
            FrameKind::Data | FrameKind::DataFrag | FrameKind::DataRetx => {
                buf.put_slice(&[TYPE_DATA, kind.data_flags().bits()]);
                buf.put_u16_le(duration);
                buf.put_slice(fields.destination.as_bytes());
                buf.put_slice(fields.source.as_bytes());
                buf.put_slice(MacAddress::BROADCAST.as_bytes());
                buf.put_u16_le(seq_control(fields.seq, fields.frag));
                buf.put_slice(fields.payload);
            },
        }

        Ok(EncodedFrame {
            kind,
            bytes: buf.to_vec(),
            airtime_us,
            duration,
        })
    }

    /// Parse a frame received from the PHY
    pub fn decode(&self, bytes: &[u8]) -> Result<Frame, FrameError> {
        decode(bytes)
    }
}

/// Parse a frame, independent of the symbol duration
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    let (t, fl) = match bytes {
        [] => return Err(FrameError::TruncatedFrame),
        [t] => (*t, None),
        [t, fl, ..] => (*t, Some(*fl)),
    };

    let min_len = match t {
        TYPE_BEACON => BEACON_HEADER_LEN,
        TYPE_RTS => RTS_LEN,
        TYPE_CTS | TYPE_ACK => CTL_LEN,
        TYPE_DATA => DATA_HEADER_LEN,
        _ => return Err(FrameError::UnrecognizedFrame),
    };

    // The DATA family is only identified by its second byte
    let flags = match (t, fl) {
        (TYPE_DATA, Some(f)) => match DataFlags::from_bits(f) {
            Some(f) if f != DataFlags::all() => Some(f),
            _ => return Err(FrameError::UnrecognizedFrame),
        },
        _ => None,
    };

    if bytes.len() < min_len {
        return Err(FrameError::TruncatedFrame);
    }

    let mut b = &bytes[2..];
    let duration = b.get_u16_le();

    let frame = match t {
        TYPE_RTS => Frame::Rts(Rts {
            duration,
            receiver: take_address(&mut b),
            transmitter: take_address(&mut b),
        }),
        TYPE_CTS => Frame::Cts(Control { duration, receiver: take_address(&mut b) }),
        TYPE_ACK => Frame::Ack(Control { duration, receiver: take_address(&mut b) }),
        TYPE_BEACON => {
            let _da = take_address(&mut b);
            let source = take_address(&mut b);
            let _bssid = take_address(&mut b);
            let (seq, frag) = split_seq_control(b.get_u16_le());
            let timestamp = b.get_u64_le();
            let interval_tu = b.get_u16_le();
            let _cap = b.get_u16_le();

            // Optional SSID element, clipped to the bytes actually present
            let ssid = match b {
                [SSID_ELEMENT_ID, n, rest @ ..] => rest[..(*n as usize).min(rest.len())].to_vec(),
                _ => Vec::new(),
            };

            Frame::Beacon(Beacon { duration, source, seq, frag, timestamp, interval_tu, ssid })
        },
        _ => {
            let destination = take_address(&mut b);
            let source = take_address(&mut b);
            let _bssid = take_address(&mut b);
            let (seq, frag) = split_seq_control(b.get_u16_le());
            let data = DataFrame { duration, destination, source, seq, frag, payload: b.to_vec() };

            match flags.unwrap_or_else(DataFlags::empty) {
                f if f.contains(DataFlags::MORE_FRAGMENTS) => Frame::DataFrag(data),
                f if f.contains(DataFlags::RETRY) => Frame::DataRetx(data),
                _ => Frame::Data(data),
            }
        },
    };

    Ok(frame)
}

impl TryFrom<&[u8]> for Frame {
    type Error = FrameError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        decode(bytes)
    }
}

/// Next sequence number, wrapping at 4096
pub fn next_seq(seq: u16) -> u16 {
    (seq + 1) % SEQ_MODULO
}

/// Split a payload into fragments of at most `threshold` bytes.
///
/// A payload no larger than the threshold (or a zero threshold) yields
/// a single fragment.
pub fn fragment(payload: &[u8], threshold: usize) -> Vec<Vec<u8>> {
    if threshold == 0 || payload.len() <= threshold {
        return vec![payload.to_vec()];
    }
    payload.chunks(threshold).map(|c| c.to_vec()).collect()
}

fn take_address(b: &mut &[u8]) -> MacAddress {
    let a = MacAddress::read(*b);
    b.advance(6);
    a
}

/// Pack 4-bit fragment and 12-bit sequence numbers
fn seq_control(seq: u16, frag: u8) -> u16 {
    ((seq % SEQ_MODULO) << 4) | (frag & 0x0f) as u16
}

fn split_seq_control(v: u16) -> (u16, u8) {
    (v >> 4, (v & 0x0f) as u8)
}

fn saturate_us(us: u64) -> u16 {
    u16::try_from(us).unwrap_or(u16::MAX)
}

/// Beacon interval in time units, saturating at the field maximum
fn interval_tu(interval: Duration) -> u16 {
    let us = interval.as_micros() as u64;
    u16::try_from(us / TIME_UNIT_US + 1).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod test {
    use super::*;

    fn codec() -> FrameCodec {
        FrameCodec::new(rates::symbol_duration(10e6))
    }

    fn fields<'a>(payload: &'a [u8]) -> FrameFields<'a> {
        FrameFields {
            source: MacAddress::from_node(1),
            destination: MacAddress::from_node(2),
            seq: 1234,
            frag: 3,
            reservation_us: 500,
            payload,
            timestamp: 0x0102_0304_0506_0708,
            beacon_interval: Duration::from_secs(1),
            ssid: b"uwicore",
        }
    }

    #[test]
    fn kind_names() {
        assert_eq!(FrameKind::parse("DATA_RETX"), Ok(FrameKind::DataRetx));
        assert_eq!(FrameKind::parse("BEACON"), Ok(FrameKind::Beacon));
        assert_eq!(FrameKind::parse("PROBE"), Err(FrameError::InvalidFrameKind));
        assert_eq!(FrameKind::DataFrag.to_string(), "DATA_FRAG");
    }

    #[test]
    fn rts_layout() {
        let c = codec();
        let f = fields(&[]);
        let e = c.encode(FrameKind::Rts, &f, 0).unwrap();

        assert_eq!(e.bytes.len(), 16);
        assert_eq!(&e.bytes[..2], &[0xb4, 0x00]);
        assert_eq!(e.duration as u32, e.airtime_us + 500);
        assert_eq!(&e.bytes[2..4], &e.duration.to_le_bytes());
        assert_eq!(&e.bytes[4..10], f.destination.as_bytes());
        assert_eq!(&e.bytes[10..16], f.source.as_bytes());

        let d = c.decode(&e.bytes).unwrap();
        assert_eq!(d, Frame::Rts(Rts{ duration: e.duration, receiver: f.destination, transmitter: f.source }));
    }

    #[test]
    fn control_round_trip() {
        let c = codec();
        let f = fields(&[]);

        let cts = c.encode(FrameKind::Cts, &f, 0).unwrap();
        assert_eq!(cts.bytes.len(), 10);
        assert_eq!(c.decode(&cts.bytes).unwrap(), Frame::Cts(Control{ duration: cts.duration, receiver: f.destination }));

        let ack = c.encode(FrameKind::Ack, &f, 0).unwrap();
        assert_eq!(ack.bytes[0], 0xd4);
        assert_eq!(ack.duration, 0);
        assert_eq!(c.decode(&ack.bytes).unwrap(), Frame::Ack(Control{ duration: 0, receiver: f.destination }));
    }

    #[test]
    fn data_round_trip() {
        let c = codec();
        let payload = b"TEST_1";
        let f = fields(payload);

        for (kind, second) in &[(FrameKind::Data, 0x00), (FrameKind::DataFrag, 0x04), (FrameKind::DataRetx, 0x08)] {
            let e = c.encode(*kind, &f, 2).unwrap();
            assert_eq!(e.bytes.len(), 24 + payload.len());
            assert_eq!(&e.bytes[..2], &[0x08, *second]);
            assert_eq!(&e.bytes[16..22], &[0xff; 6]);

            let d = c.decode(&e.bytes).unwrap();
            assert_eq!(d.kind(), *kind);
            assert_eq!(d.more_fragments(), *kind == FrameKind::DataFrag);

            let data = d.data().unwrap();
            assert_eq!(data.source, f.source);
            assert_eq!(data.destination, f.destination);
            assert_eq!(data.seq, 1234);
            assert_eq!(data.frag, 3);
            assert_eq!(data.duration as u32, e.airtime_us);
            assert_eq!(&data.payload[..], payload);
        }
    }

    #[test]
    fn beacon_round_trip() {
        let c = codec();
        let f = fields(&[]);

        let e = c.encode(FrameKind::Beacon, &f, 0).unwrap();
        assert_eq!(e.bytes.len(), 36 + 2 + 7);
        assert_eq!(&e.bytes[4..10], &[0xff; 6]);

        match c.decode(&e.bytes).unwrap() {
            Frame::Beacon(b) => {
                assert_eq!(b.source, f.source);
                assert_eq!(b.seq, 1234);
                assert_eq!(b.timestamp, f.timestamp);
                // 1 s / 1024 µs = 976.56 -> 977
                assert_eq!(b.interval_tu, 977);
                assert_eq!(&b.ssid[..], b"uwicore");
            },
            other => panic!("unexpected frame {:?}", other),
        }

        // No SSID element
        let f = FrameFields{ ssid: &[], ..f };
        let e = c.encode(FrameKind::Beacon, &f, 0).unwrap();
        assert_eq!(e.bytes.len(), 36);
        match c.decode(&e.bytes).unwrap() {
            Frame::Beacon(b) => assert!(b.ssid.is_empty()),
            other => panic!("unexpected frame {:?}", other),
        }

        // Intervals above the field range saturate
        assert_eq!(interval_tu(Duration::from_secs(100)), 0xffff);
    }

    #[test]
    fn sequence_control() {
        assert_eq!(seq_control(0xabc, 0x5), 0xabc5);
        assert_eq!(split_seq_control(0xabc5), (0xabc, 0x5));

        // Low byte carries the fragment and the low sequence nibble
        assert_eq!(seq_control(0xabc, 0x5).to_le_bytes(), [0xc5, 0xab]);
    }

    #[test]
    fn sequence_wrap() {
        assert_eq!(next_seq(4095), 0);
        assert_eq!(next_seq(0), 1);

        let mut seen = vec![false; SEQ_MODULO as usize];
        let mut s = 0;
        for _ in 0..SEQ_MODULO {
            assert!(!seen[s as usize]);
            seen[s as usize] = true;
            s = next_seq(s);
        }
        assert_eq!(s, 0);
    }

    #[test]
    fn decode_errors() {
        assert_eq!(decode(&[]), Err(FrameError::TruncatedFrame));
        assert_eq!(decode(&[0x42, 0x00, 0x00]), Err(FrameError::UnrecognizedFrame));
        assert_eq!(decode(&[0x08, 0x02]), Err(FrameError::UnrecognizedFrame));
        assert_eq!(decode(&[0xb4, 0x00, 0x10, 0x00]), Err(FrameError::TruncatedFrame));
        assert_eq!(decode(&[0x08, 0x00, 0x10]), Err(FrameError::TruncatedFrame));
        assert_eq!(decode(&[0x80; 20]), Err(FrameError::TruncatedFrame));
    }

    #[test]
    fn encode_errors() {
        let c = codec();

        let big = vec![0u8; MAX_DATA_PAYLOAD + 1];
        assert_eq!(c.encode(FrameKind::Data, &fields(&big), 0), Err(FrameError::FrameTooLarge(MAX_MPDU_LEN + 1)));

        let max = vec![0u8; MAX_DATA_PAYLOAD];
        assert!(c.encode(FrameKind::Data, &fields(&max), 0).is_ok());

        assert_eq!(c.encode(FrameKind::Ack, &fields(&[]), 8), Err(FrameError::UnsupportedEncoding(8)));
    }

    #[test]
    fn reservation_saturates() {
        let c = codec();
        let f = FrameFields{ reservation_us: 1_000_000, ..fields(&[]) };
        let e = c.encode(FrameKind::Cts, &f, 0).unwrap();
        assert_eq!(e.duration, u16::MAX);
    }

    #[test]
    fn fragmentation() {
        let p: Vec<u8> = (0..25).collect();

        let f = fragment(&p, 10);
        assert_eq!(f.len(), 3);
        assert_eq!(f[2].len(), 5);
        assert_eq!(f.concat(), p);

        assert_eq!(fragment(&p, 25).len(), 1);
        assert_eq!(fragment(&p, 0).len(), 1);
        assert_eq!(fragment(&[], 10), vec![Vec::<u8>::new()]);
    }
}
