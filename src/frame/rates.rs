//! OFDM encoding tables
//!
//! Index | Modulation   | Nominal rate
//! ------|--------------|-------------
//!   0   | BPSK  r=1/2  |  6 Mbit/s
//!   1   | BPSK  r=3/4  |  9 Mbit/s
//!   2   | QPSK  r=1/2  | 12 Mbit/s
//!   3   | QPSK  r=3/4  | 18 Mbit/s
//!   4   | QAM16 r=1/2  | 24 Mbit/s
//!   5   | QAM16 r=3/4  | 36 Mbit/s
//!   6   | QAM64 r=2/3  | 48 Mbit/s
//!   7   | QAM64 r=3/4  | 54 Mbit/s

/// Number of supported encodings
pub const NUM_ENCODINGS: usize = 8;

/// Data bits carried per OFDM symbol for each encoding
pub const BITS_PER_SYMBOL: [f64; NUM_ENCODINGS] = [24.0, 36.0, 48.0, 72.0, 96.0, 144.0, 192.0, 216.0];

/// Nominal bit rate (Mbit/s) for each encoding
pub const NOMINAL_MBPS: [u32; NUM_ENCODINGS] = [6, 9, 12, 18, 24, 36, 48, 54];

/// Encoding used for control frames (RTS, CTS, ACK)
pub const CONTROL_ENCODING: usize = 0;

/// SERVICE (16) + FCS (32) + TAIL (6) bits added to every PSDU
const OVERHEAD_BITS: f64 = 54.0;

/// Preamble and SIGNAL symbols ahead of the data symbols
const PREAMBLE_SYMBOLS: u64 = 5;

/// Samples per OFDM symbol (64 FFT + 16 cyclic prefix)
const SAMPLES_PER_SYMBOL: f64 = 80.0;

/// OFDM symbol duration in seconds for a given sample rate
pub fn symbol_duration(sample_rate: f64) -> f64 {
    SAMPLES_PER_SYMBOL / sample_rate
}

/// Number of data symbols needed for `len` bytes at an encoding
pub fn symbol_count(len: usize, encoding: usize) -> Option<u64> {
    let bps = BITS_PER_SYMBOL.get(encoding)?;
    Some(((OVERHEAD_BITS + 8.0 * len as f64) / bps).ceil() as u64)
}

/// Airtime in microseconds for `len` bytes at an encoding.
///
/// Includes the 2 µs the reference frames in annex G carry on top of
/// the symbol arithmetic.
pub fn airtime_us(len: usize, encoding: usize, t_sym: f64) -> Option<u32> {
    let n_sym = symbol_count(len, encoding)?;
    Some(((PREAMBLE_SYMBOLS + n_sym) as f64 * t_sym * 1e6).floor() as u32 + 2)
}
