//! Beast binary framing.
//!
//! Every message starts with the escape byte `0x1A` followed by a type
//! byte that fixes the logical length of the frame:
//!
//! | type   | kind          | total bytes |
//! |--------|---------------|-------------|
//! | `0x31` | Mode A/C      | 11          |
//! | `0x32` | Mode S short  | 16          |
//! | `0x33` | Mode S long   | 23          |
//! | `0x34` | status        | 11          |
//!
//! After the type byte come a 48-bit MLAT counter (500 ns ticks), one
//! signal byte and the payload. A literal `0x1A` anywhere after the type
//! byte is doubled on the wire.

use std::fmt;

use crate::mode_s::{ModeSFrame, ModeSMessage};
use crate::types::{hex_encode, DecodeError};

pub const ESCAPE: u8 = 0x1A;

const MLAT_MARKER: [u8; 6] = [0xFF, 0x00, 0x4D, 0x4C, 0x41, 0x54];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeastType {
    ModeAC,
    ModeSShort,
    ModeSLong,
    Status,
}

impl BeastType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x31 => Some(BeastType::ModeAC),
            0x32 => Some(BeastType::ModeSShort),
            0x33 => Some(BeastType::ModeSLong),
            0x34 => Some(BeastType::Status),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            BeastType::ModeAC => 0x31,
            BeastType::ModeSShort => 0x32,
            BeastType::ModeSLong => 0x33,
            BeastType::Status => 0x34,
        }
    }

    /// Logical frame length, escape and type byte included.
    pub fn frame_len(self) -> usize {
        9 + self.payload_len()
    }

    pub fn payload_len(self) -> usize {
        match self {
            BeastType::ModeAC | BeastType::Status => 2,
            BeastType::ModeSShort => 7,
            BeastType::ModeSLong => 14,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BeastType::ModeAC => "MODE_AC",
            BeastType::ModeSShort => "MODE_S_SHORT",
            BeastType::ModeSLong => "MODE_S_LONG",
            BeastType::Status => "RADARCAPE_STATUS",
        }
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Result of one scanning step over a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// The buffer holds at most a partial frame. Nothing was consumed.
    NeedMore,
    /// Drop this many leading bytes and scan again.
    Skip(usize),
    /// A complete frame, unescaped, and the number of wire bytes it used.
    Message { consumed: usize, message: Vec<u8> },
}

/// Find the next Beast frame at the front of `data`.
///
/// Never panics and always either makes progress (`Skip` / `Message`
/// consume at least one byte) or asks for more input.
pub fn scan_beast(data: &[u8]) -> Scan {
    let Some(start) = data.iter().position(|&b| b == ESCAPE) else {
        return if data.is_empty() {
            Scan::NeedMore
        } else {
            Scan::Skip(data.len())
        };
    };
    if start > 0 {
        return Scan::Skip(start);
    }
    let Some(&type_byte) = data.get(1) else {
        return Scan::NeedMore;
    };
    if type_byte == ESCAPE {
        // stuffed escape from a frame we joined half way through
        return Scan::Skip(2);
    }
    let Some(kind) = BeastType::from_byte(type_byte) else {
        return Scan::Skip(1);
    };

    let want = kind.frame_len();
    let mut message = Vec::with_capacity(want);
    message.extend_from_slice(&data[..2]);
    let mut idx = 2;
    while message.len() < want {
        let Some(&b) = data.get(idx) else {
            return Scan::NeedMore;
        };
        if b == ESCAPE {
            match data.get(idx + 1) {
                None => return Scan::NeedMore,
                Some(&ESCAPE) => idx += 1,
                // an unstuffed escape starts a new frame: this one was truncated
                Some(_) => return Scan::Skip(1),
            }
        }
        message.push(b);
        idx += 1;
    }
    Scan::Message {
        consumed: idx,
        message,
    }
}

/// Buffers a byte stream and yields complete Beast frames as they arrive.
#[derive(Debug, Default)]
pub struct BeastDeframer {
    buf: Vec<u8>,
    skipped: usize,
}

impl BeastDeframer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame, or `None` once the buffer needs more bytes.
    pub fn next_message(&mut self) -> Option<Vec<u8>> {
        loop {
            match scan_beast(&self.buf) {
                Scan::NeedMore => return None,
                Scan::Skip(n) => {
                    self.skipped += n;
                    self.buf.drain(..n);
                }
                Scan::Message { consumed, message } => {
                    self.buf.drain(..consumed);
                    return Some(message);
                }
            }
        }
    }

    /// Drain every complete frame currently buffered.
    pub fn messages(&mut self) -> impl Iterator<Item = Vec<u8>> + '_ {
        std::iter::from_fn(move || self.next_message())
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Bytes thrown away while resynchronising.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Build a wire-ready Beast frame, doubling any escape bytes.
pub fn encode_beast(kind: BeastType, mlat_ticks: u64, signal: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(kind.frame_len() + 4);
    out.push(ESCAPE);
    out.push(kind.as_byte());
    let ticks = mlat_ticks.to_be_bytes();
    for &b in ticks[2..].iter().chain(std::iter::once(&signal)).chain(payload) {
        out.push(b);
        if b == ESCAPE {
            out.push(ESCAPE);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// BeastFrame
// ---------------------------------------------------------------------------

/// One unescaped Beast message.
#[derive(Debug, Clone)]
pub struct BeastFrame {
    raw: Vec<u8>,
    kind: BeastType,
    timestamp: f64,
    mode_s: Option<ModeSFrame>,
}

impl BeastFrame {
    /// Wrap an unescaped frame as produced by [`scan_beast`].
    pub fn from_bytes(raw: Vec<u8>, timestamp: f64) -> Result<Self, DecodeError> {
        if raw.len() < 2 || raw[0] != ESCAPE {
            return Err(DecodeError::BadBeastFrame(raw.len()));
        }
        let kind = BeastType::from_byte(raw[1]).ok_or(DecodeError::UnknownBeastType(raw[1]))?;
        if raw.len() != kind.frame_len() {
            return Err(DecodeError::BadBeastFrame(raw.len()));
        }
        let mode_s = match kind {
            BeastType::ModeSShort | BeastType::ModeSLong => {
                Some(ModeSFrame::new(raw[9..].to_vec(), timestamp))
            }
            BeastType::ModeAC | BeastType::Status => None,
        };
        Ok(BeastFrame {
            raw,
            kind,
            timestamp,
            mode_s,
        })
    }

    pub fn kind(&self) -> BeastType {
        self.kind
    }

    /// The whole unescaped frame, escape and type byte included.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn payload(&self) -> &[u8] {
        &self.raw[9..]
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn mlat_ticks(&self) -> u64 {
        self.raw[2..8]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }

    /// Receiver uptime in nanoseconds, from the 12 MHz-derived MLAT counter.
    pub fn mlat_nanos(&self) -> u64 {
        self.mlat_ticks() * 500
    }

    /// True when the timestamp field carries the synthetic MLAT marker
    /// used by multilateration servers.
    pub fn is_mlat(&self) -> bool {
        self.raw[2..8] == MLAT_MARKER
    }

    pub fn signal_level(&self) -> u8 {
        self.raw[8]
    }

    /// Signal in dBFS. A zero signal byte gives negative infinity.
    pub fn rssi(&self) -> f64 {
        10.0 * (self.raw[8] as f64).log10()
    }

    pub fn mode_s(&self) -> Option<&ModeSFrame> {
        self.mode_s.as_ref()
    }

    /// Decode the embedded Mode S payload. Mode A/C and status frames are
    /// no-ops.
    pub fn decode(&self) -> Result<&ModeSMessage, DecodeError> {
        match &self.mode_s {
            Some(frame) => frame.decode(),
            None => Err(DecodeError::NoOp),
        }
    }
}

impl PartialEq for BeastFrame {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.timestamp == other.timestamp
    }
}

impl fmt::Display for BeastFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Type: {:<16}, Time: {:012X}, Signal RSSI {:.1} dBFS, Data: {}",
            self.kind.name(),
            self.mlat_ticks(),
            self.rssi(),
            hex_encode(self.payload())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODE_AC: [u8; 11] = [0x1A, 0x31, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    const MODE_S_SHORT: [u8; 16] = [
        0x1a, 0x32, 0x22, 0x1b, 0x54, 0xf0, 0x81, 0x2b, 0x26, 0x5d, 0x7c, 0x49, 0xf8, 0x28, 0xe9,
        0x43,
    ];
    const MODE_S_LONG: [u8; 23] = [
        0x1a, 0x33, 0x22, 0x1b, 0x54, 0xac, 0xc2, 0xe9, 0x28, 0x8d, 0x7c, 0x49, 0xf8, 0x58, 0x41,
        0xd2, 0x6c, 0xca, 0x39, 0x33, 0xe4, 0x1e, 0xcf,
    ];
    const LONG_STUFFED: [u8; 24] = [
        0x1a, 0x33, 0x22, 0x1b, 0x55, 0xe4, 0x1a, 0x1a, 0xa2, 0x2d, 0x8d, 0x7c, 0x49, 0xf8, 0xe1,
        0x1e, 0x2f, 0x00, 0x00, 0x00, 0x00, 0xee, 0xcc, 0x47,
    ];
    const LONG_UNSTUFFED: [u8; 23] = [
        0x1a, 0x33, 0x22, 0x1b, 0x55, 0xe4, 0x1a, 0xa2, 0x2d, 0x8d, 0x7c, 0x49, 0xf8, 0xe1, 0x1e,
        0x2f, 0x00, 0x00, 0x00, 0x00, 0xee, 0xcc, 0x47,
    ];

    fn message(data: &[u8]) -> (usize, Vec<u8>) {
        match scan_beast(data) {
            Scan::Message { consumed, message } => (consumed, message),
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[test]
    fn test_scan_not_enough() {
        assert_eq!(scan_beast(&[0x1a, 0x33, 0x22, 0x1b, 0x54]), Scan::NeedMore);
        assert_eq!(scan_beast(&[]), Scan::NeedMore);
        assert_eq!(scan_beast(&[0x1a]), Scan::NeedMore);
    }

    #[test]
    fn test_scan_each_type() {
        for frame in [&MODE_AC[..], &MODE_S_SHORT[..], &MODE_S_LONG[..]] {
            let mut data = frame.to_vec();
            data.extend_from_slice(&[0u8; 30]);
            let (consumed, msg) = message(&data);
            assert_eq!(consumed, frame.len());
            assert_eq!(msg, frame);
        }
    }

    #[test]
    fn test_scan_collapses_doubled_escape() {
        let (consumed, msg) = message(&LONG_STUFFED);
        assert_eq!(consumed, LONG_STUFFED.len());
        assert_eq!(msg, LONG_UNSTUFFED);
        // one byte short of the stuffed frame
        assert_eq!(scan_beast(&LONG_STUFFED[..23]), Scan::NeedMore);
    }

    #[test]
    fn test_scan_leading_garbage() {
        let mut data = MODE_S_SHORT[3..].to_vec();
        data.extend_from_slice(&MODE_S_SHORT);
        assert_eq!(scan_beast(&data), Scan::Skip(13));
        assert_eq!(message(&data[13..]).1, MODE_S_SHORT);

        assert_eq!(scan_beast(&[0x31, 0x33, 0x00]), Scan::Skip(3));
    }

    #[test]
    fn test_scan_resync_cases() {
        // unknown type byte
        assert_eq!(scan_beast(&[0x1A, 0x99, 0x1A, 0x32]), Scan::Skip(1));
        // stuffed escape outside a frame
        assert_eq!(scan_beast(&[0x1A, 0x1A, 0x32]), Scan::Skip(2));
        // truncated frame followed by a fresh one
        let mut data = MODE_S_LONG[..12].to_vec();
        data.extend_from_slice(&MODE_S_SHORT);
        assert_eq!(scan_beast(&data), Scan::Skip(1));
    }

    #[test]
    fn test_scan_trailing_escape_waits() {
        let data = [
            0xBB, 0x1A, 0x33, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x8D, 0x4D, 0x22, 0x72,
            0x99, 0x08, 0x41, 0xB7, 0x90, 0x6C, 0x28, 0x91, 0xA8, 0x1A,
        ];
        assert_eq!(scan_beast(&data), Scan::Skip(1));
        assert_eq!(scan_beast(&data[1..]), Scan::NeedMore);
    }

    #[test]
    fn test_deframer_resumes_at_every_split() {
        let mut stream = LONG_STUFFED.to_vec();
        stream.extend_from_slice(&MODE_S_SHORT);
        for split in 0..stream.len() {
            let mut d = BeastDeframer::new();
            d.push(&stream[..split]);
            let mut got: Vec<Vec<u8>> = d.messages().collect();
            d.push(&stream[split..]);
            got.extend(d.messages());
            assert_eq!(got, vec![LONG_UNSTUFFED.to_vec(), MODE_S_SHORT.to_vec()], "split {split}");
            assert_eq!(d.pending(), 0);
            assert_eq!(d.skipped(), 0);
        }
    }

    #[test]
    fn test_deframer_counts_skipped() {
        let mut d = BeastDeframer::new();
        d.push(&[0x00, 0x01, 0x1A, 0x99]);
        d.push(&MODE_AC);
        assert_eq!(d.next_message().unwrap(), MODE_AC);
        assert_eq!(d.skipped(), 4);
        assert!(d.next_message().is_none());
    }

    #[test]
    fn test_encode_roundtrip_with_escapes() {
        let payload = [0x8D, 0x1A, 0x49, 0xF8, 0x1A, 0x1A, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x1A];
        let wire = encode_beast(BeastType::ModeSLong, 0x1A_0000_1A1A, 0x1A, &payload);
        assert!(wire.len() > 23);

        let mut d = BeastDeframer::new();
        d.push(&wire);
        let frame = BeastFrame::from_bytes(d.next_message().unwrap(), 0.0).unwrap();
        assert_eq!(frame.payload(), payload);
        assert_eq!(frame.mlat_ticks(), 0x1A_0000_1A1A);
        assert_eq!(frame.signal_level(), 0x1A);
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn test_beast_frame_fields() {
        let frame = BeastFrame::from_bytes(MODE_S_LONG.to_vec(), 42.0).unwrap();
        assert_eq!(frame.kind(), BeastType::ModeSLong);
        assert_eq!(frame.mlat_ticks(), 0x221B54ACC2E9);
        assert_eq!(frame.mlat_nanos(), 0x221B54ACC2E9 * 500);
        assert!(!frame.is_mlat());
        assert!((frame.rssi() - 10.0 * 40f64.log10()).abs() < 1e-9);
        assert_eq!(frame.timestamp(), 42.0);

        let msg = frame.decode().unwrap();
        assert_eq!(msg.icao, [0x7C, 0x49, 0xF8]);
        assert_eq!(msg.type_code, Some(11));
    }

    #[test]
    fn test_beast_frame_stuffed_payload_decodes() {
        let frame = BeastFrame::from_bytes(LONG_UNSTUFFED.to_vec(), 0.0).unwrap();
        let msg = frame.decode().unwrap();
        assert_eq!(msg.type_code, Some(28));
        assert_eq!(msg.squawk.as_deref(), Some("3736"));
    }

    #[test]
    fn test_beast_frame_short_and_noop() {
        let short = BeastFrame::from_bytes(MODE_S_SHORT.to_vec(), 0.0).unwrap();
        assert_eq!(short.decode().unwrap().df, 11);

        let ac = BeastFrame::from_bytes(MODE_AC.to_vec(), 0.0).unwrap();
        assert!(ac.mode_s().is_none());
        assert!(ac.decode().unwrap_err().is_noop());
    }

    #[test]
    fn test_beast_frame_mlat_marker() {
        let mut raw = MODE_S_SHORT.to_vec();
        raw[2..8].copy_from_slice(&MLAT_MARKER);
        assert!(BeastFrame::from_bytes(raw, 0.0).unwrap().is_mlat());
    }

    #[test]
    fn test_beast_frame_rejects_malformed() {
        assert_eq!(
            BeastFrame::from_bytes(vec![0x1A, 0x39, 0, 0], 0.0).unwrap_err(),
            DecodeError::UnknownBeastType(0x39)
        );
        assert_eq!(
            BeastFrame::from_bytes(MODE_S_LONG[..20].to_vec(), 0.0).unwrap_err(),
            DecodeError::BadBeastFrame(20)
        );
        assert!(BeastFrame::from_bytes(vec![0x00; 23], 0.0).is_err());
    }
}
