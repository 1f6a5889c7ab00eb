//! Shared types, error enums and small helpers for pw-core.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

/// All errors produced by pw-core.
#[derive(Debug, Error)]
pub enum PwError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Cpr(#[from] CprError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PwError>;

/// Outcome of decoding a single frame.
///
/// Frames cache their decode result, so this is `Clone` and comparable:
/// decoding twice hands back the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame is well formed but carries nothing worth decoding
    /// (keep-alives, Mode A/C, status messages, military DFs).
    #[error("frame carries no usable payload")]
    NoOp,
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("DF{df} expects {expected} bytes, got {actual}")]
    BadLength {
        df: u8,
        expected: usize,
        actual: usize,
    },
    #[error("unrecognized downlink format: {0}")]
    UnknownDf(u8),
    #[error("CRC validation failed")]
    Crc,
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("unknown beast message type 0x{0:02X}")]
    UnknownBeastType(u8),
    #[error("malformed beast frame ({0} bytes)")]
    BadBeastFrame(usize),
    #[error("bad SBS1 message: {0}")]
    Sbs1(String),
}

impl DecodeError {
    pub fn is_noop(&self) -> bool {
        matches!(self, DecodeError::NoOp)
    }
}

/// CPR position resolution failures. All of these are recoverable: the
/// caller drops the attempt and waits for the next fragment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CprError {
    #[error("no {0} CPR fragment to decode")]
    MissingFragment(&'static str),
    #[error("CPR pair is {0:.1}s apart")]
    StalePair(f64),
    #[error("even/odd latitude zones disagree ({even} vs {odd})")]
    ZoneMismatch { even: u32, odd: u32 },
    #[error("decoded position out of range: {lat:.6}, {lon:.6}")]
    OutOfRange { lat: f64, lon: f64 },
    #[error("surface or local decode needs a reference position")]
    NoReference,
}

// ---------------------------------------------------------------------------
// Downlink Format metadata
// ---------------------------------------------------------------------------

/// Metadata for a Downlink Format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfInfo {
    pub name: &'static str,
    pub bytes: usize,
}

/// Known Downlink Format table.
pub const DF_TABLE: &[(u8, DfInfo)] = &[
    (0, DfInfo { name: "Short air-air surveillance", bytes: 7 }),
    (4, DfInfo { name: "Surveillance altitude reply", bytes: 7 }),
    (5, DfInfo { name: "Surveillance identity reply", bytes: 7 }),
    (11, DfInfo { name: "All-call reply", bytes: 7 }),
    (16, DfInfo { name: "Long air-air surveillance", bytes: 14 }),
    (17, DfInfo { name: "ADS-B extended squitter", bytes: 14 }),
    (18, DfInfo { name: "TIS-B / ADS-R", bytes: 14 }),
    (19, DfInfo { name: "Military extended squitter", bytes: 14 }),
    (20, DfInfo { name: "Comm-B altitude reply", bytes: 14 }),
    (21, DfInfo { name: "Comm-B identity reply", bytes: 14 }),
    (22, DfInfo { name: "Military use", bytes: 14 }),
    (24, DfInfo { name: "Comm-D extended length message", bytes: 14 }),
];

/// Look up DF metadata. Returns `None` for unrecognized DFs.
pub fn df_info(df: u8) -> Option<&'static DfInfo> {
    DF_TABLE.iter().find(|(d, _)| *d == df).map(|(_, info)| info)
}

// ---------------------------------------------------------------------------
// ICAO address helpers
// ---------------------------------------------------------------------------

/// 3-byte ICAO address. Stored as raw bytes to avoid per-frame String allocation.
pub type Icao = [u8; 3];

/// Format ICAO address as 6-char uppercase hex string.
pub fn icao_to_string(icao: &Icao) -> String {
    format!("{:02X}{:02X}{:02X}", icao[0], icao[1], icao[2])
}

/// Parse a 6-char hex string into an ICAO address.
pub fn icao_from_hex(hex: &str) -> Option<Icao> {
    if hex.len() != 6 {
        return None;
    }
    let val = u32::from_str_radix(hex, 16).ok()?;
    Some(icao_from_u32(val))
}

pub fn icao_to_u32(icao: &Icao) -> u32 {
    ((icao[0] as u32) << 16) | ((icao[1] as u32) << 8) | (icao[2] as u32)
}

pub fn icao_from_u32(val: u32) -> Icao {
    [
        ((val >> 16) & 0xFF) as u8,
        ((val >> 8) & 0xFF) as u8,
        (val & 0xFF) as u8,
    ]
}

// ---------------------------------------------------------------------------
// Hex utilities
// ---------------------------------------------------------------------------

/// Decode a hex string into bytes. Case-insensitive, must be even length.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        bytes.push((high << 4) | low);
    }
    Some(bytes)
}

/// Encode bytes as uppercase hex string.
pub fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for &b in data {
        s.push(HEX_CHARS[(b >> 4) as usize] as char);
        s.push(HEX_CHARS[(b & 0x0F) as usize] as char);
    }
    s
}

const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// ADS-B character set for callsign encoding (6 bits per character).
pub const CALLSIGN_CHARSET: &[u8; 64] =
    b"#ABCDEFGHIJKLMNOPQRSTUVWXYZ##### ###############0123456789######";

/// Wall clock as fractional unix seconds.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Small value types shared by decoders and the plane model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AltitudeUnits {
    #[default]
    Feet,
    Metres,
}

impl std::fmt::Display for AltitudeUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AltitudeUnits::Feet => write!(f, "ft"),
            AltitudeUnits::Metres => write!(f, "m"),
        }
    }
}

/// Speed type for velocity messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpeedType {
    Ground,
    IAS,
    TAS,
}

impl std::fmt::Display for SpeedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeedType::Ground => write!(f, "ground"),
            SpeedType::IAS => write!(f, "IAS"),
            SpeedType::TAS => write!(f, "TAS"),
        }
    }
}

/// TC28 emergency / priority state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EmergencyState {
    None,
    General,
    Medical,
    MinimumFuel,
    NoCommunications,
    UnlawfulInterference,
    DownedAircraft,
    Reserved,
}

impl EmergencyState {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => EmergencyState::None,
            1 => EmergencyState::General,
            2 => EmergencyState::Medical,
            3 => EmergencyState::MinimumFuel,
            4 => EmergencyState::NoCommunications,
            5 => EmergencyState::UnlawfulInterference,
            6 => EmergencyState::DownedAircraft,
            _ => EmergencyState::Reserved,
        }
    }
}

impl std::fmt::Display for EmergencyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EmergencyState::None => "No Emergency",
            EmergencyState::General => "General Emergency",
            EmergencyState::Medical => "Lifeguard/Medical",
            EmergencyState::MinimumFuel => "Minimum Fuel",
            EmergencyState::NoCommunications => "No Communications",
            EmergencyState::UnlawfulInterference => "Unlawful Interference",
            EmergencyState::DownedAircraft => "Downed Aircraft",
            EmergencyState::Reserved => "Reserved",
        };
        f.write_str(s)
    }
}

/// Surface operational status length/width, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AirframeSize {
    pub length_m: f32,
    pub width_m: f32,
}
