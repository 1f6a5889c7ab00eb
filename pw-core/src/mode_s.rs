//! The Mode S frame model.
//!
//! A [`ModeSFrame`] owns a 7 or 14 byte payload and decodes it lazily on
//! first use. The outcome (message or error) is cached, so `decode()` is
//! idempotent and cheap after the first call.
//!
//! Responsibilities:
//! - Classify the Downlink Format (DF) from the first 5 bits
//! - Validate parity, repairing DF17/18 frames with 1-2 flipped bits
//! - Recover the ICAO address (explicit, or from the parity residual)
//! - Extract every field the format carries into a [`ModeSMessage`]

use std::sync::OnceLock;

use serde::Serialize;

use crate::crc;
use crate::decode::{
    aircraft_category, airframe_size, capability_on_ground, decode_ac12_altitude,
    decode_ac13_altitude, decode_callsign, decode_ground_track, decode_squawk,
    decode_surface_movement, decode_velocity, flight_status_flags, Altitude, Velocity,
};
use crate::types::{
    df_info, hex_decode, icao_from_u32, AirframeSize, AltitudeUnits, DecodeError,
    EmergencyState, Icao,
};

/// A raw CPR position fragment as carried by a surface or airborne
/// position squitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CprFragment {
    pub lat: u32,
    pub lon: u32,
    pub odd: bool,
    pub surface: bool,
}

/// Everything decoded from one Mode S reply. Fields the format does not
/// carry stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModeSMessage {
    pub df: u8,
    pub icao: Icao,
    /// True when the parity check failed and a 1-2 bit repair was applied.
    pub corrected: bool,
    /// ADS-B type code (DF17/18)
    pub type_code: Option<u8>,
    pub subtype: Option<u8>,
    pub capability: Option<u8>,
    pub flight_status: Option<u8>,
    pub on_ground: Option<bool>,
    pub alert: Option<bool>,
    pub spi: Option<bool>,
    pub altitude: Option<Altitude>,
    pub squawk: Option<String>,
    pub callsign: Option<String>,
    pub category: Option<String>,
    pub velocity: Option<Velocity>,
    /// Surface movement, knots
    pub ground_speed_kts: Option<f64>,
    pub ground_track_deg: Option<f64>,
    pub cpr: Option<CprFragment>,
    pub surveillance_status: Option<u8>,
    pub emergency: Option<EmergencyState>,
    pub airframe_size: Option<AirframeSize>,
}

impl ModeSMessage {
    fn new(df: u8, icao: Icao) -> Self {
        ModeSMessage {
            df,
            icao,
            ..Default::default()
        }
    }

    /// True for DF17/18 extended squitters.
    pub fn is_extended_squitter(&self) -> bool {
        self.df == 17 || self.df == 18
    }

    /// True when the address was read straight from the frame rather
    /// than recovered from the parity residual.
    pub fn has_explicit_icao(&self) -> bool {
        matches!(self.df, 11 | 17 | 18)
    }
}

/// A Mode S payload plus its receive time.
#[derive(Debug, Clone)]
pub struct ModeSFrame {
    raw: Vec<u8>,
    timestamp: f64,
    decoded: OnceLock<Result<ModeSMessage, DecodeError>>,
}

impl ModeSFrame {
    pub fn new(raw: Vec<u8>, timestamp: f64) -> Self {
        ModeSFrame {
            raw,
            timestamp,
            decoded: OnceLock::new(),
        }
    }

    /// Parse a bare hex payload (14 or 28 characters).
    pub fn from_hex(hex: &str, timestamp: f64) -> Result<Self, DecodeError> {
        let raw = hex_decode(hex).ok_or_else(|| DecodeError::InvalidHex(hex.to_string()))?;
        Ok(ModeSFrame::new(raw, timestamp))
    }

    /// Parse one line of AVR text: `*8D4840D6202CC371C32CE0576098;` or the
    /// MLAT flavour `@<12 hex tick digits><payload>;`.
    pub fn from_avr(line: &str, timestamp: f64) -> Result<Self, DecodeError> {
        let line = line.trim();
        let body = line.strip_suffix(';').unwrap_or(line);
        let payload = if let Some(rest) = body.strip_prefix('*') {
            rest
        } else if let Some(rest) = body.strip_prefix('@') {
            if rest.len() < 12 || !rest.is_char_boundary(12) {
                return Err(DecodeError::InvalidHex(line.to_string()));
            }
            &rest[12..]
        } else {
            return Err(DecodeError::InvalidHex(line.to_string()));
        };
        ModeSFrame::from_hex(payload, timestamp)
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Downlink Format straight from the first byte, without decoding.
    pub fn df(&self) -> Option<u8> {
        self.raw.first().map(|b| (b >> 3).min(24))
    }

    /// Decode on first call; later calls return the cached outcome.
    pub fn decode(&self) -> Result<&ModeSMessage, DecodeError> {
        self.decoded
            .get_or_init(|| decode_mode_s(&self.raw))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// ICAO address, if the frame decodes.
    pub fn icao(&self) -> Option<Icao> {
        self.decode().ok().map(|m| m.icao)
    }
}

impl PartialEq for ModeSFrame {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.timestamp == other.timestamp
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn decode_mode_s(raw: &[u8]) -> Result<ModeSMessage, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::TooShort(0));
    }
    // keep-alives and padding
    if raw.iter().all(|&b| b == 0) {
        return Err(DecodeError::NoOp);
    }

    let df = (raw[0] >> 3).min(24);
    let info = df_info(df).ok_or(DecodeError::UnknownDf(df))?;
    if raw.len() != info.bytes {
        return Err(DecodeError::BadLength {
            df,
            expected: info.bytes,
            actual: raw.len(),
        });
    }
    if matches!(df, 19 | 22 | 24) {
        return Err(DecodeError::NoOp);
    }

    let mut corrected = false;
    let mut fixed = None;
    let icao = match df {
        17 | 18 => {
            if crc::residual(raw) != 0 {
                fixed = Some(crc::try_fix(raw).ok_or(DecodeError::Crc)?);
                corrected = true;
            }
            let data = fixed.as_deref().unwrap_or(raw);
            [data[1], data[2], data[3]]
        }
        11 => {
            // low 7 bits may hold the interrogator code
            if crc::residual(raw) & 0xFF_FF80 != 0 {
                return Err(DecodeError::Crc);
            }
            [raw[1], raw[2], raw[3]]
        }
        _ => icao_from_u32(crc::residual(raw)),
    };
    let data = fixed.as_deref().unwrap_or(raw);

    let mut msg = ModeSMessage::new(df, icao);
    msg.corrected = corrected;

    let ac13 = ((data[2] as u32 & 0x1F) << 8) | data[3] as u32;
    match df {
        0 | 16 => {
            msg.on_ground = Some((data[0] >> 2) & 1 == 1);
            msg.altitude = decode_ac13_altitude(ac13);
        }
        4 | 20 => {
            apply_flight_status(&mut msg, data[0] & 0x07);
            msg.altitude = decode_ac13_altitude(ac13);
        }
        5 | 21 => {
            apply_flight_status(&mut msg, data[0] & 0x07);
            msg.squawk = Some(decode_squawk(ac13));
        }
        11 => {
            let ca = data[0] & 0x07;
            msg.capability = Some(ca);
            msg.on_ground = capability_on_ground(ca);
        }
        17 | 18 => {
            if df == 17 {
                let ca = data[0] & 0x07;
                msg.capability = Some(ca);
                msg.on_ground = capability_on_ground(ca);
            }
            decode_extended_squitter(&mut msg, data);
        }
        _ => {}
    }

    // Comm-B BDS 2,0 aircraft identification
    if matches!(df, 20 | 21) && data[4] == 0x20 {
        msg.callsign = decode_callsign(&data[5..11]);
    }

    Ok(msg)
}

fn apply_flight_status(msg: &mut ModeSMessage, fs: u8) {
    let flags = flight_status_flags(fs);
    msg.flight_status = Some(fs);
    msg.on_ground = flags.on_ground;
    msg.alert = Some(flags.alert);
    msg.spi = Some(flags.spi);
}

fn decode_extended_squitter(msg: &mut ModeSMessage, data: &[u8]) {
    let me = data[4..11]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);
    let tc = (me >> 51) as u8;
    let st = ((me >> 48) & 0x07) as u8;
    msg.type_code = Some(tc);
    msg.subtype = Some(st);

    match tc {
        1..=4 => {
            msg.category = aircraft_category(tc, st);
            msg.callsign = decode_callsign(&data[5..11]);
        }
        5..=8 => {
            msg.on_ground = Some(true);
            msg.ground_speed_kts = decode_surface_movement(((me >> 44) & 0x7F) as u8);
            msg.ground_track_deg = decode_ground_track(me);
            msg.cpr = Some(cpr_fragment(me, true));
        }
        9..=18 | 20..=22 => {
            let ss = ((me >> 49) & 0x03) as u8;
            msg.on_ground = Some(false);
            msg.surveillance_status = Some(ss);
            msg.alert = Some(ss == 1 || ss == 2);
            msg.spi = Some(ss == 3);
            let alt = ((me >> 36) & 0x0FFF) as u32;
            msg.altitude = if tc <= 18 {
                decode_ac12_altitude(alt)
            } else if alt != 0 {
                // GNSS height, metres
                Some(Altitude {
                    value: alt as i32,
                    units: AltitudeUnits::Metres,
                })
            } else {
                None
            };
            msg.cpr = Some(cpr_fragment(me, false));
        }
        19 => {
            msg.velocity = decode_velocity(me);
        }
        23 if st == 7 => {
            msg.squawk = Some(decode_squawk(((me >> 35) & 0x1FFF) as u32));
        }
        28 if st == 1 => {
            msg.emergency = Some(EmergencyState::from_code(((me >> 45) & 0x07) as u8));
            msg.squawk = Some(decode_squawk(((me >> 32) & 0x1FFF) as u32));
        }
        31 if st == 1 => {
            msg.airframe_size = airframe_size(((me >> 32) & 0x0F) as u8);
        }
        _ => {}
    }
}

fn cpr_fragment(me: u64, surface: bool) -> CprFragment {
    CprFragment {
        lat: ((me >> 17) & 0x1FFFF) as u32,
        lon: (me & 0x1FFFF) as u32,
        odd: (me >> 34) & 1 == 1,
        surface,
    }
}
