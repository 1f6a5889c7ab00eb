//! Field-level decoders for Mode S payloads.
//!
//! These operate on already-extracted bit fields: the 12/13-bit altitude
//! codes, the 13-bit identity code, the 48-bit callsign and the 56-bit ME
//! field of an extended squitter (held in the low bits of a `u64`).

use serde::Serialize;

use crate::types::{AirframeSize, AltitudeUnits, SpeedType, CALLSIGN_CHARSET};

/// A decoded altitude with its units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Altitude {
    pub value: i32,
    pub units: AltitudeUnits,
}

impl Altitude {
    fn feet(value: i32) -> Self {
        Altitude { value, units: AltitudeUnits::Feet }
    }
}

// ---------------------------------------------------------------------------
// Altitude
// ---------------------------------------------------------------------------

/// Decode the 12-bit altitude code of an airborne position squitter.
///
/// Same layout as the 13-bit AC field with the M bit removed.
pub fn decode_ac12_altitude(code: u32) -> Option<Altitude> {
    if code == 0 {
        return None;
    }
    if code & 0x10 != 0 {
        let n = ((code & 0x0FE0) >> 1) | (code & 0x000F);
        return Some(Altitude::feet(n as i32 * 25 - 1000));
    }
    let ac13 = ((code & 0x0FC0) << 1) | (code & 0x003F);
    gillham_altitude(ac13).map(Altitude::feet)
}

/// Decode the 13-bit AC field of DF0/4/16/20.
///
/// - M=1: metric altitude in metres
/// - M=0, Q=1: 25 ft increments
/// - M=0, Q=0: 100 ft Gillham gray code
pub fn decode_ac13_altitude(code: u32) -> Option<Altitude> {
    if code == 0 {
        return None;
    }
    let m_bit = code & 0x0040 != 0;
    let q_bit = code & 0x0010 != 0;

    if m_bit {
        let metres = ((code & 0x1F80) >> 1) | (code & 0x003F);
        return Some(Altitude {
            value: metres as i32,
            units: AltitudeUnits::Metres,
        });
    }
    if q_bit {
        let n = ((code & 0x1F80) >> 2) | ((code & 0x0020) >> 1) | (code & 0x000F);
        return Some(Altitude::feet(n as i32 * 25 - 1000));
    }
    gillham_altitude(code).map(Altitude::feet)
}

fn gillham_altitude(ac13: u32) -> Option<i32> {
    let hundreds = mode_a_to_mode_c(id13_to_gillham(ac13))?;
    if hundreds < -12 {
        return None;
    }
    Some(hundreds * 100)
}

/// Re-order a 13-bit identity/altitude field into the 0xABCD Gillham
/// layout (one octal digit per nibble).
///
/// Field bits, MSB first: C1 A1 C2 A2 C4 A4 X B1 D1 B2 D2 B4 D4
pub fn id13_to_gillham(id13: u32) -> u32 {
    const MAP: [(u32, u32); 12] = [
        (0x1000, 0x0010), // C1
        (0x0800, 0x1000), // A1
        (0x0400, 0x0020), // C2
        (0x0200, 0x2000), // A2
        (0x0100, 0x0040), // C4
        (0x0080, 0x4000), // A4
        (0x0020, 0x0100), // B1
        (0x0010, 0x0001), // D1 (or Q)
        (0x0008, 0x0200), // B2
        (0x0004, 0x0002), // D2
        (0x0002, 0x0400), // B4
        (0x0001, 0x0004), // D4
    ];
    MAP.iter()
        .filter(|(field, _)| id13 & field != 0)
        .fold(0, |acc, (_, gillham)| acc | gillham)
}

// Gillham code to hundreds of feet.
fn mode_a_to_mode_c(mode_a: u32) -> Option<i32> {
    // D1 set or C bits all zero are illegal
    if mode_a & 0xFFFF_8889 != 0 || mode_a & 0x0000_00F0 == 0 {
        return None;
    }

    let mut one_hundreds: i32 = 0;
    if mode_a & 0x0010 != 0 {
        one_hundreds ^= 0x007;
    }
    if mode_a & 0x0020 != 0 {
        one_hundreds ^= 0x003;
    }
    if mode_a & 0x0040 != 0 {
        one_hundreds ^= 0x001;
    }
    if one_hundreds & 5 == 5 {
        one_hundreds ^= 2;
    }
    if one_hundreds > 5 {
        return None;
    }

    let mut five_hundreds: i32 = 0;
    for (bit, mask) in [
        (0x0002, 0x0FF), // D2
        (0x0004, 0x07F), // D4
        (0x1000, 0x03F), // A1
        (0x2000, 0x01F), // A2
        (0x4000, 0x00F), // A4
        (0x0100, 0x007), // B1
        (0x0200, 0x003), // B2
        (0x0400, 0x001), // B4
    ] {
        if mode_a & bit != 0 {
            five_hundreds ^= mask;
        }
    }

    if five_hundreds & 1 != 0 {
        one_hundreds = 6 - one_hundreds;
    }
    Some(five_hundreds * 5 + one_hundreds - 13)
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Decode a 13-bit identity code into the 4-digit octal squawk.
pub fn decode_squawk(id13: u32) -> String {
    format!("{:04X}", id13_to_gillham(id13))
}

/// Decode eight 6-bit characters packed into 6 bytes.
///
/// Returns `None` when any character falls outside the ICAO alphabet or
/// the callsign is blank.
pub fn decode_callsign(packed: &[u8]) -> Option<String> {
    if packed.len() < 6 {
        return None;
    }
    let bits = packed[..6]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);

    let mut callsign = String::with_capacity(8);
    for i in 0..8 {
        let idx = ((bits >> (42 - i * 6)) & 0x3F) as usize;
        let c = CALLSIGN_CHARSET[idx];
        if c == b'#' {
            return None;
        }
        callsign.push(c as char);
    }
    let trimmed = callsign.trim_end();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Wake vortex / emitter category, e.g. "A3" for a large aircraft.
pub fn aircraft_category(type_code: u8, category: u8) -> Option<String> {
    if category == 0 {
        return None;
    }
    let set = match type_code {
        4 => 'A',
        3 => 'B',
        2 => 'C',
        1 => 'D',
        _ => return None,
    };
    Some(format!("{set}{category}"))
}

// ---------------------------------------------------------------------------
// Flight status
// ---------------------------------------------------------------------------

/// Flags carried by the 3-bit flight status of DF4/5/20/21.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlightStatusFlags {
    pub on_ground: Option<bool>,
    pub alert: bool,
    pub spi: bool,
}

pub fn flight_status_flags(fs: u8) -> FlightStatusFlags {
    let on_ground = match fs {
        0 | 2 => Some(false),
        1 | 3 => Some(true),
        _ => None,
    };
    FlightStatusFlags {
        on_ground,
        alert: matches!(fs, 2..=4),
        spi: matches!(fs, 4 | 5),
    }
}

pub fn flight_status_text(fs: u8) -> &'static str {
    match fs {
        0 => "Normal, Airborne",
        1 => "Normal, On the ground",
        2 => "ALERT, Airborne",
        3 => "ALERT, On the ground",
        4 => "ALERT, Special Position Identification",
        5 => "Normal, Special Position Identification",
        6 => "Reserved",
        _ => "Not assigned",
    }
}

/// Ground/airborne state from the capability field of DF11/17.
pub fn capability_on_ground(ca: u8) -> Option<bool> {
    match ca {
        4 => Some(true),
        5 => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Velocity
// ---------------------------------------------------------------------------

/// TC19 airborne velocity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Velocity {
    pub speed_kts: Option<f64>,
    pub heading_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    pub speed_type: SpeedType,
}

/// Decode a TC19 ME field. Sub-types 2 and 4 are supersonic (4 kt units).
pub fn decode_velocity(me: u64) -> Option<Velocity> {
    let subtype = ((me >> 48) & 0x07) as u8;
    let scale = if subtype == 2 || subtype == 4 { 4.0 } else { 1.0 };

    let vr_sign = (me >> 19) & 1;
    let vr_raw = ((me >> 10) & 0x1FF) as i32;
    let vertical_rate_fpm = if vr_raw > 0 {
        let rate = (vr_raw - 1) * 64;
        Some(if vr_sign == 1 { -rate } else { rate })
    } else {
        None
    };

    match subtype {
        1 | 2 => {
            let ew_west = (me >> 42) & 1 == 1;
            let ew_raw = ((me >> 32) & 0x3FF) as i32;
            let ns_south = (me >> 31) & 1 == 1;
            let ns_raw = ((me >> 21) & 0x3FF) as i32;

            let (speed_kts, heading_deg) = if ew_raw > 0 && ns_raw > 0 {
                let vx = (ew_raw - 1) as f64 * scale * if ew_west { -1.0 } else { 1.0 };
                let vy = (ns_raw - 1) as f64 * scale * if ns_south { -1.0 } else { 1.0 };
                let heading = vx.atan2(vy).to_degrees().rem_euclid(360.0);
                (Some(vx.hypot(vy)), Some(heading))
            } else {
                (None, None)
            };
            Some(Velocity {
                speed_kts,
                heading_deg,
                vertical_rate_fpm,
                speed_type: SpeedType::Ground,
            })
        }
        3 | 4 => {
            let heading_deg = ((me >> 42) & 1 == 1)
                .then(|| ((me >> 32) & 0x3FF) as f64 * 360.0 / 1024.0);
            let speed_raw = ((me >> 21) & 0x3FF) as i32;
            let speed_kts = (speed_raw > 0).then(|| (speed_raw - 1) as f64 * scale);
            let speed_type = if (me >> 31) & 1 == 1 {
                SpeedType::TAS
            } else {
                SpeedType::IAS
            };
            Some(Velocity {
                speed_kts,
                heading_deg,
                vertical_rate_fpm,
                speed_type,
            })
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Surface movement
// ---------------------------------------------------------------------------

/// Ground speed in knots from the 7-bit surface movement field.
pub fn decode_surface_movement(movement: u8) -> Option<f64> {
    let m = movement as f64;
    match movement {
        1 => Some(0.0),
        2..=8 => Some(0.125 * (m - 1.0)),
        9..=12 => Some(1.0 + 0.25 * (m - 9.0)),
        13..=38 => Some(2.0 + 0.5 * (m - 13.0)),
        39..=93 => Some(15.0 + (m - 39.0)),
        94..=108 => Some(70.0 + 2.0 * (m - 94.0)),
        109..=123 => Some(100.0 + 5.0 * (m - 109.0)),
        124 => Some(175.0),
        _ => None,
    }
}

/// Ground track from a surface position ME field, when its status bit is set.
pub fn decode_ground_track(me: u64) -> Option<f64> {
    if (me >> 43) & 1 == 0 {
        return None;
    }
    Some(((me >> 36) & 0x7F) as f64 * 360.0 / 128.0)
}

/// Length/width code of a surface operational status message.
pub fn airframe_size(code: u8) -> Option<AirframeSize> {
    let (length_m, width_m) = match code {
        1 => (15.0, 23.0),
        2 => (25.0, 28.5),
        3 => (25.0, 34.0),
        4 => (35.0, 33.0),
        5 => (35.0, 38.0),
        6 => (45.0, 39.5),
        7 => (45.0, 45.0),
        8 => (55.0, 45.0),
        9 => (55.0, 52.0),
        10 => (65.0, 59.5),
        11 => (65.0, 67.0),
        12 => (75.0, 72.5),
        13 => (75.0, 80.0),
        14 => (85.0, 80.0),
        15 => (85.0, 90.0),
        _ => return None,
    };
    Some(AirframeSize { length_m, width_m })
}
