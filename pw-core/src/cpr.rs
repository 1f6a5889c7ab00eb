//! Compact Position Reporting: CPR decode for ADS-B positions.
//!
//! Two decode modes:
//! - Global: requires an even+odd pair within 10 seconds. Airborne pairs
//!   need no reference; surface pairs need one to pick the quadrant.
//! - Local: a single fragment plus a reference position within ~180nm
//!   (airborne) or ~45nm (surface).
//!
//! Key constants:
//! - NZ = 15 (latitude zones per hemisphere for even frames)
//! - Nb = 17 (bits per coordinate)
//! - Dlat_even = 360 / 60 = 6.0 degrees (90 / 60 on the surface)
//! - Dlat_odd = 360 / 59 ≈ 6.1017 degrees (90 / 59 on the surface)
//!
//! A pair is always resolved against the parity of its *newest* fragment.

use crate::types::CprError;

/// Bits per CPR coordinate.
const NB: u32 = 17;

/// Maximum CPR value (2^17 = 131072).
const CPR_MAX: f64 = (1u32 << NB) as f64;

/// Maximum time between even/odd frames for global decode (seconds).
pub const MAX_PAIR_AGE: f64 = 10.0;

// Latitude below which NL takes the paired value. Precomputed from
//   NL(lat) = floor(2π / acos(1 - (1 - cos(π / 2NZ)) / cos²(lat)))
const NL_TABLE: [(f64, u32); 58] = [
    (10.47047130, 59),
    (14.82817437, 58),
    (18.18626357, 57),
    (21.02939493, 56),
    (23.54504487, 55),
    (25.82924707, 54),
    (27.93898710, 53),
    (29.91135686, 52),
    (31.77209708, 51),
    (33.53993436, 50),
    (35.22899598, 49),
    (36.85025108, 48),
    (38.41241892, 47),
    (39.92256684, 46),
    (41.38651832, 45),
    (42.80914012, 44),
    (44.19454951, 43),
    (45.54626723, 42),
    (46.86733252, 41),
    (48.16039128, 40),
    (49.42776439, 39),
    (50.67150166, 38),
    (51.89342469, 37),
    (53.09516153, 36),
    (54.27817472, 35),
    (55.44378444, 34),
    (56.59318756, 33),
    (57.72747354, 32),
    (58.84763776, 31),
    (59.95459277, 30),
    (61.04917774, 29),
    (62.13216659, 28),
    (63.20427479, 27),
    (64.26616523, 26),
    (65.31845310, 25),
    (66.36171008, 24),
    (67.39646774, 23),
    (68.42322022, 22),
    (69.44242631, 21),
    (70.45451075, 20),
    (71.45986473, 19),
    (72.45884545, 18),
    (73.45177442, 17),
    (74.43893416, 16),
    (75.42056257, 15),
    (76.39684391, 14),
    (77.36789461, 13),
    (78.33374083, 12),
    (79.29428225, 11),
    (80.24923213, 10),
    (81.19801349, 9),
    (82.13956981, 8),
    (83.07199445, 7),
    (83.99173563, 6),
    (84.89166191, 5),
    (85.75541621, 4),
    (86.53536998, 3),
    (87.0, 2),
];

/// Number of longitude zones at a given latitude (NL function).
///
/// Ranges from 59 at the equator to 1 near the poles.
pub fn nl(lat: f64) -> u32 {
    let lat = lat.abs();
    NL_TABLE
        .iter()
        .find(|(limit, _)| lat < *limit)
        .map(|&(_, n)| n)
        .unwrap_or(1)
}

/// Modulo that always returns a non-negative result.
fn modulo(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

fn normalize_lon(lon: f64) -> f64 {
    lon - ((lon + 180.0) / 360.0).floor() * 360.0
}

fn check_range(lat: f64, lon: f64) -> Result<(f64, f64), CprError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(CprError::OutOfRange { lat, lon });
    }
    Ok((lat, lon))
}

// Shared tail of the global decoders: pick the newest parity's latitude
// and resolve the longitude zone. `span` is 360 airborne, 90 on the surface.
fn resolve_pair(
    rlat_even: f64,
    rlat_odd: f64,
    lon_even: f64,
    lon_odd: f64,
    odd_newest: bool,
    span: f64,
) -> Result<(f64, f64), CprError> {
    let (nl_even, nl_odd) = (nl(rlat_even), nl(rlat_odd));
    if nl_even != nl_odd {
        return Err(CprError::ZoneMismatch {
            even: nl_even,
            odd: nl_odd,
        });
    }
    let nl_val = nl_even as f64;
    let m = (lon_even * (nl_val - 1.0) - lon_odd * nl_val + 0.5).floor();
    if odd_newest {
        let n_lon = (nl_val - 1.0).max(1.0);
        let lon = span / n_lon * (modulo(m, n_lon) + lon_odd);
        Ok((rlat_odd, lon))
    } else {
        let n_lon = nl_val.max(1.0);
        let lon = span / n_lon * (modulo(m, n_lon) + lon_even);
        Ok((rlat_even, lon))
    }
}

/// Global CPR decode of an airborne even/odd pair.
///
/// `odd_newest` selects which fragment the result is resolved against.
/// Pairs that straddle a longitude-zone boundary fail with
/// [`CprError::ZoneMismatch`].
pub fn global_decode(
    lat_even: u32,
    lon_even: u32,
    lat_odd: u32,
    lon_odd: u32,
    odd_newest: bool,
) -> Result<(f64, f64), CprError> {
    let dlat_even = 360.0 / 60.0;
    let dlat_odd = 360.0 / 59.0;

    let lat_even_cpr = lat_even as f64 / CPR_MAX;
    let lon_even_cpr = lon_even as f64 / CPR_MAX;
    let lat_odd_cpr = lat_odd as f64 / CPR_MAX;
    let lon_odd_cpr = lon_odd as f64 / CPR_MAX;

    // Latitude zone index
    let j = (59.0 * lat_even_cpr - 60.0 * lat_odd_cpr + 0.5).floor();

    let mut rlat_even = dlat_even * (modulo(j, 60.0) + lat_even_cpr);
    let mut rlat_odd = dlat_odd * (modulo(j, 59.0) + lat_odd_cpr);
    if rlat_even >= 270.0 {
        rlat_even -= 360.0;
    }
    if rlat_odd >= 270.0 {
        rlat_odd -= 360.0;
    }
    if !(-90.0..=90.0).contains(&rlat_even) || !(-90.0..=90.0).contains(&rlat_odd) {
        let lat = if odd_newest { rlat_odd } else { rlat_even };
        return Err(CprError::OutOfRange { lat, lon: 0.0 });
    }

    let (lat, lon) = resolve_pair(
        rlat_even,
        rlat_odd,
        lon_even_cpr,
        lon_odd_cpr,
        odd_newest,
        360.0,
    )?;
    check_range(lat, normalize_lon(lon))
}

/// Global CPR decode of a surface even/odd pair.
///
/// Surface CPR covers a 90° quadrant, so the answer is ambiguous without
/// a reference: the quadrant closest to `(ref_lat, ref_lon)` is chosen.
pub fn global_surface_decode(
    lat_even: u32,
    lon_even: u32,
    lat_odd: u32,
    lon_odd: u32,
    odd_newest: bool,
    ref_lat: f64,
    ref_lon: f64,
) -> Result<(f64, f64), CprError> {
    let dlat_even = 90.0 / 60.0;
    let dlat_odd = 90.0 / 59.0;

    let lat_even_cpr = lat_even as f64 / CPR_MAX;
    let lon_even_cpr = lon_even as f64 / CPR_MAX;
    let lat_odd_cpr = lat_odd as f64 / CPR_MAX;
    let lon_odd_cpr = lon_odd as f64 / CPR_MAX;

    let j = (59.0 * lat_even_cpr - 60.0 * lat_odd_cpr + 0.5).floor();

    let nearest_quadrant = |rlat: f64| {
        if rlat == 0.0 {
            if ref_lat < -45.0 {
                -90.0
            } else if ref_lat > 45.0 {
                90.0
            } else {
                0.0
            }
        } else if rlat - ref_lat > 45.0 {
            rlat - 90.0
        } else {
            rlat
        }
    };
    let rlat_even = nearest_quadrant(dlat_even * (modulo(j, 60.0) + lat_even_cpr));
    let rlat_odd = nearest_quadrant(dlat_odd * (modulo(j, 59.0) + lat_odd_cpr));

    let (lat, mut lon) = resolve_pair(
        rlat_even,
        rlat_odd,
        lon_even_cpr,
        lon_odd_cpr,
        odd_newest,
        90.0,
    )?;
    lon += ((ref_lon - lon + 45.0) / 90.0).floor() * 90.0;
    check_range(lat, normalize_lon(lon))
}

/// Local CPR decode of a single fragment using a reference position.
///
/// Valid when the aircraft is within half a zone of the reference.
pub fn local_decode(
    cpr_lat: u32,
    cpr_lon: u32,
    odd: bool,
    surface: bool,
    ref_lat: f64,
    ref_lon: f64,
) -> Result<(f64, f64), CprError> {
    let span = if surface { 90.0 } else { 360.0 };
    let i = if odd { 1.0 } else { 0.0 };
    let dlat = span / (60.0 - i);

    let cpr_lat_norm = cpr_lat as f64 / CPR_MAX;
    let cpr_lon_norm = cpr_lon as f64 / CPR_MAX;

    // Latitude zone index from the reference
    let j = (ref_lat / dlat).floor() + (modulo(ref_lat, dlat) / dlat - cpr_lat_norm + 0.5).floor();
    let lat = dlat * (j + cpr_lat_norm);
    if !(-90.0..=90.0).contains(&lat) {
        return Err(CprError::OutOfRange { lat, lon: ref_lon });
    }

    let n_lon = (nl(lat) as f64 - i).max(1.0);
    let dlon = span / n_lon;

    let m = (ref_lon / dlon).floor() + (modulo(ref_lon, dlon) / dlon - cpr_lon_norm + 0.5).floor();
    let lon = dlon * (m + cpr_lon_norm);

    check_range(lat, normalize_lon(lon))
}

// ---------------------------------------------------------------------------
// Pairing state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
struct Fragment {
    lat: u32,
    lon: u32,
    timestamp: f64,
}

/// A resolved position and the capture time of the fragment it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CprPosition {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: f64,
}

/// The most recent even and odd fragments of one aircraft.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CprLocation {
    even: Option<Fragment>,
    odd: Option<Fragment>,
    reference: Option<(f64, f64)>,
}

impl CprLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_even(&mut self, lat: u32, lon: u32, timestamp: f64) {
        self.even = Some(Fragment { lat, lon, timestamp });
    }

    pub fn set_odd(&mut self, lat: u32, lon: u32, timestamp: f64) {
        self.odd = Some(Fragment { lat, lon, timestamp });
    }

    /// Reference used for surface and local decodes.
    pub fn set_reference(&mut self, reference: Option<(f64, f64)>) {
        self.reference = reference;
    }

    /// Forget both fragments. The reference is kept.
    pub fn reset(&mut self) {
        self.even = None;
        self.odd = None;
    }

    pub fn has_even(&self) -> bool {
        self.even.is_some()
    }

    pub fn has_odd(&self) -> bool {
        self.odd.is_some()
    }

    /// Resolve a position from the stored fragments.
    ///
    /// A fresh pair decodes globally against its newest fragment. A stale
    /// pair or a lone fragment decodes locally when a reference is set.
    /// Surface state is consumed: a successful decode or a stale pair
    /// clears both fragments.
    pub fn decode(&mut self, on_ground: bool) -> Result<CprPosition, CprError> {
        let result = self.resolve(on_ground);
        if on_ground && matches!(result, Ok(_) | Err(CprError::StalePair(_))) {
            self.reset();
        }
        result
    }

    fn resolve(&self, on_ground: bool) -> Result<CprPosition, CprError> {
        match (self.even, self.odd) {
            (Some(even), Some(odd)) => {
                let odd_newest = odd.timestamp > even.timestamp;
                let newest = if odd_newest { odd } else { even };
                let age = (even.timestamp - odd.timestamp).abs();
                if age > MAX_PAIR_AGE {
                    return match self.reference {
                        Some(_) if !on_ground => self.local(newest, odd_newest, on_ground),
                        _ => Err(CprError::StalePair(age)),
                    };
                }
                let (lat, lon) = if on_ground {
                    let (ref_lat, ref_lon) = self.reference.ok_or(CprError::NoReference)?;
                    global_surface_decode(
                        even.lat, even.lon, odd.lat, odd.lon, odd_newest, ref_lat, ref_lon,
                    )?
                } else {
                    global_decode(even.lat, even.lon, odd.lat, odd.lon, odd_newest)?
                };
                Ok(CprPosition {
                    lat,
                    lon,
                    timestamp: newest.timestamp,
                })
            }
            (Some(even), None) => match self.reference {
                Some(_) => self.local(even, false, on_ground),
                None => Err(CprError::MissingFragment("odd")),
            },
            (None, Some(odd)) => match self.reference {
                Some(_) => self.local(odd, true, on_ground),
                None => Err(CprError::MissingFragment("even")),
            },
            (None, None) => Err(CprError::MissingFragment("even")),
        }
    }

    fn local(&self, fragment: Fragment, odd: bool, surface: bool) -> Result<CprPosition, CprError> {
        let (ref_lat, ref_lon) = self.reference.ok_or(CprError::NoReference)?;
        let (lat, lon) = local_decode(fragment.lat, fragment.lon, odd, surface, ref_lat, ref_lon)?;
        Ok(CprPosition {
            lat,
            lon,
            timestamp: fragment.timestamp,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(got: (f64, f64), want: (f64, f64)) {
        assert!(
            (got.0 - want.0).abs() < 1e-9 && (got.1 - want.1).abs() < 1e-9,
            "expected {want:?}, got {got:?}"
        );
    }

    // Closed form NL, as used before the table.
    fn nl_formula(lat: f64) -> u32 {
        if lat.abs() >= 87.0 {
            return 1;
        }
        let nz = 15.0;
        let a = 1.0 - (std::f64::consts::PI / (2.0 * nz)).cos();
        let b = (std::f64::consts::PI / 180.0 * lat.abs()).cos().powi(2);
        ((2.0 * std::f64::consts::PI / (1.0 - a / b).acos()).floor() as u32).max(1)
    }

    #[test]
    fn test_nl_equator() {
        assert_eq!(nl(0.0), 59);
    }

    #[test]
    fn test_nl_poles() {
        assert_eq!(nl(87.0), 1);
        assert_eq!(nl(-87.0), 1);
        assert_eq!(nl(90.0), 1);
        assert_eq!(nl(-86.9), 2);
    }

    #[test]
    fn test_nl_mid_latitude() {
        assert_eq!(nl(52.0), 36);
        assert_eq!(nl(-52.0), 36);
    }

    #[test]
    fn test_nl_table_matches_formula() {
        let mut lat = -89.95;
        while lat < 90.0 {
            assert_eq!(nl(lat), nl_formula(lat), "NL differs at {lat}");
            lat += 0.0137;
        }
    }

    #[test]
    fn test_global_decode_perth() {
        assert_close(
            global_decode(83068, 15070, 94790, 103912, false).unwrap(),
            (-32.19744873046875, 116.02781982421875),
        );
        assert_close(
            global_decode(83068, 15070, 94790, 103912, true).unwrap(),
            (-32.19748286877649, 116.02862922512756),
        );
    }

    #[test]
    fn test_global_decode_known_pairs() {
        assert_close(
            global_decode(86196, 13323, 97846, 102181, false).unwrap(),
            (-32.05426025390625, 115.93185424804688),
        );
        assert_close(
            global_decode(86196, 13323, 97846, 102181, true).unwrap(),
            (-32.05521923000532, 115.93160201092157),
        );
        assert_close(
            global_decode(80536, 9432, 61720, 9192, false).unwrap(),
            (51.6866455078125, 0.7001557221283784),
        );
        assert_close(
            global_decode(80536, 9432, 61720, 9192, true).unwrap(),
            (51.686763440148304, 0.7012939453125),
        );
        // "The 1090MHz Riddle"
        assert_close(
            global_decode(93000, 51372, 74158, 50194, false).unwrap(),
            (52.2572021484375, 3.91937255859375),
        );
        assert_close(
            global_decode(93000, 51372, 74158, 50194, true).unwrap(),
            (52.26578017412606, 3.938912527901786),
        );
    }

    #[test]
    fn test_global_decode_zone_mismatch() {
        assert_eq!(
            global_decode(0, 1000, 22873, 1000, false).unwrap_err(),
            CprError::ZoneMismatch { even: 29, odd: 30 }
        );
    }

    #[test]
    fn test_global_surface_decode() {
        assert_close(
            global_surface_decode(1246, 57074, 64585, 67947, true, -43.5, 172.5).unwrap(),
            (-43.48564406572763, 172.53941672188895),
        );
        assert_close(
            global_surface_decode(1246, 57074, 64585, 67947, false, -43.5, 172.5).unwrap(),
            (-43.485740661621094, 172.53929315611373),
        );
    }

    #[test]
    fn test_local_decode() {
        assert_close(
            local_decode(93000, 51372, false, false, 52.258, 3.918).unwrap(),
            (52.2572021484375, 3.91937255859375),
        );
        assert_close(
            local_decode(74158, 50194, true, false, 52.258, 3.918).unwrap(),
            (52.26578017412606, 3.938912527901786),
        );
        assert_close(
            local_decode(83068, 15070, false, false, -32.0, 116.0).unwrap(),
            (-32.19744873046875, 116.02781982421875),
        );
    }

    #[test]
    fn test_local_decode_surface() {
        let (lat, lon) = local_decode(64585, 67947, true, true, -43.5, 172.5).unwrap();
        assert!((lat - -43.48564406572762).abs() < 1e-9);
        assert!((lon - 172.53941672188895).abs() < 1e-9);
    }

    #[test]
    fn test_location_pair_either_order() {
        let mut loc = CprLocation::new();
        loc.set_odd(94790, 103912, 1.0);
        loc.set_even(83068, 15070, 2.0);
        let pos = loc.decode(false).unwrap();
        assert_close((pos.lat, pos.lon), (-32.19744873046875, 116.02781982421875));
        assert_eq!(pos.timestamp, 2.0);

        let mut loc = CprLocation::new();
        loc.set_even(83068, 15070, 1.0);
        loc.set_odd(94790, 103912, 2.0);
        let pos = loc.decode(false).unwrap();
        assert_close((pos.lat, pos.lon), (-32.19748286877649, 116.02862922512756));
        // airborne fragments survive a decode
        assert!(loc.has_even() && loc.has_odd());
    }

    #[test]
    fn test_location_missing_fragment() {
        let mut loc = CprLocation::new();
        assert!(matches!(loc.decode(false), Err(CprError::MissingFragment(_))));
        loc.set_even(93000, 51372, 1.0);
        assert_eq!(loc.decode(false).unwrap_err(), CprError::MissingFragment("odd"));

        loc.set_reference(Some((52.258, 3.918)));
        let pos = loc.decode(false).unwrap();
        assert_close((pos.lat, pos.lon), (52.2572021484375, 3.91937255859375));
    }

    #[test]
    fn test_location_stale_pair() {
        let mut loc = CprLocation::new();
        loc.set_even(93000, 51372, 0.0);
        loc.set_odd(74158, 50194, 11.0);
        assert!(matches!(loc.decode(false), Err(CprError::StalePair(_))));

        // with a reference the newest fragment is decoded on its own
        loc.set_reference(Some((52.258, 3.918)));
        let pos = loc.decode(false).unwrap();
        assert_close((pos.lat, pos.lon), (52.26578017412606, 3.938912527901786));
        assert_eq!(pos.timestamp, 11.0);
    }

    #[test]
    fn test_location_surface_needs_reference() {
        let mut loc = CprLocation::new();
        loc.set_even(1246, 57074, 0.0);
        loc.set_odd(64585, 67947, 1.0);
        assert_eq!(loc.decode(true).unwrap_err(), CprError::NoReference);
        assert!(loc.has_even() && loc.has_odd());

        loc.set_reference(Some((-43.5, 172.5)));
        let pos = loc.decode(true).unwrap();
        assert_close((pos.lat, pos.lon), (-43.48564406572763, 172.53941672188895));
        // consumed by the decode
        assert!(!loc.has_even() && !loc.has_odd());
    }

    #[test]
    fn test_location_surface_stale_pair_is_cleared() {
        let mut loc = CprLocation::new();
        loc.set_reference(Some((-43.5, 172.5)));
        loc.set_even(1246, 57074, 0.0);
        loc.set_odd(64585, 67947, 30.0);
        assert!(matches!(loc.decode(true), Err(CprError::StalePair(_))));
        assert!(!loc.has_even() && !loc.has_odd());
    }

    #[test]
    fn test_modulo_negative() {
        assert!((modulo(-1.0, 60.0) - 59.0).abs() < 1e-10);
        assert!((modulo(7.0, 3.0) - 1.0).abs() < 1e-10);
    }
}
