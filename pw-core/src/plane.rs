//! Per-aircraft state machine.
//!
//! A [`Plane`] folds the frames addressed to one ICAO address into a current
//! [`PlaneLocation`], a bounded location history and identity fields. Every
//! setter reports whether the value changed; the OR of those results decides
//! whether the caller should announce the update.
//!
//! Pure logic: no I/O. Positions pass through the plausibility guard in
//! [`crate::calc`] before they are accepted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::calc::{self, Fix, Plausibility};
use crate::cpr::CprLocation;
use crate::decode::{flight_status_text, Altitude};
use crate::frame::{Decoded, Frame};
use crate::frame_ring::{FrameRing, RecentFrame, DEFAULT_RECENT_FRAMES};
use crate::mode_s::ModeSMessage;
use crate::registration::registration;
use crate::sbs1::Sbs1Message;
use crate::types::{icao_to_string, AirframeSize, AltitudeUnits, EmergencyState, Icao};

/// Accepted positions kept per plane.
pub const MAX_LOCATION_HISTORY: usize = 1000;

/// A previous position may seed CPR decoding for this long.
pub const IMPLICIT_REFERENCE_SECS: f64 = 60.0;

// ---------------------------------------------------------------------------
// Field tracking
// ---------------------------------------------------------------------------

/// A value plus the time it was last set.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    value: Option<T>,
    updated: f64,
}

impl<T> Default for Tracked<T> {
    fn default() -> Self {
        Tracked {
            value: None,
            updated: 0.0,
        }
    }
}

impl<T: PartialEq> Tracked<T> {
    /// Store `value`, returning true when it differs from the previous one.
    pub fn set(&mut self, value: T, timestamp: f64) -> bool {
        let changed = self.value.as_ref() != Some(&value);
        self.value = Some(value);
        self.updated = timestamp;
        changed
    }
}

impl<T> Tracked<T> {
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    /// When the value was last written, if ever.
    pub fn updated(&self) -> Option<f64> {
        self.value.as_ref().map(|_| self.updated)
    }
}

impl<T: Copy> Tracked<T> {
    pub fn value(&self) -> Option<T> {
        self.value
    }
}

/// Maps a position to a grid tile name.
pub trait TileResolver: Send + Sync {
    fn lookup(&self, lat: f64, lon: f64) -> Option<String>;
}

impl<F> TileResolver for F
where
    F: Fn(f64, f64) -> Option<String> + Send + Sync,
{
    fn lookup(&self, lat: f64, lon: f64) -> Option<String> {
        self(lat, lon)
    }
}

// ---------------------------------------------------------------------------
// Location snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaneLocation {
    /// (latitude, longitude)
    pub position: Tracked<(f64, f64)>,
    pub altitude: Tracked<Altitude>,
    pub heading: Tracked<f64>,
    /// knots
    pub velocity: Tracked<f64>,
    /// feet per minute
    pub vertical_rate: Tracked<i32>,
    pub on_ground: Tracked<bool>,
    pub grid_tile: Option<String>,
    pub distance_travelled: f64,
    pub duration_travelled: f64,
    /// Set once a position was discarded as implausible.
    pub track_finished: bool,
}

impl PlaneLocation {
    pub fn lat(&self) -> Option<f64> {
        self.position.value().map(|(lat, _)| lat)
    }

    pub fn lon(&self) -> Option<f64> {
        self.position.value().map(|(_, lon)| lon)
    }
}

/// Why a candidate position was not stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionRejected {
    OutOfRange { lat: f64, lon: f64 },
    Implausible(Plausibility),
}

// ---------------------------------------------------------------------------
// Plane
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PlaneState {
    last_seen: f64,
    msg_count: u64,
    location: PlaneLocation,
    history: VecDeque<PlaneLocation>,
    cpr: CprLocation,
    recent: FrameRing<RecentFrame>,

    squawk: Tracked<String>,
    callsign: Option<String>,
    category: Option<String>,
    airframe_size: Option<AirframeSize>,
    flight_status: Tracked<u8>,
    alert: Tracked<bool>,
    spi: Tracked<bool>,
    emergency: Tracked<EmergencyState>,
    surveillance_status: Tracked<u8>,
    signal_level: Option<f64>,
}

/// One tracked aircraft. Shared between decode workers; all mutation goes
/// through the internal lock.
pub struct Plane {
    icao: Icao,
    registration: Option<String>,
    tracked_since: f64,
    tiles: Option<Arc<dyn TileResolver>>,
    state: Mutex<PlaneState>,
}

impl std::fmt::Debug for Plane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plane")
            .field("icao", &icao_to_string(&self.icao))
            .field("registration", &self.registration)
            .field("tracked_since", &self.tracked_since)
            .finish_non_exhaustive()
    }
}

impl Plane {
    pub fn new(icao: Icao, first_seen: f64) -> Self {
        Plane {
            icao,
            registration: registration(&icao),
            tracked_since: first_seen,
            tiles: None,
            state: Mutex::new(PlaneState {
                last_seen: first_seen,
                msg_count: 0,
                location: PlaneLocation::default(),
                history: VecDeque::new(),
                cpr: CprLocation::new(),
                recent: FrameRing::new(DEFAULT_RECENT_FRAMES),
                squawk: Tracked::default(),
                callsign: None,
                category: None,
                airframe_size: None,
                flight_status: Tracked::default(),
                alert: Tracked::default(),
                spi: Tracked::default(),
                emergency: Tracked::default(),
                surveillance_status: Tracked::default(),
                signal_level: None,
            }),
        }
    }

    pub fn with_tile_resolver(mut self, tiles: Arc<dyn TileResolver>) -> Self {
        self.tiles = Some(tiles);
        self
    }

    /// Keep `n` raw frames for diagnostics instead of the default.
    pub fn with_recent_frames(self, n: usize) -> Self {
        self.lock().recent = FrameRing::new(n);
        self
    }

    fn lock(&self) -> MutexGuard<'_, PlaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one frame into the plane's state.
    ///
    /// `reference` is the receiver position, used to seed CPR decoding and
    /// the grid tile. Returns true when anything observable changed.
    pub fn handle_frame(&self, frame: &Frame, reference: Option<(f64, f64)>) -> bool {
        let decoded = match frame.decode() {
            Ok(d) => d,
            Err(e) => {
                trace!(icao = %self.icao_str(), error = %e, "skipping undecodable frame");
                return false;
            }
        };
        let icao = match decoded {
            Decoded::ModeS(m) => m.icao,
            Decoded::Sbs1(m) => m.icao,
        };
        if icao != self.icao {
            debug!(plane = %self.icao_str(), frame = %icao_to_string(&icao), "frame for another aircraft");
            return false;
        }

        let timestamp = frame.timestamp();
        let mut state = self.lock();
        state.last_seen = state.last_seen.max(timestamp);
        state.msg_count += 1;
        state.recent.push(RecentFrame {
            timestamp,
            raw: frame.diagnostic_bytes().to_vec(),
        });
        if let Frame::Beast(beast) = frame {
            let rssi = beast.rssi();
            if rssi.is_finite() {
                state.signal_level = Some(rssi);
            }
        }

        let mut changed = match decoded {
            Decoded::ModeS(msg) => self.apply_mode_s(&mut state, msg, timestamp, reference),
            Decoded::Sbs1(msg) => self.apply_sbs1(&mut state, msg),
        };

        // planes that never report a position still get the receiver's tile
        if state.location.grid_tile.is_none() {
            if let Some((lat, lon)) = reference {
                let tile = self.tiles.as_ref().and_then(|t| t.lookup(lat, lon));
                changed |= tile.is_some();
                state.location.grid_tile = tile;
            }
        }
        changed
    }

    fn apply_mode_s(
        &self,
        state: &mut PlaneState,
        msg: &ModeSMessage,
        ts: f64,
        reference: Option<(f64, f64)>,
    ) -> bool {
        let mut changed = false;

        if let Some(on_ground) = msg.on_ground {
            changed |= set_ground_status(state, on_ground, ts);
        }
        if let Some(alt) = msg.altitude {
            changed |= state.location.altitude.set(alt, ts);
        }
        if let Some(fs) = msg.flight_status {
            changed |= state.flight_status.set(fs, ts);
        }
        if let Some(alert) = msg.alert {
            changed |= state.alert.set(alert, ts);
        }
        if let Some(spi) = msg.spi {
            changed |= state.spi.set(spi, ts);
        }
        if let Some(squawk) = &msg.squawk {
            let before = state.squawk.get().cloned();
            if state.squawk.set(squawk.clone(), ts) {
                debug!(icao = %self.icao_str(), ?before, after = %squawk, "squawk changed");
                changed = true;
            }
        }
        if let Some(callsign) = &msg.callsign {
            changed |= set_option(&mut state.callsign, callsign.clone());
        }
        if let Some(category) = &msg.category {
            changed |= set_option(&mut state.category, category.clone());
        }
        if let Some(size) = msg.airframe_size {
            changed |= set_option(&mut state.airframe_size, size);
        }
        if let Some(emergency) = msg.emergency {
            changed |= state.emergency.set(emergency, ts);
        }
        if let Some(ss) = msg.surveillance_status {
            changed |= state.surveillance_status.set(ss, ts);
        }

        if let Some(v) = msg.velocity {
            if let Some(hdg) = v.heading_deg {
                changed |= state.location.heading.set(hdg, ts);
            }
            if let Some(kts) = v.speed_kts {
                changed |= state.location.velocity.set(kts, ts);
            }
            if let Some(vr) = v.vertical_rate_fpm {
                changed |= state.location.vertical_rate.set(vr, ts);
            }
        }
        if let Some(kts) = msg.ground_speed_kts {
            changed |= state.location.velocity.set(kts, ts);
        }
        if let Some(track) = msg.ground_track_deg {
            changed |= state.location.heading.set(track, ts);
        }

        if let Some(frag) = msg.cpr {
            if frag.odd {
                state.cpr.set_odd(frag.lat, frag.lon, ts);
            } else {
                state.cpr.set_even(frag.lat, frag.lon, ts);
            }
            let reference = match reference {
                Some(r) => Some(r),
                None => implicit_reference(state, ts),
            };
            state.cpr.set_reference(reference);
            match state.cpr.decode(frag.surface) {
                Ok(pos) => match self.add_position(state, pos.lat, pos.lon, pos.timestamp) {
                    Ok(moved) => changed |= moved,
                    Err(reason) => debug!(icao = %self.icao_str(), ?reason, "position discarded"),
                },
                Err(e) => trace!(icao = %self.icao_str(), error = %e, "no position yet"),
            }
        }

        if changed {
            trace!(
                icao = %self.icao_str(),
                df = msg.df,
                status = msg.flight_status.map(flight_status_text),
                "plane updated"
            );
        }
        changed
    }

    fn apply_sbs1(&self, state: &mut PlaneState, msg: &Sbs1Message) -> bool {
        let ts = msg.timestamp;
        let mut changed = false;

        if let Some(on_ground) = msg.on_ground {
            changed |= set_ground_status(state, on_ground, ts);
        }
        if let Some(callsign) = &msg.callsign {
            changed |= set_option(&mut state.callsign, callsign.clone());
        }
        if let Some(value) = msg.altitude {
            let alt = Altitude {
                value,
                units: AltitudeUnits::Feet,
            };
            changed |= state.location.altitude.set(alt, ts);
        }
        if let Some(kts) = msg.ground_speed {
            changed |= state.location.velocity.set(kts, ts);
        }
        if let Some(track) = msg.track {
            changed |= state.location.heading.set(track, ts);
        }
        if let Some(vr) = msg.vertical_rate {
            changed |= state.location.vertical_rate.set(vr, ts);
        }
        if let Some(squawk) = &msg.squawk {
            changed |= state.squawk.set(squawk.clone(), ts);
        }
        if let Some(alert) = msg.alert {
            changed |= state.alert.set(alert, ts);
        }
        if let Some(spi) = msg.spi {
            changed |= state.spi.set(spi, ts);
        }
        if msg.emergency == Some(true) {
            changed |= state.emergency.set(EmergencyState::General, ts);
        }
        if let Some((lat, lon)) = msg.position {
            match self.add_position(state, lat, lon, ts) {
                Ok(moved) => changed |= moved,
                Err(reason) => debug!(icao = %self.icao_str(), ?reason, "position discarded"),
            }
        }
        changed
    }

    /// Run a candidate position through the plausibility guard and store
    /// it. `Ok(false)` means the position was accepted but did not move.
    fn add_position(
        &self,
        state: &mut PlaneState,
        lat: f64,
        lon: f64,
        ts: f64,
    ) -> Result<bool, PositionRejected> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(PositionRejected::OutOfRange { lat, lon });
        }

        let loc = &mut state.location;
        let (mut distance, mut interval) = (0.0, 0.0);
        if let (Some((prev_lat, prev_lon)), Some(prev_ts)) =
            (loc.position.value(), loc.position.updated())
        {
            let prev = Fix {
                lat: prev_lat,
                lon: prev_lon,
                timestamp: prev_ts,
            };
            let next = Fix { lat, lon, timestamp: ts };
            match calc::check_position(prev, next, loc.velocity.value(), loc.heading.value()) {
                Plausibility::Accept { distance: d } => {
                    distance = d;
                    interval = ts - prev_ts;
                }
                rejected @ (Plausibility::TooFar { .. } | Plausibility::TooHard { .. }) => {
                    loc.track_finished = true;
                    warn!(
                        icao = %self.icao_str(),
                        prev_lat,
                        prev_lon,
                        lat,
                        lon,
                        reported_kts = ?loc.velocity.value(),
                        ?rejected,
                        "implausible move, discarding position"
                    );
                    for f in state.recent.iter() {
                        debug!(icao = %self.icao_str(), frame = %f, "frames leading to broken track");
                    }
                    return Err(PositionRejected::Implausible(rejected));
                }
                rejected => return Err(PositionRejected::Implausible(rejected)),
            }
        }

        let moved = loc.position.set((lat, lon), ts);
        if !moved {
            return Ok(false);
        }
        loc.distance_travelled += distance;
        loc.duration_travelled += interval;
        if let Some(tile) = self.tiles.as_ref().and_then(|t| t.lookup(lat, lon)) {
            loc.grid_tile = Some(tile);
        }

        if state.history.len() >= MAX_LOCATION_HISTORY {
            state.history.pop_front();
        }
        let snapshot = state.location.clone();
        state.history.push_back(snapshot);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn icao(&self) -> Icao {
        self.icao
    }

    pub fn icao_str(&self) -> String {
        icao_to_string(&self.icao)
    }

    pub fn registration(&self) -> Option<&str> {
        self.registration.as_deref()
    }

    pub fn tracked_since(&self) -> f64 {
        self.tracked_since
    }

    pub fn last_seen(&self) -> f64 {
        self.lock().last_seen
    }

    pub fn msg_count(&self) -> u64 {
        self.lock().msg_count
    }

    pub fn has_location(&self) -> bool {
        self.lock().location.position.is_set()
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        self.lock().location.position.value()
    }

    pub fn altitude(&self) -> Option<Altitude> {
        self.lock().location.altitude.value()
    }

    pub fn heading(&self) -> Option<f64> {
        self.lock().location.heading.value()
    }

    pub fn velocity(&self) -> Option<f64> {
        self.lock().location.velocity.value()
    }

    pub fn vertical_rate(&self) -> Option<i32> {
        self.lock().location.vertical_rate.value()
    }

    pub fn on_ground(&self) -> Option<bool> {
        self.lock().location.on_ground.value()
    }

    pub fn grid_tile(&self) -> Option<String> {
        self.lock().location.grid_tile.clone()
    }

    pub fn track_finished(&self) -> bool {
        self.lock().location.track_finished
    }

    pub fn squawk(&self) -> Option<String> {
        self.lock().squawk.get().cloned()
    }

    pub fn callsign(&self) -> Option<String> {
        self.lock().callsign.clone()
    }

    pub fn category(&self) -> Option<String> {
        self.lock().category.clone()
    }

    pub fn signal_level(&self) -> Option<f64> {
        self.lock().signal_level
    }

    /// A copy of the current location.
    pub fn location(&self) -> PlaneLocation {
        self.lock().location.clone()
    }

    pub fn location_history(&self) -> Vec<PlaneLocation> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    /// Recently handled frames, newest first.
    pub fn recent_frames(&self) -> Vec<RecentFrame> {
        self.lock().recent.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> PlaneSnapshot {
        let s = self.lock();
        let loc = &s.location;
        PlaneSnapshot {
            icao: self.icao_str(),
            registration: self.registration.clone(),
            callsign: s.callsign.clone(),
            squawk: s.squawk.get().cloned(),
            category: s.category.clone(),
            lat: loc.lat(),
            lon: loc.lon(),
            altitude: loc.altitude.value(),
            heading: loc.heading.value(),
            velocity: loc.velocity.value(),
            vertical_rate: loc.vertical_rate.value(),
            on_ground: loc.on_ground.value(),
            grid_tile: loc.grid_tile.clone(),
            flight_status: s.flight_status.value().map(flight_status_text),
            emergency: s.emergency.value().filter(|e| *e != EmergencyState::None),
            alert: s.alert.value().unwrap_or(false),
            spi: s.spi.value().unwrap_or(false),
            airframe_size: s.airframe_size,
            signal_level: s.signal_level,
            msg_count: s.msg_count,
            tracked_since: self.tracked_since,
            last_seen: s.last_seen,
            position_updated: loc.position.updated(),
            distance_travelled_m: loc.distance_travelled,
            track_finished: loc.track_finished,
            history_len: s.history.len(),
        }
    }
}

fn set_option<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    let changed = slot.as_ref() != Some(&value);
    *slot = Some(value);
    changed
}

/// Switching between surface and airborne invalidates any half-built CPR
/// pair. Landing also zeroes the vertical rate.
fn set_ground_status(state: &mut PlaneState, on_ground: bool, ts: f64) -> bool {
    let previous = state.location.on_ground.value();
    if previous.is_some_and(|p| p != on_ground) {
        state.cpr.reset();
    }
    let mut changed = state.location.on_ground.set(on_ground, ts);
    if on_ground {
        changed |= state.location.vertical_rate.set(0, ts);
    }
    changed
}

/// Our own last position, when recent enough to anchor a local decode.
fn implicit_reference(state: &PlaneState, now: f64) -> Option<(f64, f64)> {
    state
        .history
        .iter()
        .rev()
        .find(|loc| {
            loc.position
                .updated()
                .is_some_and(|t| now - t <= IMPLICIT_REFERENCE_SECS)
        })
        .and_then(|loc| loc.position.value())
}

/// Serialisable view of a plane for sinks and output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaneSnapshot {
    pub icao: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude: Option<Altitude>,
    pub heading: Option<f64>,
    pub velocity: Option<f64>,
    pub vertical_rate: Option<i32>,
    pub on_ground: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_tile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency: Option<EmergencyState>,
    pub alert: bool,
    pub spi: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airframe_size: Option<AirframeSize>,
    pub signal_level: Option<f64>,
    pub msg_count: u64,
    pub tracked_since: f64,
    pub last_seen: f64,
    pub position_updated: Option<f64>,
    pub distance_travelled_m: f64,
    pub track_finished: bool,
    pub history_len: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beast::{encode_beast, BeastFrame, BeastType};
    use crate::mode_s::ModeSFrame;
    use crate::sbs1::Sbs1Frame;

    fn mode_s(hex: &str, ts: f64) -> Frame {
        ModeSFrame::from_hex(hex, ts).unwrap().into()
    }

    fn assert_pos(got: Option<(f64, f64)>, want: (f64, f64)) {
        let got = got.expect("plane should have a position");
        assert!(
            (got.0 - want.0).abs() < 1e-9 && (got.1 - want.1).abs() < 1e-9,
            "expected {want:?}, got {got:?}"
        );
    }

    const EVEN_40621D: &str = "8D40621D58C382D690C8AC2863A7";
    const ODD_40621D: &str = "8D40621D58C386435CC412692AD6";

    #[test]
    fn test_tracking_pair() {
        let plane = Plane::new([0x40, 0x62, 0x1D], 1.0);
        assert!(plane.handle_frame(&mode_s(ODD_40621D, 1.0), None));
        assert!(!plane.has_location());

        assert!(plane.handle_frame(&mode_s(EVEN_40621D, 2.0), None));
        assert_pos(plane.position(), (52.2572021484375, 3.91937255859375));
        assert_eq!(plane.altitude().map(|a| a.value), Some(38000));
        assert_eq!(plane.on_ground(), Some(false));
        assert_eq!(plane.history_len(), 1);
        assert_eq!(plane.msg_count(), 2);
        assert_eq!(plane.last_seen(), 2.0);
    }

    #[test]
    fn test_repeat_frame_is_not_a_change() {
        let plane = Plane::new([0x48, 0x40, 0xD6], 1.0);
        let frame = mode_s("8D4840D6202CC371C32CE0576098", 1.0);
        assert!(plane.handle_frame(&frame, None));
        assert!(!plane.handle_frame(&frame, None));
        assert_eq!(plane.callsign().as_deref(), Some("KLM1023"));
        assert_eq!(plane.msg_count(), 2);
    }

    #[test]
    fn test_repeat_position_not_added_to_history() {
        let plane = Plane::new([0x40, 0x62, 0x1D], 1.0);
        plane.handle_frame(&mode_s(ODD_40621D, 1.0), None);
        plane.handle_frame(&mode_s(EVEN_40621D, 2.0), None);
        assert!(!plane.handle_frame(&mode_s(EVEN_40621D, 2.0), None));
        assert_eq!(plane.history_len(), 1);
    }

    #[test]
    fn test_bad_location_update_rejected() {
        let plane = Plane::new([0x4C, 0xA8, 0x13], 0.0);
        let frames = [
            ("8D4CA813589186EF638487A3F9F7", 1654071089.590443635),
            ("8D4CA813589183871D80EEE6F328", 1654071089.993928591),
            ("8D4CA813589186EFA98497B6EF5A", 1654071090.498070277),
            // decodes to a point near the pole
            ("8D4CA813589183F7CCA0F55734EA", 1654071090.997511392),
        ];
        for (hex, ts) in frames {
            plane.handle_frame(&mode_s(hex, ts), None);
        }
        assert_pos(plane.position(), (53.29244322695974, -2.552140179802393));
        assert_eq!(plane.history_len(), 2);
        assert!(plane.track_finished());

        let history = plane.location_history();
        assert!(history[0].position.updated() < history[1].position.updated());
        assert!(plane.location().distance_travelled > 0.0);
    }

    #[test]
    fn test_ground_transition_resets_cpr() {
        let plane = Plane::new([0x40, 0x62, 0x1D], 1.0);
        plane.handle_frame(&mode_s(EVEN_40621D, 1.0), None);
        assert!(plane.lock().cpr.has_even());

        // DF4, flight status "on the ground"
        assert!(plane.handle_frame(&mode_s("210018387A1C15", 2.0), None));
        assert_eq!(plane.on_ground(), Some(true));
        assert_eq!(plane.vertical_rate(), Some(0));
        assert!(!plane.lock().cpr.has_even());

        // odd alone cannot pair with the discarded even
        plane.handle_frame(&mode_s(ODD_40621D, 3.0), None);
        assert!(!plane.has_location());
    }

    #[test]
    fn test_single_fragment_decodes_against_own_history() {
        let plane = Plane::new([0x40, 0x62, 0x1D], 1.0);
        plane.handle_frame(&mode_s(ODD_40621D, 1.0), None);
        plane.handle_frame(&mode_s(EVEN_40621D, 2.0), None);
        assert_eq!(plane.history_len(), 1);

        // the pair is stale by now, so the fix from t=2 is the only anchor
        assert!(plane.handle_frame(&mode_s(ODD_40621D, 20.0), None));
        let (lat, lon) = plane.position().unwrap();
        assert!((lat - 52.26578).abs() < 1e-3, "lat {lat}");
        assert!((lon - 3.93889).abs() < 1e-3, "lon {lon}");
        assert_eq!(plane.location().position.updated(), Some(20.0));
        assert_eq!(plane.history_len(), 2);
    }

    #[test]
    fn test_own_history_too_old_to_anchor() {
        let plane = Plane::new([0x40, 0x62, 0x1D], 1.0);
        plane.handle_frame(&mode_s(ODD_40621D, 1.0), None);
        plane.handle_frame(&mode_s(EVEN_40621D, 2.0), None);

        // 78s after the last fix
        assert!(!plane.handle_frame(&mode_s(ODD_40621D, 80.0), None));
        assert_pos(plane.position(), (52.2572021484375, 3.91937255859375));
        assert_eq!(plane.location().position.updated(), Some(2.0));
        assert_eq!(plane.history_len(), 1);
        assert_eq!(implicit_reference(&plane.lock(), 80.0), None);
        assert!(implicit_reference(&plane.lock(), 62.0).is_some());
    }

    #[test]
    fn test_sbs1_position() {
        let plane = Plane::new([0x7C, 0x1B, 0xE8], 0.0);
        let line = "MSG,3,1,1,7C1BE8,1,2016/06/03,00:00:38.350,2016/06/03,00:00:38.350,,8000,,,-31.94361,115.96708,,,0,0,0,0";
        assert!(plane.handle_frame(&Sbs1Frame::new(line, 0.0).into(), None));
        assert_pos(plane.position(), (-31.94361, 115.96708));
        assert_eq!(plane.altitude().map(|a| a.value), Some(8000));
        assert_eq!(plane.on_ground(), Some(false));
    }

    #[test]
    fn test_out_of_range_position_rejected() {
        let plane = Plane::new([0x7C, 0x1B, 0xE8], 0.0);
        let mut state = plane.lock();
        assert!(matches!(
            plane.add_position(&mut state, 91.0, 0.0, 1.0),
            Err(PositionRejected::OutOfRange { .. })
        ));
        assert!(!state.location.position.is_set());
    }

    #[test]
    fn test_other_aircraft_ignored() {
        let plane = Plane::new([0x01, 0x02, 0x03], 0.0);
        assert!(!plane.handle_frame(&mode_s(EVEN_40621D, 1.0), None));
        assert_eq!(plane.msg_count(), 0);
    }

    #[test]
    fn test_velocity_and_signal() {
        let plane = Plane::new([0x48, 0x50, 0x20], 0.0);
        let payload = crate::types::hex_decode("8D485020994409940838175B284F").unwrap();
        let raw = encode_beast(BeastType::ModeSLong, 100, 0x28, &payload);
        let frame: Frame = BeastFrame::from_bytes(raw, 5.0).unwrap().into();
        assert!(plane.handle_frame(&frame, None));
        assert!((plane.velocity().unwrap() - 159.20).abs() < 0.01);
        assert_eq!(plane.vertical_rate(), Some(-832));
        assert!(plane.heading().is_some());
        assert!((plane.signal_level().unwrap() - 10.0 * 40f64.log10()).abs() < 1e-9);

        let recent = plane.recent_frames();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].raw, payload);
    }

    #[test]
    fn test_tile_from_reference() {
        let tiles: Arc<dyn TileResolver> =
            Arc::new(|lat: f64, lon: f64| Some(format!("tile{}_{}", lat as i32, lon as i32)));
        let plane = Plane::new([0x48, 0x40, 0xD6], 0.0).with_tile_resolver(tiles);
        let frame = mode_s("8D4840D6202CC371C32CE0576098", 1.0);
        assert!(plane.handle_frame(&frame, Some((-31.9, 115.9))));
        assert_eq!(plane.grid_tile().as_deref(), Some("tile-31_115"));
        assert!(!plane.handle_frame(&frame, Some((-31.9, 115.9))));
    }

    #[test]
    fn test_snapshot() {
        let plane = Plane::new([0xA0, 0x00, 0x01], 1.0).with_recent_frames(2);
        let snap = plane.snapshot();
        assert_eq!(snap.icao, "A00001");
        assert_eq!(snap.registration.as_deref(), Some("N1"));
        assert_eq!(snap.lat, None);
        assert_eq!(snap.msg_count, 0);
        assert_eq!(plane.lock().recent.capacity(), 2);
    }

    #[test]
    fn test_tracked_field() {
        let mut t = Tracked::default();
        assert_eq!(t.updated(), None);
        assert!(t.set(5, 1.0));
        assert!(!t.set(5, 2.0));
        assert_eq!(t.updated(), Some(2.0));
        assert!(t.set(6, 3.0));
        assert_eq!(t.value(), Some(6));
    }
}
