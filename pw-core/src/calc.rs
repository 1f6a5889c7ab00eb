//! Geodesy and plausibility checks for decoded positions.

/// Absolute ceiling for any aircraft, metres/second.
pub const MACH4: f64 = 1372.0;

pub const KNOTS_TO_MS: f64 = 0.514444;

/// Hardest acceleration accepted between two positions, m/s².
pub const GEFORCE5: f64 = 9.8 * 5.0;

/// Earth radius used by the haversine distance, metres.
const EARTH_RADIUS_M: f64 = 6_378_100.0;

/// Positions further apart in time than this are trusted without checks.
pub const TRUST_AFTER_SECS: f64 = 300.0;

/// Great circle distance in metres between two points given in degrees.
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (la1, lo1) = (lat1.to_radians(), lon1.to_radians());
    let (la2, lo2) = (lat2.to_radians(), lon2.to_radians());
    let h = hsin(la2 - la1) + la1.cos() * la2.cos() * hsin(lo2 - lo1);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

fn hsin(theta: f64) -> f64 {
    (theta / 2.0).sin().powi(2)
}

/// How far an aircraft moving at `velocity` m/s could plausibly travel in
/// `interval` seconds.
///
/// Allows 1.5x the velocity, or `(v + 2) * 10` below 20 m/s where doubling
/// speed is easy. Never more than Mach 4.
pub fn max_allowable_distance(interval: f64, velocity: f64) -> f64 {
    let interval = if interval <= 0.001 { 1.0 } else { interval };
    let velocity = velocity.clamp(1.0, MACH4);

    let max_speed = if velocity < 20.0 {
        (velocity + 2.0) * 10.0
    } else {
        velocity * 1.5
    };
    (max_speed * interval).min(MACH4 * interval)
}

/// Outcome of checking a candidate position against the previous one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Plausibility {
    Accept { distance: f64 },
    /// Too far for the elapsed time.
    TooFar { distance: f64, limit: f64, interval: f64 },
    /// Reachable, but only by turning or speeding up harder than 5 g.
    TooHard { acceleration: f64, interval: f64 },
    /// Older than the position it would replace.
    OutOfOrder { interval: f64 },
}

impl Plausibility {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Plausibility::Accept { .. })
    }
}

/// A previously accepted position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: f64,
}

/// The aircraft's last reported ground speed and track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    pub velocity_kts: f64,
    pub heading: f64,
}

/// Acceleration in m/s² needed to get from `prev`, moving as `motion`
/// says, to `next` in the time between them.
///
/// Works on a flat-earth approximation of the displacement, which is
/// within a percent or so over the distances involved.
pub fn acceleration_between(prev: Fix, next: Fix, motion: Motion) -> f64 {
    let interval = next.timestamp - prev.timestamp;
    let elapsed = if interval <= 0.001 { 1.0 } else { interval };
    let metres_per_degree = 2.0 * std::f64::consts::PI * EARTH_RADIUS_M / 360.0;

    let speed = motion.velocity_kts * KNOTS_TO_MS;
    let (sin, cos) = motion.heading.to_radians().sin_cos();
    let (vx_ref, vy_ref) = (speed * sin, speed * cos);

    let dx = metres_per_degree * (next.lon - prev.lon) * prev.lat.to_radians().cos();
    let dy = metres_per_degree * (next.lat - prev.lat);
    let (vx, vy) = (dx / elapsed, dy / elapsed);

    let (ax, ay) = ((vx - vx_ref) / elapsed, (vy - vy_ref) / elapsed);
    ax.hypot(ay)
}

/// Check that moving from `prev` to `next` is physically possible.
///
/// `reported_kts` is the aircraft's last reported speed. Without one the
/// implied speed of the move itself is the yardstick, which still catches
/// anything beyond Mach 4. With a reported track as well, the move must
/// also not need more than 5 g.
pub fn check_position(
    prev: Fix,
    next: Fix,
    reported_kts: Option<f64>,
    reported_heading: Option<f64>,
) -> Plausibility {
    let interval = next.timestamp - prev.timestamp;
    let distance = distance(prev.lat, prev.lon, next.lat, next.lon);
    if interval < 0.0 {
        return Plausibility::OutOfOrder { interval };
    }
    if interval > TRUST_AFTER_SECS {
        return Plausibility::Accept { distance };
    }

    let elapsed = if interval <= 0.001 { 1.0 } else { interval };
    let velocity = match reported_kts {
        Some(kts) => kts * KNOTS_TO_MS,
        None => distance / elapsed,
    };
    let limit = max_allowable_distance(interval, velocity);
    if distance > limit {
        return Plausibility::TooFar {
            distance,
            limit,
            interval,
        };
    }

    if let (Some(velocity_kts), Some(heading)) = (reported_kts, reported_heading) {
        let acceleration = acceleration_between(prev, next, Motion { velocity_kts, heading });
        if acceleration > GEFORCE5 {
            return Plausibility::TooHard {
                acceleration,
                interval,
            };
        }
    }
    Plausibility::Accept { distance }
}
