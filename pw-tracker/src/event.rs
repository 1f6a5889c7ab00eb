//! Events the tracker hands to its sinks.

use std::fmt;
use std::sync::Arc;

use pw_core::plane::{Plane, PlaneSnapshot};

/// Something happened to a plane: it appeared, its state changed, or the
/// registry forgot it.
#[derive(Debug, Clone)]
pub struct PlaneEvent {
    plane: Arc<Plane>,
    new: bool,
    removed: bool,
}

impl PlaneEvent {
    pub fn updated(plane: Arc<Plane>) -> Self {
        PlaneEvent { plane, new: false, removed: false }
    }

    pub fn appeared(plane: Arc<Plane>) -> Self {
        PlaneEvent { plane, new: true, removed: false }
    }

    pub fn removed(plane: Arc<Plane>) -> Self {
        PlaneEvent { plane, new: false, removed: true }
    }

    pub fn plane(&self) -> &Arc<Plane> {
        &self.plane
    }

    pub fn is_new(&self) -> bool {
        self.new
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn action(&self) -> &'static str {
        match (self.new, self.removed) {
            (_, true) => "removed",
            (true, false) => "new",
            (false, false) => "update",
        }
    }

    pub fn snapshot(&self) -> PlaneSnapshot {
        self.plane.snapshot()
    }
}

impl fmt::Display for PlaneEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.plane.icao_str(), self.action())
    }
}
