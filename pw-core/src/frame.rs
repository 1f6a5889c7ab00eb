//! The frame union that flows through the pipeline.
//!
//! Every wire format the tracker accepts is one variant of [`Frame`]. A
//! frame is tagged with the [`FrameSource`] it arrived from as soon as it
//! enters the pipeline, forming a [`FrameEvent`].

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::beast::BeastFrame;
use crate::mode_s::{ModeSFrame, ModeSMessage};
use crate::sbs1::{Sbs1Frame, Sbs1Message};
use crate::types::{DecodeError, Icao};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameKind {
    Beast,
    ModeS,
    Sbs1,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Beast => write!(f, "beast"),
            FrameKind::ModeS => write!(f, "avr"),
            FrameKind::Sbs1 => write!(f, "sbs1"),
        }
    }
}

/// What a successful decode hands back, borrowed from the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded<'a> {
    ModeS(&'a ModeSMessage),
    Sbs1(&'a Sbs1Message),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Beast(BeastFrame),
    ModeS(ModeSFrame),
    Sbs1(Sbs1Frame),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Beast(_) => FrameKind::Beast,
            Frame::ModeS(_) => FrameKind::ModeS,
            Frame::Sbs1(_) => FrameKind::Sbs1,
        }
    }

    /// Decode lazily. Repeated calls return the cached outcome.
    pub fn decode(&self) -> Result<Decoded<'_>, DecodeError> {
        match self {
            Frame::Beast(f) => f.decode().map(Decoded::ModeS),
            Frame::ModeS(f) => f.decode().map(Decoded::ModeS),
            Frame::Sbs1(f) => f.decode().map(Decoded::Sbs1),
        }
    }

    /// Aircraft address, or `None` when the frame does not decode.
    pub fn icao(&self) -> Option<Icao> {
        match self.decode().ok()? {
            Decoded::ModeS(m) => Some(m.icao),
            Decoded::Sbs1(m) => Some(m.icao),
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            Frame::Beast(f) => f.timestamp(),
            Frame::ModeS(f) => f.timestamp(),
            Frame::Sbs1(f) => f.timestamp(),
        }
    }

    pub fn raw_bytes(&self) -> &[u8] {
        match self {
            Frame::Beast(f) => f.raw(),
            Frame::ModeS(f) => f.raw(),
            Frame::Sbs1(f) => f.raw(),
        }
    }

    /// The Mode S payload, for the variants that carry one.
    pub fn mode_s(&self) -> Option<&ModeSFrame> {
        match self {
            Frame::Beast(f) => f.mode_s(),
            Frame::ModeS(f) => Some(f),
            Frame::Sbs1(_) => None,
        }
    }

    /// Bytes worth keeping for diagnostics: the Mode S payload when there
    /// is one, the raw frame otherwise.
    pub fn diagnostic_bytes(&self) -> &[u8] {
        self.mode_s().map(ModeSFrame::raw).unwrap_or_else(|| self.raw_bytes())
    }
}

impl From<BeastFrame> for Frame {
    fn from(f: BeastFrame) -> Self {
        Frame::Beast(f)
    }
}

impl From<ModeSFrame> for Frame {
    fn from(f: ModeSFrame) -> Self {
        Frame::ModeS(f)
    }
}

impl From<Sbs1Frame> for Frame {
    fn from(f: Sbs1Frame) -> Self {
        Frame::Sbs1(f)
    }
}

/// Receiver / session metadata attached to every frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameSource {
    pub origin_identifier: String,
    pub name: String,
    pub tag: String,
    pub ref_lat: Option<f64>,
    pub ref_lon: Option<f64>,
}

impl FrameSource {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        let name = name.into();
        FrameSource {
            origin_identifier: name.clone(),
            name,
            tag: tag.into(),
            ref_lat: None,
            ref_lon: None,
        }
    }

    pub fn with_reference(mut self, lat: f64, lon: f64) -> Self {
        self.ref_lat = Some(lat);
        self.ref_lon = Some(lon);
        self
    }

    /// The receiver position, when both halves are known.
    pub fn reference(&self) -> Option<(f64, f64)> {
        self.ref_lat.zip(self.ref_lon)
    }
}

/// A frame together with the source that produced it.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    pub frame: Frame,
    pub source: Arc<FrameSource>,
}

impl FrameEvent {
    pub fn new(frame: impl Into<Frame>, source: Arc<FrameSource>) -> Self {
        FrameEvent {
            frame: frame.into(),
            source,
        }
    }
}
