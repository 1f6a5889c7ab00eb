//! pw-core: frame model, decoders and per-aircraft state for planewatch.
//!
//! No async, no I/O beyond the config file. The tracker runtime in
//! `pw-tracker` drives these types from its decode workers.

pub mod beast;
pub mod calc;
pub mod config;
pub mod cpr;
pub mod crc;
pub mod decode;
pub mod frame;
pub mod frame_ring;
pub mod mode_s;
pub mod plane;
pub mod registration;
pub mod sbs1;
pub mod types;

// Re-export commonly used types at crate root
pub use beast::{BeastDeframer, BeastFrame, BeastType};
pub use frame::{Decoded, Frame, FrameEvent, FrameKind, FrameSource};
pub use mode_s::{ModeSFrame, ModeSMessage};
pub use plane::{Plane, PlaneLocation, PlaneSnapshot, TileResolver};
pub use sbs1::{Sbs1Frame, Sbs1Message};
pub use types::*;
