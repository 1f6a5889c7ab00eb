//! Fixed-capacity ring of recent frames, kept per plane for diagnostics.
//!
//! Pushing into a full ring silently drops the oldest entry.

use std::fmt;

use crate::types::hex_encode;

pub const DEFAULT_RECENT_FRAMES: usize = 20;

#[derive(Debug, Clone)]
pub struct FrameRing<T> {
    slots: Vec<Option<T>>,
    // next slot to write
    head: usize,
    len: usize,
}

impl<T> FrameRing<T> {
    /// A ring holding at most `capacity` items. Zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        FrameRing {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, item: T) {
        let cap = self.capacity();
        self.slots[self.head] = Some(item);
        self.head = (self.head + 1) % cap;
        if self.len < cap {
            self.len += 1;
        }
    }

    /// Iterate newest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let cap = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + cap - 1 - i) % cap].as_ref())
    }
}

impl<T> Default for FrameRing<T> {
    fn default() -> Self {
        FrameRing::new(DEFAULT_RECENT_FRAMES)
    }
}

/// The bits of a frame worth keeping after it has been handled.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentFrame {
    pub timestamp: f64,
    pub raw: Vec<u8>,
}

impl fmt::Display for RecentFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} {}", self.timestamp, hex_encode(&self.raw))
    }
}
