//! Stock middleware.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use pw_core::frame::{Decoded, FrameEvent};
use pw_core::types::{icao_to_string, Icao};
use tracing::trace;

use crate::pipeline::{HealthCheck, Middleware};

const PRUNE_EVERY: u64 = 1024;

/// Drops frames whose address was only recovered from the parity residual
/// (DF0/4/5/16/20/21) unless the same address was recently confirmed by a
/// frame that carries it in the clear (DF11/17/18). Residual addresses from
/// corrupted frames are otherwise indistinguishable from real aircraft.
///
/// SBS1 frames always pass.
pub struct IcaoFilter {
    ttl: f64,
    // icao -> last confirmed frame timestamp
    confirmed: DashMap<Icao, f64>,
    handled: AtomicU64,
}

impl IcaoFilter {
    pub fn new(ttl_secs: f64) -> Self {
        IcaoFilter {
            ttl: ttl_secs,
            confirmed: DashMap::new(),
            handled: AtomicU64::new(0),
        }
    }

    pub fn register(&self, icao: Icao, timestamp: f64) {
        self.confirmed
            .entry(icao)
            .and_modify(|t| *t = t.max(timestamp))
            .or_insert(timestamp);
    }

    pub fn is_known(&self, icao: &Icao, timestamp: f64) -> bool {
        let fresh = match self.confirmed.get(icao) {
            Some(last) => timestamp - *last <= self.ttl,
            None => return false,
        };
        if !fresh {
            self.confirmed.remove(icao);
        }
        fresh
    }

    /// Drop confirmations older than the TTL relative to `now`.
    pub fn prune(&self, now: f64) {
        self.confirmed.retain(|_, last| now - *last <= self.ttl);
    }

    pub fn len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty()
    }
}

impl Default for IcaoFilter {
    fn default() -> Self {
        IcaoFilter::new(60.0)
    }
}

impl HealthCheck for IcaoFilter {
    fn name(&self) -> &str {
        "icao-filter"
    }
}

impl Middleware for IcaoFilter {
    fn handle(&self, event: FrameEvent) -> Option<FrameEvent> {
        let ts = event.frame.timestamp();
        if self.handled.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune(ts);
        }

        let (icao, df, explicit) = match event.frame.decode().ok()? {
            Decoded::Sbs1(_) => return Some(event),
            Decoded::ModeS(msg) => (msg.icao, msg.df, msg.has_explicit_icao()),
        };
        if explicit {
            self.register(icao, ts);
            return Some(event);
        }
        if self.is_known(&icao, ts) {
            Some(event)
        } else {
            trace!(icao = %icao_to_string(&icao), df, "unconfirmed address, dropping");
            None
        }
    }
}
