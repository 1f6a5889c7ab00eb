//! Stock sinks.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::event::PlaneEvent;
use crate::pipeline::{HealthCheck, Sink};

/// Writes every event to the tracing log.
#[derive(Debug, Default)]
pub struct LogSink;

impl HealthCheck for LogSink {
    fn name(&self) -> &str {
        "log"
    }
}

#[async_trait]
impl Sink for LogSink {
    async fn on_event(&self, event: PlaneEvent) {
        let plane = event.plane();
        if event.is_removed() {
            info!(icao = %plane.icao_str(), msgs = plane.msg_count(), "plane lost");
            return;
        }
        let (lat, lon) = plane.position().unzip();
        let callsign = plane.callsign().unwrap_or_default();
        let squawk = plane.squawk().unwrap_or_default();
        debug!(
            icao = %plane.icao_str(),
            action = event.action(),
            callsign = %callsign,
            squawk = %squawk,
            lat,
            lon,
            altitude = plane.altitude().map(|a| a.value),
            "plane"
        );
    }
}

/// Forwards events into a channel, for embedding the tracker in other
/// code and for tests.
pub struct ChannelSink {
    name: String,
    tx: flume::Sender<PlaneEvent>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, flume::Receiver<PlaneEvent>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (ChannelSink { name: name.into(), tx }, rx)
    }
}

impl HealthCheck for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn healthy(&self) -> bool {
        !self.tx.is_disconnected()
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn on_event(&self, event: PlaneEvent) {
        if self.tx.send_async(event).await.is_err() {
            debug!(sink = %self.name, "receiver gone, dropping event");
        }
    }
}
