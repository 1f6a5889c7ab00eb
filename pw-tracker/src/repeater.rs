//! Keep-alive repeats for sparse feeds.
//!
//! Some feeds only report an aircraft when something about it changes. To
//! keep such aircraft from being forgotten by the registry, the newest
//! frame of every aircraft is sent again at a fixed cadence, tagged
//! `repeat`, until nothing new has been heard from it for a while.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pw_core::frame::{FrameEvent, FrameSource};
use pw_core::types::{icao_to_string, Icao};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

pub const DEFAULT_REPEAT_EVERY: Duration = Duration::from_secs(30);
pub const DEFAULT_REPEAT_FOR: Duration = Duration::from_secs(61 * 60);

/// Tag carried by the source of every repeated frame.
pub const REPEAT_TAG: &str = "repeat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    /// Cadence of the repeats.
    pub every: Duration,
    /// Stop repeating an aircraft this long after its last real frame.
    pub lifetime: Duration,
}

impl Default for KeepAlive {
    fn default() -> Self {
        KeepAlive {
            every: DEFAULT_REPEAT_EVERY,
            lifetime: DEFAULT_REPEAT_FOR,
        }
    }
}

struct Held {
    repeat: FrameEvent,
    heard: Instant,
}

impl KeepAlive {
    /// Forward frames from `input` to `out`, repeating the newest one per
    /// aircraft. Returns when `input` closes, `out` has no receiver or
    /// `stop` flips to true.
    pub async fn run(
        self,
        input: flume::Receiver<FrameEvent>,
        out: flume::Sender<FrameEvent>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut held: HashMap<Icao, Held> = HashMap::new();
        let mut tick = interval_at(Instant::now() + self.every, self.every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = stop.changed() => break,
                next = input.recv_async() => {
                    let Ok(event) = next else { break };
                    if let Some(icao) = event.frame.icao() {
                        held.insert(icao, Held {
                            repeat: repeat_of(&event),
                            heard: Instant::now(),
                        });
                    }
                    if out.send_async(event).await.is_err() {
                        return;
                    }
                }
                _ = tick.tick() => {
                    held.retain(|icao, h| {
                        let alive = h.heard.elapsed() <= self.lifetime;
                        if !alive {
                            debug!(icao = %icao_to_string(icao), "repeat expired");
                        }
                        alive
                    });
                    for (icao, h) in &held {
                        trace!(icao = %icao_to_string(icao), "repeating frame");
                        if out.send_async(h.repeat.clone()).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
        debug!(held = held.len(), "keep-alive finished");
    }
}

fn repeat_of(event: &FrameEvent) -> FrameEvent {
    let source = FrameSource {
        tag: REPEAT_TAG.to_string(),
        ..(*event.source).clone()
    };
    FrameEvent::new(event.frame.clone(), Arc::new(source))
}
