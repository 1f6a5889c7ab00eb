//! JSON-lines output: one object per plane event.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use pw_core::plane::PlaneSnapshot;
use pw_tracker::{HealthCheck, PlaneEvent, Sink};
use serde::Serialize;
use tracing::warn;

#[derive(Serialize)]
struct EventLine<'a> {
    action: &'a str,
    #[serde(flatten)]
    plane: PlaneSnapshot,
}

pub struct JsonSink<W> {
    out: Mutex<W>,
    failed: AtomicBool,
}

impl JsonSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        JsonSink::new(std::io::stdout())
    }
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        JsonSink {
            out: Mutex::new(out),
            failed: Default::default(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_line(&self, event: &PlaneEvent) {
        let line = EventLine {
            action: event.action(),
            plane: event.snapshot(),
        };
        let text = match serde_json::to_string(&line) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "cannot serialize plane event");
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{text}") {
            if !self.failed.swap(true, Ordering::Relaxed) {
                warn!(error = %e, "cannot write output");
            }
        }
    }
}

impl<W: Write + Send> HealthCheck for JsonSink<W> {
    fn name(&self) -> &str {
        "json"
    }

    fn healthy(&self) -> bool {
        !self.failed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<W: Write + Send + 'static> Sink for JsonSink<W> {
    async fn on_event(&self, event: PlaneEvent) {
        self.write_line(&event);
    }

    async fn stop(&self) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.flush() {
            warn!(error = %e, "cannot flush output");
        }
    }
}
