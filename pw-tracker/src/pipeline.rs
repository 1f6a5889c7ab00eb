//! The seams of the pipeline: producers feed frames in, middleware can
//! rewrite or veto them, sinks receive plane events.

use async_trait::async_trait;
use pw_core::frame::FrameEvent;

use crate::event::PlaneEvent;

/// Anything the tracker can ask about liveness.
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    fn healthy(&self) -> bool {
        true
    }
}

/// A source of frames.
pub trait Producer: HealthCheck {
    /// Start producing. The returned channel closes when the source is
    /// exhausted or after [`Producer::stop`].
    fn listen(&self) -> flume::Receiver<FrameEvent>;

    fn stop(&self);
}

/// A step in the ordered chain every decoded frame passes through.
pub trait Middleware: HealthCheck {
    /// Return the frame to pass on, or `None` to drop it.
    fn handle(&self, event: FrameEvent) -> Option<FrameEvent>;

    /// Middleware may inject frames of its own.
    fn listen(&self) -> Option<flume::Receiver<FrameEvent>> {
        None
    }

    fn stop(&self) {}
}

/// A consumer of plane events.
#[async_trait]
pub trait Sink: HealthCheck {
    async fn on_event(&self, event: PlaneEvent);

    async fn stop(&self) {}
}
