//! pw-tracker: the concurrent half of planewatch.
//!
//! Producers push [`FrameEvent`](pw_core::FrameEvent)s into a bounded queue
//! drained by a pool of decode workers. Each decoded frame runs through the
//! middleware chain and lands on its [`Plane`](pw_core::Plane) in an
//! expiring registry; accepted changes become [`PlaneEvent`]s for the sinks.

pub mod error;
pub mod event;
pub mod forgetful;
pub mod middleware;
pub mod pipeline;
pub mod producer;
pub mod repeater;
pub mod sink;
pub mod tracker;

pub use error::{Result, TrackerError};
pub use event::PlaneEvent;
pub use forgetful::ForgetfulMap;
pub use middleware::IcaoFilter;
pub use pipeline::{HealthCheck, Middleware, Producer, Sink};
pub use producer::{parse_source, StreamFormat, StreamInput, StreamOptions, StreamProducer};
pub use repeater::KeepAlive;
pub use sink::{ChannelSink, LogSink};
pub use tracker::{HealthStatus, Tracker, TrackerOptions, TrackerStats};
