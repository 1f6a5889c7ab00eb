//! The tracker: fans producers into a bounded decode queue, runs a pool of
//! decode workers through the middleware chain into the plane registry,
//! and dispatches plane events to sinks.
//!
//! Shutdown is staged so nothing is dropped on the floor: producers stop
//! first, then middleware, then the decode queue closes and the workers
//! drain it, then the registry sweeper stops, and finally the event
//! channel closes and the sinks are stopped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use pw_core::config::TrackerConfig;
use pw_core::frame::FrameEvent;
use pw_core::frame_ring::DEFAULT_RECENT_FRAMES;
use pw_core::plane::{Plane, PlaneSnapshot, TileResolver};
use pw_core::types::{icao_from_hex, icao_to_string, Icao};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TrackerError};
use crate::event::PlaneEvent;
use crate::forgetful::ForgetfulMap;
use crate::pipeline::{HealthCheck, Middleware, Producer, Sink};

/// One event in flight between the workers and the sinks.
const EVENT_QUEUE_DEPTH: usize = 1;

#[derive(Clone)]
pub struct TrackerOptions {
    pub workers: usize,
    pub queue_depth: usize,
    pub prune_tick: Duration,
    pub prune_after: Duration,
    pub ground_prune_after: Duration,
    pub recent_frames: usize,
    pub tiles: Option<Arc<dyn TileResolver>>,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        TrackerOptions {
            workers: 5,
            queue_depth: 1000,
            prune_tick: Duration::from_secs(10),
            prune_after: Duration::from_secs(300),
            ground_prune_after: Duration::from_secs(120),
            recent_frames: DEFAULT_RECENT_FRAMES,
            tiles: None,
        }
    }
}

impl From<&TrackerConfig> for TrackerOptions {
    fn from(cfg: &TrackerConfig) -> Self {
        TrackerOptions {
            workers: cfg.workers,
            queue_depth: cfg.queue_depth,
            prune_tick: Duration::from_secs(cfg.prune_tick_secs),
            prune_after: Duration::from_secs(cfg.prune_after_secs),
            ground_prune_after: Duration::from_secs(cfg.ground_prune_after_secs),
            recent_frames: cfg.recent_frames,
            tiles: None,
        }
    }
}

impl TrackerOptions {
    pub fn with_tile_resolver(mut self, tiles: Arc<dyn TileResolver>) -> Self {
        self.tiles = Some(tiles);
        self
    }
}

/// Running totals, readable at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub frames: u64,
    pub decode_failures: u64,
    pub vetoed: u64,
    pub events: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub name: String,
    pub healthy: bool,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    decode_failures: AtomicU64,
    vetoed: AtomicU64,
    events: AtomicU64,
}

/// Holds the sending half of the event channel until shutdown closes it.
struct Emitter {
    tx: RwLock<Option<flume::Sender<PlaneEvent>>>,
}

impl Emitter {
    fn sender(&self) -> Option<flume::Sender<PlaneEvent>> {
        self.tx.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn emit(&self, event: PlaneEvent) {
        let Some(tx) = self.sender() else {
            trace!(%event, "event channel closed, dropping event");
            return;
        };
        if tx.send_async(event).await.is_err() {
            debug!("event dispatcher gone");
        }
    }

    /// Emit from synchronous code. When the channel is full the send is
    /// finished on the runtime rather than blocking the caller.
    fn emit_now(&self, event: PlaneEvent) {
        let Some(tx) = self.sender() else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) | Err(flume::TrySendError::Disconnected(_)) => {}
            Err(flume::TrySendError::Full(event)) => match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    rt.spawn(async move {
                        let _ = tx.send_async(event).await;
                    });
                }
                Err(_) => {
                    let _ = tx.send(event);
                }
            },
        }
    }

    fn close(&self) {
        self.tx.write().unwrap_or_else(PoisonError::into_inner).take();
    }
}

struct Shared {
    planes: ForgetfulMap<Icao, Arc<Plane>>,
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    sinks: RwLock<Vec<Arc<dyn Sink>>>,
    emitter: Arc<Emitter>,
    counters: Counters,
    recent_frames: usize,
    tiles: Option<Arc<dyn TileResolver>>,
}

pub struct Tracker {
    shared: Arc<Shared>,
    producers: RwLock<Vec<Arc<dyn Producer>>>,
    queue: RwLock<Option<flume::Sender<FrameEvent>>>,
    producer_tasks: AsyncMutex<JoinSet<()>>,
    middleware_tasks: AsyncMutex<JoinSet<()>>,
    workers: AsyncMutex<JoinSet<()>>,
    dispatcher: AsyncMutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
    // set once the staged shutdown has run to completion
    shutdown: OnceCell<()>,
}

fn snapshot_of<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

impl Tracker {
    /// Build the tracker and start its decode workers, event dispatcher
    /// and registry sweeper. Must be called inside a tokio runtime.
    pub fn new(opts: TrackerOptions) -> Self {
        let (event_tx, event_rx) = flume::bounded(EVENT_QUEUE_DEPTH);
        let emitter = Arc::new(Emitter {
            tx: RwLock::new(Some(event_tx)),
        });

        let (after, ground_after) = (opts.prune_after, opts.ground_prune_after);
        let hook_emitter = Arc::clone(&emitter);
        let planes = ForgetfulMap::builder()
            .sweep_interval(opts.prune_tick)
            .forget_when(move |_: &Icao, plane: &Arc<Plane>, idle: Duration| {
                let limit = if plane.on_ground() == Some(true) {
                    ground_after
                } else {
                    after
                };
                idle > limit
            })
            .on_evict(move |icao: &Icao, plane: &Arc<Plane>| {
                debug!(icao = %icao_to_string(icao), msgs = plane.msg_count(), "forgetting plane");
                hook_emitter.emit_now(PlaneEvent::removed(Arc::clone(plane)));
            })
            .build();
        planes.spawn_sweeper();

        let shared = Arc::new(Shared {
            planes,
            middlewares: RwLock::new(Vec::new()),
            sinks: RwLock::new(Vec::new()),
            emitter,
            counters: Counters::default(),
            recent_frames: opts.recent_frames,
            tiles: opts.tiles,
        });

        let (queue_tx, queue_rx) = flume::bounded(opts.queue_depth.max(1));
        let mut workers = JoinSet::new();
        for id in 0..opts.workers.max(1) {
            workers.spawn(decode_worker(id, Arc::clone(&shared), queue_rx.clone()));
        }
        let dispatcher = tokio::spawn(dispatch_events(Arc::clone(&shared), event_rx));

        info!(
            workers = opts.workers.max(1),
            queue_depth = opts.queue_depth,
            prune_after = ?opts.prune_after,
            "tracker started"
        );

        Tracker {
            shared,
            producers: RwLock::new(Vec::new()),
            queue: RwLock::new(Some(queue_tx)),
            producer_tasks: AsyncMutex::new(JoinSet::new()),
            middleware_tasks: AsyncMutex::new(JoinSet::new()),
            workers: AsyncMutex::new(workers),
            dispatcher: AsyncMutex::new(Some(dispatcher)),
            stopped: AtomicBool::new(false),
            shutdown: OnceCell::new(),
        }
    }

    fn queue_sender(&self) -> Result<flume::Sender<FrameEvent>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TrackerError::Stopped);
        }
        snapshot_of(&self.queue).ok_or(TrackerError::Stopped)
    }

    /// Start listening to a producer.
    pub async fn add_producer(&self, producer: Arc<dyn Producer>) -> Result<()> {
        let queue = self.queue_sender()?;
        info!(producer = producer.name(), "adding producer");
        let rx = producer.listen();
        self.producer_tasks
            .lock()
            .await
            .spawn(forward(producer.name().to_string(), rx, queue));
        self.producers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(producer);
        Ok(())
    }

    /// Append a middleware to the chain. Frames pass through middleware in
    /// the order they were added.
    pub async fn add_middleware(&self, middleware: Arc<dyn Middleware>) -> Result<()> {
        let queue = self.queue_sender()?;
        info!(middleware = middleware.name(), "adding middleware");
        if let Some(rx) = middleware.listen() {
            self.middleware_tasks
                .lock()
                .await
                .spawn(forward(middleware.name().to_string(), rx, queue));
        }
        self.shared
            .middlewares
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(middleware);
        Ok(())
    }

    pub fn add_sink(&self, sink: Arc<dyn Sink>) {
        info!(sink = sink.name(), "adding sink");
        self.shared
            .sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Wait for every producer to run dry, then shut down. This is the
    /// path for file input.
    pub async fn wait(&self) {
        drain("producer", &self.producer_tasks).await;
        self.stop().await;
    }

    /// Staged shutdown. Safe to call more than once and from several
    /// tasks: later callers wait for the first one to finish. A caller
    /// dropped part-way leaves the rest of the work to the next caller.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.get_or_init(|| self.shut_down()).await;
    }

    async fn shut_down(&self) {
        info!("stopping tracker");

        for producer in snapshot_of(&self.producers) {
            producer.stop();
        }
        drain("producer", &self.producer_tasks).await;

        for middleware in snapshot_of(&self.shared.middlewares) {
            middleware.stop();
        }
        drain("middleware", &self.middleware_tasks).await;

        self.queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drain("decode worker", &self.workers).await;

        self.shared.planes.stop().await;

        self.shared.emitter.close();
        {
            let mut dispatcher = self.dispatcher.lock().await;
            if let Some(handle) = dispatcher.as_mut() {
                if let Err(e) = handle.await {
                    warn!(error = %e, "event dispatcher ended abnormally");
                }
            }
            dispatcher.take();
        }

        for sink in snapshot_of(&self.shared.sinks) {
            sink.stop().await;
        }

        let stats = self.stats();
        info!(
            frames = stats.frames,
            failed = stats.decode_failures,
            events = stats.events,
            planes = self.num_planes(),
            "tracker stopped"
        );
    }

    pub fn plane(&self, icao: &Icao) -> Option<Arc<Plane>> {
        self.shared.planes.load(icao)
    }

    pub fn plane_by_hex(&self, hex: &str) -> Option<Arc<Plane>> {
        icao_from_hex(hex).and_then(|icao| self.plane(&icao))
    }

    pub fn num_planes(&self) -> usize {
        self.shared.planes.len()
    }

    pub fn planes(&self) -> Vec<Arc<Plane>> {
        self.shared.planes.values()
    }

    /// Snapshots of every tracked plane, ordered by address.
    pub fn snapshots(&self) -> Vec<PlaneSnapshot> {
        let mut planes = self.planes();
        planes.sort_by_key(|p| p.icao());
        planes.iter().map(|p| p.snapshot()).collect()
    }

    /// Force a registry sweep outside the regular tick.
    pub fn prune(&self) -> usize {
        self.shared.planes.sweep()
    }

    pub fn stats(&self) -> TrackerStats {
        let c = &self.shared.counters;
        TrackerStats {
            frames: c.frames.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            vetoed: c.vetoed.load(Ordering::Relaxed),
            events: c.events.load(Ordering::Relaxed),
        }
    }

    /// Health of every producer, middleware and sink.
    pub fn health(&self) -> Vec<HealthStatus> {
        fn status<H: HealthCheck + ?Sized>(h: &H) -> HealthStatus {
            HealthStatus {
                name: h.name().to_string(),
                healthy: h.healthy(),
            }
        }
        let mut out: Vec<HealthStatus> = snapshot_of(&self.producers)
            .iter()
            .map(|p| status(p.as_ref()))
            .collect();
        out.extend(snapshot_of(&self.shared.middlewares).iter().map(|m| status(m.as_ref())));
        out.extend(snapshot_of(&self.shared.sinks).iter().map(|s| status(s.as_ref())));
        out
    }

    pub fn is_healthy(&self) -> bool {
        self.health().iter().all(|h| h.healthy)
    }
}

impl Shared {
    fn new_plane(&self, icao: Icao, first_seen: f64) -> Arc<Plane> {
        let plane = Plane::new(icao, first_seen).with_recent_frames(self.recent_frames);
        Arc::new(match &self.tiles {
            Some(tiles) => plane.with_tile_resolver(Arc::clone(tiles)),
            None => plane,
        })
    }

    fn run_middlewares(&self, mut event: FrameEvent) -> Option<FrameEvent> {
        let chain = self.middlewares.read().unwrap_or_else(PoisonError::into_inner);
        for middleware in chain.iter() {
            event = middleware.handle(event)?;
        }
        Some(event)
    }

    async fn process(&self, event: FrameEvent) {
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = event.frame.decode() {
            if !e.is_noop() {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                debug!(source = %event.source.name, error = %e, "failed to decode frame");
            }
            return;
        }

        let Some(event) = self.run_middlewares(event) else {
            self.counters.vetoed.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let Some(icao) = event.frame.icao() else {
            return;
        };
        if icao == [0, 0, 0] {
            return;
        }

        let (plane, created) = self
            .planes
            .get_or_insert_with(icao, || self.new_plane(icao, event.frame.timestamp()));
        if created {
            debug!(icao = %plane.icao_str(), source = %event.source.name, "new plane");
        }

        let changed = plane.handle_frame(&event.frame, event.source.reference());
        if created {
            self.emitter.emit(PlaneEvent::appeared(plane)).await;
        } else if changed {
            self.emitter.emit(PlaneEvent::updated(plane)).await;
        }
    }
}

async fn decode_worker(id: usize, shared: Arc<Shared>, queue: flume::Receiver<FrameEvent>) {
    trace!(worker = id, "decode worker started");
    while let Ok(event) = queue.recv_async().await {
        shared.process(event).await;
    }
    trace!(worker = id, "decode worker finished");
}

async fn dispatch_events(shared: Arc<Shared>, events: flume::Receiver<PlaneEvent>) {
    while let Ok(event) = events.recv_async().await {
        shared.counters.events.fetch_add(1, Ordering::Relaxed);
        for sink in snapshot_of(&shared.sinks) {
            sink.on_event(event.clone()).await;
        }
    }
    trace!("event dispatcher finished");
}

async fn forward(name: String, from: flume::Receiver<FrameEvent>, queue: flume::Sender<FrameEvent>) {
    while let Ok(event) = from.recv_async().await {
        if queue.send_async(event).await.is_err() {
            break;
        }
    }
    debug!(source = %name, "source finished");
}

async fn drain(what: &str, tasks: &AsyncMutex<JoinSet<()>>) {
    let mut tasks = tasks.lock().await;
    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                warn!(task = what, "pipeline task panicked");
            }
        }
    }
}
