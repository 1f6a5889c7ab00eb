//! Producers that read AVR, Beast or SBS1 streams from capture files, from
//! a TCP feed such as dump1090 or readsb, or from feeders that connect to
//! a listening socket.
//!
//! A fetcher reconnects forever with jittered exponential backoff (from
//! 1s, roughly doubling, up to a minute) until stopped, and reports itself unhealthy while it has
//! no connection. Capture files ending in `.gz` or `.bz2` are decompressed
//! as they are read.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_compression::tokio::bufread::{BzDecoder, GzipDecoder};
use pw_core::beast::{BeastDeframer, BeastFrame};
use pw_core::frame::{Frame, FrameEvent, FrameSource};
use pw_core::mode_s::ModeSFrame;
use pw_core::sbs1::Sbs1Frame;
use pw_core::types::now_secs;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TrackerError};
use crate::pipeline::{HealthCheck, Producer};
use crate::repeater::KeepAlive;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const ACCEPT_RETRY: Duration = Duration::from_millis(100);
const READ_BUFFER: usize = 8192;
const CHANNEL_DEPTH: usize = 256;
/// Longest AVR or SBS1 line kept. Anything longer is dropped up to the
/// next newline.
const MAX_LINE: u64 = 64 * 1024;
/// Pacing never sleeps longer than this between two frames. Larger gaps
/// come from receiver restarts or corrupt timestamps.
const MAX_REPLAY_GAP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    Avr,
    Beast,
    Sbs1,
}

impl StreamFormat {
    /// The port dump1090-style decoders serve this format on.
    pub fn default_port(self) -> u16 {
        match self {
            StreamFormat::Avr => 30002,
            StreamFormat::Sbs1 => 30003,
            StreamFormat::Beast => 30005,
        }
    }
}

impl FromStr for StreamFormat {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "avr" | "raw" => Ok(StreamFormat::Avr),
            "beast" => Ok(StreamFormat::Beast),
            "sbs1" | "sbs" | "basestation" => Ok(StreamFormat::Sbs1),
            _ => Err(TrackerError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamFormat::Avr => "avr",
            StreamFormat::Beast => "beast",
            StreamFormat::Sbs1 => "sbs1",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamInput {
    Files(Vec<PathBuf>),
    Fetch { host: String, port: u16 },
    /// Accept feeders on `addr` and read every connection.
    Listen { addr: String },
}

impl fmt::Display for StreamInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamInput::Files(paths) => {
                let names: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "file://{}", names.join(","))
            }
            StreamInput::Fetch { host, port } => write!(f, "{host}:{port}"),
            StreamInput::Listen { addr } => write!(f, "listen://{addr}"),
        }
    }
}

/// Parse `FORMAT://HOST[:PORT]`, `FORMAT+listen://[HOST][:PORT]` or
/// `FORMAT+file://PATH`.
pub fn parse_source(url: &str) -> Result<(StreamFormat, StreamInput)> {
    let bad = || TrackerError::BadSource(url.to_string());
    let (scheme, rest) = url.split_once("://").ok_or_else(bad)?;
    if rest.is_empty() {
        return Err(bad());
    }

    if let Some(format) = scheme.strip_suffix("+file") {
        let format = format.parse()?;
        return Ok((format, StreamInput::Files(vec![PathBuf::from(rest)])));
    }

    if let Some(format) = scheme.strip_suffix("+listen") {
        let format: StreamFormat = format.parse()?;
        let (host, port) = host_port(rest, format).ok_or_else(bad)?;
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        let addr = format!("{host}:{port}");
        return Ok((format, StreamInput::Listen { addr }));
    }

    let format: StreamFormat = scheme.parse()?;
    let (host, port) = host_port(rest, format).ok_or_else(bad)?;
    if host.is_empty() {
        return Err(bad());
    }
    Ok((
        format,
        StreamInput::Fetch {
            host: host.to_string(),
            port,
        },
    ))
}

fn host_port(rest: &str, format: StreamFormat) -> Option<(&str, u16)> {
    match rest.rsplit_once(':') {
        Some((host, port)) => Some((host, port.parse().ok()?)),
        None => Some((rest, format.default_port())),
    }
}

/// Optional behaviour on top of plain reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamOptions {
    /// Sleep between Beast frames for the gap between their MLAT
    /// timestamps, so a capture replays at its recorded speed.
    pub replay_pacing: bool,
    /// Re-send the newest frame of every aircraft, see [`KeepAlive`].
    pub keep_alive: Option<KeepAlive>,
}

struct Inner {
    name: String,
    format: StreamFormat,
    input: StreamInput,
    options: StreamOptions,
    template: FrameSource,
    stop: watch::Sender<bool>,
    connected: AtomicBool,
    failed: AtomicBool,
}

/// Reads one stream format from files, a TCP feed or a listening socket.
#[derive(Clone)]
pub struct StreamProducer {
    inner: Arc<Inner>,
}

impl StreamProducer {
    /// `source` supplies the receiver name, tag and reference position
    /// stamped on every frame.
    pub fn new(format: StreamFormat, input: StreamInput, source: FrameSource) -> Self {
        StreamProducer::with_options(format, input, source, StreamOptions::default())
    }

    pub fn with_options(
        format: StreamFormat,
        input: StreamInput,
        source: FrameSource,
        options: StreamOptions,
    ) -> Self {
        let name = format!("{format}:{input}");
        let (stop, _) = watch::channel(false);
        StreamProducer {
            inner: Arc::new(Inner {
                name,
                format,
                input,
                options,
                template: source,
                stop,
                connected: AtomicBool::new(false),
                failed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_url(url: &str, source: FrameSource) -> Result<Self> {
        let (format, input) = parse_source(url)?;
        Ok(StreamProducer::new(format, input, source))
    }

    pub fn format(&self) -> StreamFormat {
        self.inner.format
    }

    /// Fetchers: a connection is up. Listeners: the socket is bound.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

impl HealthCheck for StreamProducer {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn healthy(&self) -> bool {
        match self.inner.input {
            StreamInput::Files(_) => !self.inner.failed.load(Ordering::SeqCst),
            StreamInput::Fetch { .. } | StreamInput::Listen { .. } => self.is_connected(),
        }
    }
}

impl Producer for StreamProducer {
    fn listen(&self) -> flume::Receiver<FrameEvent> {
        let (tx, rx) = flume::bounded(CHANNEL_DEPTH);
        match self.inner.options.keep_alive {
            Some(keep_alive) => {
                let (raw_tx, raw_rx) = flume::bounded(CHANNEL_DEPTH);
                tokio::spawn(run(Arc::clone(&self.inner), raw_tx));
                tokio::spawn(keep_alive.run(raw_rx, tx, self.inner.stop.subscribe()));
            }
            None => {
                tokio::spawn(run(Arc::clone(&self.inner), tx));
            }
        }
        rx
    }

    fn stop(&self) {
        debug!(producer = %self.inner.name, "stopping producer");
        self.inner.stop.send_replace(true);
    }
}

enum ReadOutcome {
    /// The stream reached end of input.
    Ended,
    Stopped,
    /// Nobody is listening anymore.
    Closed,
}

async fn run(inner: Arc<Inner>, out: flume::Sender<FrameEvent>) {
    let mut stop = inner.stop.subscribe();
    match &inner.input {
        StreamInput::Files(paths) => {
            for path in paths {
                if *stop.borrow() {
                    break;
                }
                let source = Arc::new(FrameSource {
                    origin_identifier: format!("file://{}", path.display()),
                    ..inner.template.clone()
                });
                let reader = match open_capture(path).await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "cannot open input file");
                        inner.failed.store(true, Ordering::SeqCst);
                        continue;
                    }
                };
                info!(path = %path.display(), format = %inner.format, "reading file");
                match read_stream(&inner, reader, &source, &out, &mut stop).await {
                    Ok(ReadOutcome::Ended) => debug!(path = %path.display(), "end of file"),
                    Ok(ReadOutcome::Stopped | ReadOutcome::Closed) => break,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "read failed");
                        inner.failed.store(true, Ordering::SeqCst);
                    }
                }
            }
        }
        StreamInput::Fetch { host, port } => fetch(&inner, host, *port, &out, &mut stop).await,
        StreamInput::Listen { addr } => serve(&inner, addr, &out, &mut stop).await,
    }
    debug!(producer = %inner.name, "producer finished");
}

/// Open a capture file, decompressing `.gz` and `.bz2` by extension.
async fn open_capture(path: &Path) -> std::io::Result<Box<dyn AsyncRead + Send + Unpin>> {
    let file = tokio::fs::File::open(path).await?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    Ok(match ext.as_deref() {
        Some("gz") => {
            debug!(path = %path.display(), "gzip compressed capture");
            let mut decoder = GzipDecoder::new(BufReader::new(file));
            // concatenated captures
            decoder.multiple_members(true);
            Box::new(decoder)
        }
        Some("bz2") => {
            debug!(path = %path.display(), "bzip2 compressed capture");
            Box::new(BzDecoder::new(BufReader::new(file)))
        }
        _ => Box::new(file),
    })
}

async fn fetch(
    inner: &Inner,
    host: &str,
    port: u16,
    out: &flume::Sender<FrameEvent>,
    stop: &mut watch::Receiver<bool>,
) {
    let addr = format!("{host}:{port}");
    let source = Arc::new(FrameSource {
        origin_identifier: addr.clone(),
        ..inner.template.clone()
    });
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if *stop.borrow() {
            break;
        }
        let connected = tokio::select! {
            _ = stop.changed() => break,
            r = TcpStream::connect(&addr) => r,
        };
        match connected {
            Ok(stream) => {
                info!(%addr, format = %inner.format, "connected");
                inner.connected.store(true, Ordering::SeqCst);
                backoff = INITIAL_BACKOFF;
                let outcome = read_stream(inner, stream, &source, out, stop).await;
                inner.connected.store(false, Ordering::SeqCst);
                match outcome {
                    Ok(ReadOutcome::Stopped | ReadOutcome::Closed) => break,
                    Ok(ReadOutcome::Ended) => warn!(%addr, "connection closed by peer"),
                    Err(e) => warn!(%addr, error = %e, "connection failed"),
                }
            }
            Err(e) => warn!(%addr, error = %e, retry_in = ?backoff, "connect failed"),
        }

        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = next_backoff(backoff);
    }
}

/// Double, then shift by a random -1s..+0.9s so feeders that lost the same
/// server do not reconnect in lockstep.
fn next_backoff(current: Duration) -> Duration {
    let jitter = Duration::from_millis(100 * (rand::random::<u64>() % 20));
    (current * 2 + jitter)
        .saturating_sub(Duration::from_secs(1))
        .clamp(INITIAL_BACKOFF, MAX_BACKOFF)
}

/// Accept feeders until stopped, one reader task per connection.
async fn serve(
    inner: &Arc<Inner>,
    addr: &str,
    out: &flume::Sender<FrameEvent>,
    stop: &mut watch::Receiver<bool>,
) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!(%addr, error = %e, "cannot listen");
            inner.failed.store(true, Ordering::SeqCst);
            return;
        }
    };
    info!(%addr, format = %inner.format, "listening for feeders");
    inner.connected.store(true, Ordering::SeqCst);

    let mut readers = JoinSet::new();
    loop {
        if *stop.borrow() || out.is_disconnected() {
            break;
        }
        let accepted = tokio::select! {
            _ = stop.changed() => break,
            r = listener.accept() => r,
        };
        match accepted {
            Ok((stream, peer)) => {
                info!(%peer, "feeder connected");
                let source = Arc::new(FrameSource {
                    origin_identifier: peer.to_string(),
                    ..inner.template.clone()
                });
                let inner = Arc::clone(inner);
                let out = out.clone();
                let mut stop = inner.stop.subscribe();
                readers.spawn(async move {
                    match read_stream(&inner, stream, &source, &out, &mut stop).await {
                        Ok(ReadOutcome::Ended) => info!(%peer, "feeder disconnected"),
                        Ok(ReadOutcome::Stopped | ReadOutcome::Closed) => {}
                        Err(e) => warn!(%peer, error = %e, "feeder connection failed"),
                    }
                });
            }
            Err(e) => {
                warn!(%addr, error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_RETRY).await;
            }
        }
        while readers.try_join_next().is_some() {}
    }

    inner.connected.store(false, Ordering::SeqCst);
    while readers.join_next().await.is_some() {}
}

async fn read_stream<R>(
    inner: &Inner,
    reader: R,
    source: &Arc<FrameSource>,
    out: &flume::Sender<FrameEvent>,
    stop: &mut watch::Receiver<bool>,
) -> std::io::Result<ReadOutcome>
where
    R: AsyncRead + Unpin,
{
    let format = inner.format;
    let mut reader = BufReader::with_capacity(READ_BUFFER, reader);
    if format == StreamFormat::Beast {
        return read_beast(reader, inner.options.replay_pacing, source, out, stop).await;
    }

    let mut line = Vec::with_capacity(256);
    // inside a line longer than MAX_LINE
    let mut overlong = false;
    loop {
        if *stop.borrow() {
            return Ok(ReadOutcome::Stopped);
        }
        line.clear();
        let mut limited = (&mut reader).take(MAX_LINE);
        let n = tokio::select! {
            _ = stop.changed() => return Ok(ReadOutcome::Stopped),
            n = limited.read_until(b'\n', &mut line) => n?,
        };
        if n == 0 {
            return Ok(ReadOutcome::Ended);
        }
        let terminated = line.last() == Some(&b'\n');
        if overlong {
            overlong = !terminated;
            continue;
        }
        if !terminated && n as u64 == MAX_LINE {
            debug!(limit = MAX_LINE, "line too long, skipping");
            overlong = true;
            continue;
        }

        // invalid UTF-8 becomes replacement characters, which never decode
        let text = String::from_utf8_lossy(&line);
        let Some(frame) = parse_line(format, &text, now_secs()) else {
            continue;
        };
        if out.send_async(FrameEvent::new(frame, Arc::clone(source))).await.is_err() {
            return Ok(ReadOutcome::Closed);
        }
    }
}

async fn read_beast<R>(
    mut reader: BufReader<R>,
    pacing: bool,
    source: &Arc<FrameSource>,
    out: &flume::Sender<FrameEvent>,
    stop: &mut watch::Receiver<bool>,
) -> std::io::Result<ReadOutcome>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER];
    let mut deframer = BeastDeframer::new();
    let mut last_nanos = 0u64;
    loop {
        if *stop.borrow() {
            return Ok(ReadOutcome::Stopped);
        }
        let n = tokio::select! {
            _ = stop.changed() => return Ok(ReadOutcome::Stopped),
            n = reader.read(&mut buf) => n?,
        };
        if n == 0 {
            if deframer.pending() > 0 {
                debug!(bytes = deframer.pending(), "partial beast frame at end of stream");
            }
            return Ok(ReadOutcome::Ended);
        }
        deframer.push(&buf[..n]);
        let messages: Vec<Vec<u8>> = deframer.messages().collect();
        let ts = now_secs();
        for raw in messages {
            let frame = match BeastFrame::from_bytes(raw, ts) {
                Ok(f) => f,
                Err(e) => {
                    trace!(error = %e, "bad beast frame");
                    continue;
                }
            };
            if pacing && !frame.is_mlat() {
                let nanos = frame.mlat_nanos();
                if last_nanos > 0 && nanos > last_nanos {
                    let gap = Duration::from_nanos(nanos - last_nanos).min(MAX_REPLAY_GAP);
                    tokio::select! {
                        _ = stop.changed() => return Ok(ReadOutcome::Stopped),
                        _ = tokio::time::sleep(gap) => {}
                    }
                }
                last_nanos = nanos;
            }
            if out.send_async(FrameEvent::new(frame, Arc::clone(source))).await.is_err() {
                return Ok(ReadOutcome::Closed);
            }
        }
    }
}

/// One line of AVR or SBS1 text as a frame. Blank and unparsable lines
/// yield `None`.
fn parse_line(format: StreamFormat, line: &str, ts: f64) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match format {
        StreamFormat::Avr => match ModeSFrame::from_avr(line, ts) {
            Ok(f) => Some(f.into()),
            Err(e) => {
                trace!(error = %e, line, "skipping AVR line");
                None
            }
        },
        StreamFormat::Sbs1 => Some(Sbs1Frame::new(line, ts).into()),
        StreamFormat::Beast => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pw_core::beast::{encode_beast, BeastType};
    use pw_core::frame::FrameKind;
    use pw_core::types::hex_decode;
    use std::io::Write;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn collect(rx: flume::Receiver<FrameEvent>) -> Vec<FrameEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
            .await
            .expect("producer stalled")
        {
            out.push(ev);
        }
        out
    }

    #[test]
    fn test_parse_source() {
        assert_eq!(
            parse_source("beast://localhost:30005").unwrap(),
            (
                StreamFormat::Beast,
                StreamInput::Fetch {
                    host: "localhost".into(),
                    port: 30005
                }
            )
        );
        assert_eq!(
            parse_source("sbs1://10.0.0.2").unwrap().1,
            StreamInput::Fetch {
                host: "10.0.0.2".into(),
                port: 30003
            }
        );
        assert_eq!(
            parse_source("avr+file:///tmp/capture.txt").unwrap(),
            (
                StreamFormat::Avr,
                StreamInput::Files(vec![PathBuf::from("/tmp/capture.txt")])
            )
        );
        assert_eq!(
            parse_source("beast+listen://:30105").unwrap(),
            (
                StreamFormat::Beast,
                StreamInput::Listen {
                    addr: "0.0.0.0:30105".into()
                }
            )
        );
        assert_eq!(
            parse_source("sbs1+listen://127.0.0.1").unwrap().1,
            StreamInput::Listen {
                addr: "127.0.0.1:30003".into()
            }
        );
        assert!(matches!(parse_source("beast:30005"), Err(TrackerError::BadSource(_))));
        assert!(matches!(parse_source("json://host:1"), Err(TrackerError::UnknownFormat(_))));
        assert!(matches!(parse_source("beast://host:lots"), Err(TrackerError::BadSource(_))));
    }

    #[test]
    fn test_parse_line() {
        assert!(parse_line(StreamFormat::Avr, "*8D4840D6202CC371C32CE0576098;\n", 1.0).is_some());
        assert!(parse_line(StreamFormat::Avr, "garbage", 1.0).is_none());
        assert!(parse_line(StreamFormat::Sbs1, "   \r\n", 1.0).is_none());
        assert_eq!(
            parse_line(StreamFormat::Sbs1, "MSG,1,1,1,4840D6,1,,,,,KLM1023,,,,,,,,,,,", 1.0)
                .map(|f| f.kind()),
            Some(FrameKind::Sbs1)
        );
    }

    #[test]
    fn test_next_backoff() {
        for _ in 0..100 {
            let b = next_backoff(INITIAL_BACKOFF);
            assert!(b >= INITIAL_BACKOFF && b < Duration::from_secs(3), "got {b:?}");
            let b = next_backoff(Duration::from_secs(8));
            assert!(b >= Duration::from_secs(15) && b < Duration::from_secs(17), "got {b:?}");
            assert_eq!(next_backoff(MAX_BACKOFF), MAX_BACKOFF);
        }
    }

    #[tokio::test]
    async fn test_avr_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "*8D40621D58C382D690C8AC2863A7;").unwrap();
        writeln!(file, "not a frame").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "@0000000000008D40621D58C386435CC412692AD6;").unwrap();
        file.flush().unwrap();

        let producer = StreamProducer::new(
            StreamFormat::Avr,
            StreamInput::Files(vec![file.path().to_path_buf()]),
            FrameSource::new("bench", "avr").with_reference(52.0, 4.0),
        );
        let events = collect(producer.listen()).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].frame.icao(), Some([0x40, 0x62, 0x1D]));
        assert!(events[0].source.origin_identifier.starts_with("file://"));
        assert_eq!(events[0].source.name, "bench");
        assert_eq!(events[0].source.reference(), Some((52.0, 4.0)));
        assert!(producer.healthy());
    }

    const EVEN_40621D: &[u8] = b"*8D40621D58C382D690C8AC2863A7;\n";
    const ODD_40621D: &[u8] = b"*8D40621D58C386435CC412692AD6;\n";

    fn avr_file(bytes: &[u8], suffix: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn file_producer(file: &tempfile::NamedTempFile) -> StreamProducer {
        StreamProducer::new(
            StreamFormat::Avr,
            StreamInput::Files(vec![file.path().to_path_buf()]),
            FrameSource::new("bench", "avr"),
        )
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let mut bytes = EVEN_40621D.to_vec();
        bytes.extend_from_slice(b"\xff\xfe junk\n");
        bytes.extend_from_slice(ODD_40621D);
        let file = avr_file(&bytes, ".txt");

        let producer = file_producer(&file);
        let events = collect(producer.listen()).await;
        assert_eq!(events.len(), 2);
        assert!(producer.healthy());
    }

    #[tokio::test]
    async fn test_overlong_line_is_skipped() {
        let mut bytes = vec![b'A'; MAX_LINE as usize + 4000];
        bytes.push(b'\n');
        bytes.extend_from_slice(EVEN_40621D);
        let file = avr_file(&bytes, ".txt");

        let producer = file_producer(&file);
        let events = collect(producer.listen()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].frame.icao(), Some([0x40, 0x62, 0x1D]));
        assert!(producer.healthy());
    }

    #[tokio::test]
    async fn test_gzip_capture() {
        use async_compression::tokio::write::GzipEncoder;

        let mut encoder = GzipEncoder::new(Vec::new());
        encoder.write_all(EVEN_40621D).await.unwrap();
        encoder.write_all(ODD_40621D).await.unwrap();
        encoder.shutdown().await.unwrap();
        let file = avr_file(&encoder.into_inner(), ".avr.gz");

        let producer = file_producer(&file);
        let events = collect(producer.listen()).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.frame.icao() == Some([0x40, 0x62, 0x1D])));
        assert!(producer.healthy());
    }

    #[tokio::test]
    async fn test_bzip2_capture() {
        use async_compression::tokio::write::BzEncoder;

        let mut encoder = BzEncoder::new(Vec::new());
        encoder.write_all(EVEN_40621D).await.unwrap();
        encoder.shutdown().await.unwrap();
        let file = avr_file(&encoder.into_inner(), ".BZ2");

        let events = collect(file_producer(&file).listen()).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_gzip_is_unhealthy() {
        let file = avr_file(b"definitely not gzip", ".gz");
        let producer = file_producer(&file);
        assert!(collect(producer.listen()).await.is_empty());
        assert!(!producer.healthy());
    }

    #[tokio::test]
    async fn test_beast_file_split_across_reads() {
        let payload = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        let mut bytes = vec![0x00, 0x42];
        // ticks include an escape byte to exercise stuffing
        bytes.extend(encode_beast(BeastType::ModeSLong, 0x1A_0000, 40, &payload));
        bytes.extend(encode_beast(BeastType::ModeSLong, 0x1B_0000, 41, &payload));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let producer = StreamProducer::new(
            StreamFormat::Beast,
            StreamInput::Files(vec![file.path().to_path_buf()]),
            FrameSource::new("bench", "beast"),
        );
        let events = collect(producer.listen()).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.frame.kind() == FrameKind::Beast));
        assert_eq!(events[1].frame.icao(), Some([0x48, 0x40, 0xD6]));
    }

    #[tokio::test]
    async fn test_missing_file_is_unhealthy() {
        let producer = StreamProducer::new(
            StreamFormat::Sbs1,
            StreamInput::Files(vec![PathBuf::from("/definitely/not/here.sbs")]),
            FrameSource::default(),
        );
        assert!(collect(producer.listen()).await.is_empty());
        assert!(!producer.healthy());
    }

    #[tokio::test]
    async fn test_sbs1_fetch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            conn.write_all(b"MSG,1,1,1,4840D6,1,,,,,KLM1023,,,,,,,,,,,\r\n")
                .await
                .unwrap();
            conn.write_all(b"MSG,3,1,1,7C1BE8,1,2016/06/03,00:00:38.350,2016/06/03,00:00:38.350,,8000,,,-31.94361,115.96708,,,0,0,0,0\r\n")
                .await
                .unwrap();
            // hold the connection open until the client goes away
            let mut sink = [0u8; 16];
            let _ = conn.read(&mut sink).await;
        });

        let producer =
            StreamProducer::from_url(&format!("sbs1://127.0.0.1:{port}"), FrameSource::default())
                .unwrap();
        let rx = producer.listen();
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.frame.icao(), Some([0x48, 0x40, 0xD6]));
        assert_eq!(second.frame.icao(), Some([0x7C, 0x1B, 0xE8]));
        assert_eq!(first.source.origin_identifier, format!("127.0.0.1:{port}"));
        assert!(producer.healthy());

        producer.stop();
        assert!(collect(rx).await.is_empty());
        assert!(!producer.healthy());
    }

    #[tokio::test]
    async fn test_fetch_retries_until_stopped() {
        // grab a free port, then close it so connects are refused
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let producer = StreamProducer::new(
            StreamFormat::Beast,
            StreamInput::Fetch {
                host: "127.0.0.1".into(),
                port,
            },
            FrameSource::default(),
        );
        let rx = producer.listen();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!producer.healthy());
        producer.stop();
        assert!(collect(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_beast_replay_pacing() {
        let payload = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        // 200_000 ticks of 500ns apart
        let mut bytes = encode_beast(BeastType::ModeSLong, 1_000_000, 40, &payload);
        bytes.extend(encode_beast(BeastType::ModeSLong, 1_200_000, 40, &payload));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let producer = StreamProducer::with_options(
            StreamFormat::Beast,
            StreamInput::Files(vec![file.path().to_path_buf()]),
            FrameSource::default(),
            StreamOptions {
                replay_pacing: true,
                ..StreamOptions::default()
            },
        );
        let started = std::time::Instant::now();
        let events = collect(producer.listen()).await;
        assert_eq!(events.len(), 2);
        assert!(started.elapsed() >= Duration::from_millis(90), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_listen_accepts_feeders() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let producer = StreamProducer::from_url(
            &format!("avr+listen://127.0.0.1:{port}"),
            FrameSource::new("hub", "listen"),
        )
        .unwrap();
        let rx = producer.listen();

        let connect = move || async move {
            loop {
                match TcpStream::connect(("127.0.0.1", port)).await {
                    Ok(c) => break c,
                    Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }
        };
        let mut first = tokio::time::timeout(Duration::from_secs(5), connect())
            .await
            .expect("listener never came up");
        assert!(producer.healthy());
        let mut second = connect().await;

        first.write_all(EVEN_40621D).await.unwrap();
        second.write_all(ODD_40621D).await.unwrap();
        let mut got = Vec::new();
        for _ in 0..2 {
            let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
                .await
                .unwrap()
                .unwrap();
            got.push(ev);
        }
        assert!(got.iter().all(|e| e.source.name == "hub"));
        assert!(got.iter().all(|e| e.source.origin_identifier.starts_with("127.0.0.1:")));
        assert_ne!(got[0].source.origin_identifier, got[1].source.origin_identifier);

        producer.stop();
        assert!(collect(rx).await.is_empty());
        assert!(!producer.healthy());
    }

    #[tokio::test]
    async fn test_listen_on_busy_port_is_unhealthy() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let producer = StreamProducer::new(
            StreamFormat::Sbs1,
            StreamInput::Listen { addr },
            FrameSource::default(),
        );
        assert!(collect(producer.listen()).await.is_empty());
        assert!(!producer.healthy());
    }

    #[tokio::test]
    async fn test_fetch_with_keep_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            conn.write_all(b"MSG,1,1,1,4840D6,1,,,,,KLM1023,,,,,,,,,,,\r\n")
                .await
                .unwrap();
            let mut sink = [0u8; 16];
            let _ = conn.read(&mut sink).await;
        });

        let producer = StreamProducer::with_options(
            StreamFormat::Sbs1,
            StreamInput::Fetch {
                host: "127.0.0.1".into(),
                port,
            },
            FrameSource::new("feed", "live"),
            StreamOptions {
                keep_alive: Some(KeepAlive {
                    every: Duration::from_millis(20),
                    lifetime: Duration::from_secs(10),
                }),
                ..StreamOptions::default()
            },
        );
        let rx = producer.listen();
        let mut tags = Vec::new();
        for _ in 0..3 {
            let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(ev.frame.icao(), Some([0x48, 0x40, 0xD6]));
            tags.push(ev.source.tag.clone());
        }
        assert_eq!(tags, vec!["live", "repeat", "repeat"]);

        producer.stop();
        assert!(tokio::time::timeout(Duration::from_secs(5), async {
            while rx.recv_async().await.is_ok() {}
        })
        .await
        .is_ok());
    }
}
