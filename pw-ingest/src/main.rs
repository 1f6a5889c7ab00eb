//! pw-ingest: track aircraft from Beast, AVR and SBS1 feeds.
//!
//! Sources are given as `FORMAT://HOST[:PORT]` for a live TCP feed,
//! `FORMAT+listen://[HOST][:PORT]` to accept feeders, or
//! `FORMAT+file://PATH` for a capture file (`.gz` and `.bz2` included).
//! Plane events go to stdout as JSON lines, or to the log.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pw_core::config::{self, Config, ReceiverConfig};
use pw_core::frame::FrameSource;
use pw_tracker::{
    parse_source, IcaoFilter, KeepAlive, LogSink, StreamOptions, StreamProducer, Tracker,
    TrackerError, TrackerOptions,
};

mod output;

#[derive(Parser)]
#[command(
    name = "pw-ingest",
    version,
    about = "Track aircraft from Beast, AVR and SBS1 feeds"
)]
struct Cli {
    /// Config file (default: ~/.planewatch/config.yaml)
    #[arg(short, long, global = true, env = "PW_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track aircraft from one or more sources
    Track(TrackArgs),
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[derive(clap::Args)]
struct TrackArgs {
    /// beast://host:30005, sbs1://host:30003, avr+file://capture.txt.gz,
    /// beast+listen://:30105, ...
    #[arg(required = true)]
    sources: Vec<String>,

    /// Receiver name stamped on every frame
    #[arg(long, env = "PW_RECEIVER_NAME")]
    name: Option<String>,

    /// Free-form source tag
    #[arg(long)]
    tag: Option<String>,

    /// Receiver latitude, used to resolve single CPR fragments
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    /// Receiver longitude
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// Number of decode workers
    #[arg(long)]
    workers: Option<usize>,

    /// Drop residual-address frames for aircraft not recently confirmed
    #[arg(long)]
    filter_icao: bool,

    /// Replay Beast captures at the speed they were recorded
    #[arg(long)]
    replay_pacing: bool,

    /// Re-send each aircraft's newest frame every 30s for an hour, so
    /// sparse feeds keep it tracked
    #[arg(long)]
    keep_alive: bool,

    #[arg(long, value_enum, default_value_t = OutputMode::Json)]
    output: OutputMode,
}

impl TrackArgs {
    fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            replay_pacing: self.replay_pacing,
            keep_alive: self.keep_alive.then(KeepAlive::default),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputMode {
    /// One JSON object per plane event on stdout
    Json,
    /// Plane events in the log only
    Log,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => match config::load_config_from(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => config::load_config(),
    };
    init_logging(&cfg.logging.level, cli.verbose);

    let result = match cli.command {
        Commands::Track(args) => cmd_track(cfg, args).await,
        Commands::InitConfig { force } => cmd_init_config(cli.config, force),
        Commands::ShowConfig => {
            print!("{}", config::serialize_config(&cfg));
            Ok(())
        }
    };

    if let Err(e) = result {
        error!(error = %e, "exiting");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(level: &str, verbose: bool) {
    let default = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Receiver identity from config, with command line overrides.
fn frame_source(receiver: &ReceiverConfig, args: &TrackArgs) -> FrameSource {
    let name = args.name.clone().unwrap_or_else(|| receiver.name.clone());
    let tag = args.tag.clone().unwrap_or_else(|| receiver.tag.clone());
    let source = FrameSource::new(name, tag);
    match args.lat.zip(args.lon).or_else(|| receiver.reference()) {
        Some((lat, lon)) => source.with_reference(lat, lon),
        None => source,
    }
}

async fn cmd_track(cfg: Config, args: TrackArgs) -> Result<(), TrackerError> {
    let source = frame_source(&cfg.receiver, &args);
    let mut opts = TrackerOptions::from(&cfg.tracker);
    if let Some(workers) = args.workers {
        opts.workers = workers;
    }

    // validate every source before anything starts
    let options = args.stream_options();
    let producers = args
        .sources
        .iter()
        .map(|s| {
            let (format, input) = parse_source(s)?;
            Ok(StreamProducer::with_options(format, input, source.clone(), options))
        })
        .collect::<Result<Vec<_>, TrackerError>>()?;

    let tracker = Tracker::new(opts);
    if args.filter_icao {
        tracker.add_middleware(Arc::new(IcaoFilter::default())).await?;
    }
    match args.output {
        OutputMode::Json => tracker.add_sink(Arc::new(output::JsonSink::stdout())),
        OutputMode::Log => tracker.add_sink(Arc::new(LogSink)),
    }
    for producer in producers {
        tracker.add_producer(Arc::new(producer)).await?;
    }

    tokio::select! {
        _ = tracker.wait() => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "cannot listen for ctrl-c");
            }
            info!("interrupted");
        }
    }
    // also finishes a shutdown that wait() had started when interrupted
    tracker.stop().await;

    let stats = tracker.stats();
    info!(
        frames = stats.frames,
        decode_failures = stats.decode_failures,
        vetoed = stats.vetoed,
        events = stats.events,
        "done"
    );
    Ok(())
}

fn cmd_init_config(path: Option<PathBuf>, force: bool) -> Result<(), TrackerError> {
    let path = path.unwrap_or_else(config::config_file);
    if path.exists() && !force {
        eprintln!("{} already exists (use --force to overwrite)", path.display());
        return Ok(());
    }
    config::save_config_to(&path, &Config::default())?;
    eprintln!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_track_args() {
        let cli = Cli::try_parse_from([
            "pw-ingest",
            "track",
            "--lat",
            "-31.95",
            "--lon",
            "115.86",
            "--output",
            "log",
            "beast://localhost",
            "sbs1+file:///tmp/a.sbs",
        ])
        .unwrap();
        let Commands::Track(args) = cli.command else {
            panic!("expected track");
        };
        assert_eq!(args.sources.len(), 2);
        assert_eq!(args.output, OutputMode::Log);

        let source = frame_source(&Config::default().receiver, &args);
        assert_eq!(source.name, "default");
        assert_eq!(source.reference(), Some((-31.95, 115.86)));
    }

    #[test]
    fn test_stream_options() {
        let cli = Cli::try_parse_from(["pw-ingest", "track", "beast+file://a.bin"]).unwrap();
        let Commands::Track(args) = cli.command else {
            panic!("expected track");
        };
        assert_eq!(args.stream_options(), StreamOptions::default());

        let cli = Cli::try_parse_from([
            "pw-ingest",
            "track",
            "--replay-pacing",
            "--keep-alive",
            "beast+file://a.bin",
        ])
        .unwrap();
        let Commands::Track(args) = cli.command else {
            panic!("expected track");
        };
        let options = args.stream_options();
        assert!(options.replay_pacing);
        assert_eq!(options.keep_alive, Some(KeepAlive::default()));
    }

    #[test]
    fn test_lat_requires_lon() {
        assert!(Cli::try_parse_from(["pw-ingest", "track", "--lat", "1.0", "beast://h"]).is_err());
        assert!(Cli::try_parse_from(["pw-ingest", "track"]).is_err());
    }

    #[test]
    fn test_frame_source_from_config() {
        let mut receiver = Config::default().receiver;
        receiver.name = "perth".into();
        receiver.lat = Some(-31.9);
        receiver.lon = Some(115.9);
        let cli = Cli::try_parse_from(["pw-ingest", "track", "--tag", "roof", "avr://h"]).unwrap();
        let Commands::Track(args) = cli.command else {
            panic!("expected track");
        };
        let source = frame_source(&receiver, &args);
        assert_eq!(source.name, "perth");
        assert_eq!(source.tag, "roof");
        assert_eq!(source.reference(), Some((-31.9, 115.9)));
    }
}
