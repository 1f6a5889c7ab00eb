//! Configuration file management for planewatch.
//!
//! Reads/writes `~/.planewatch/config.yaml` with the receiver identity and
//! reference position, tracker tuning and the default log level. The file
//! is a flat two-level YAML subset parsed by hand.

use std::path::{Path, PathBuf};

use crate::types::PwError;

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub receiver: ReceiverConfig,
    pub tracker: TrackerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    pub name: String,
    pub tag: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub prune_tick_secs: u64,
    pub prune_after_secs: u64,
    /// Planes last seen on the ground are forgotten sooner.
    pub ground_prune_after_secs: u64,
    pub recent_frames: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            receiver: ReceiverConfig {
                name: "default".into(),
                tag: "default".into(),
                lat: None,
                lon: None,
            },
            tracker: TrackerConfig::default(),
            logging: LoggingConfig {
                level: "info".into(),
            },
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            workers: 5,
            queue_depth: 1000,
            prune_tick_secs: 10,
            prune_after_secs: 300,
            ground_prune_after_secs: 120,
            recent_frames: 20,
        }
    }
}

impl ReceiverConfig {
    /// Reference position, when both halves are configured.
    pub fn reference(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lon)
    }
}

/// Get the config directory path (`~/.planewatch/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".planewatch")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.planewatch/config.yaml`.
///
/// Returns the default config if the file is missing or unreadable.
pub fn load_config() -> Config {
    let path = config_file();
    if !path.exists() {
        return Config::default();
    }
    load_config_from(&path).unwrap_or_default()
}

/// Load config from an explicit path. Unlike [`load_config`] this reports
/// missing files and bad values.
pub fn load_config_from(path: &Path) -> Result<Config, PwError> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Save config to `~/.planewatch/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, PwError> {
    let path = config_file();
    save_config_to(&path, config)?;
    Ok(path)
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<(), PwError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| PwError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| PwError::Config(e.to_string()))
}

/// Parse simple YAML-like config text. Unknown keys are ignored.
pub fn parse_config(text: &str) -> Result<Config, PwError> {
    let mut config = Config::default();
    let mut current_section: Option<&str> = None;

    for (lineno, line) in text.lines().enumerate() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then_some(key);
            continue;
        }
        let bad = |what: &str| PwError::Config(format!("line {}: bad {what} {val:?}", lineno + 1));

        match (current_section, key) {
            (Some("receiver"), "name") => {
                if let Some(v) = parse_string_value(val) {
                    config.receiver.name = v;
                }
            }
            (Some("receiver"), "tag") => {
                if let Some(v) = parse_string_value(val) {
                    config.receiver.tag = v;
                }
            }
            (Some("receiver"), "lat") => {
                config.receiver.lat = parse_float_value(val).map_err(|_| bad("latitude"))?;
            }
            (Some("receiver"), "lon") => {
                config.receiver.lon = parse_float_value(val).map_err(|_| bad("longitude"))?;
            }
            (Some("tracker"), "workers") => {
                config.tracker.workers = val.parse().map_err(|_| bad("worker count"))?;
            }
            (Some("tracker"), "queue_depth") => {
                config.tracker.queue_depth = val.parse().map_err(|_| bad("queue depth"))?;
            }
            (Some("tracker"), "prune_tick_secs") => {
                config.tracker.prune_tick_secs = val.parse().map_err(|_| bad("duration"))?;
            }
            (Some("tracker"), "prune_after_secs") => {
                config.tracker.prune_after_secs = val.parse().map_err(|_| bad("duration"))?;
            }
            (Some("tracker"), "ground_prune_after_secs") => {
                config.tracker.ground_prune_after_secs =
                    val.parse().map_err(|_| bad("duration"))?;
            }
            (Some("tracker"), "recent_frames") => {
                config.tracker.recent_frames = val.parse().map_err(|_| bad("frame count"))?;
            }
            (Some("logging"), "level") => {
                if let Some(v) = parse_string_value(val) {
                    config.logging.level = v;
                }
            }
            _ => {}
        }
    }

    Ok(config)
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    if val == "null" || val == "~" || val.is_empty() {
        return Ok(None);
    }
    val.parse().map(Some)
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let opt = |v: Option<f64>| v.map_or_else(|| "null".to_string(), |v| v.to_string());
    let r = &config.receiver;
    let t = &config.tracker;

    let lines = [
        "# planewatch configuration".to_string(),
        String::new(),
        "receiver:".into(),
        format!("  name: \"{}\"", r.name),
        format!("  tag: \"{}\"", r.tag),
        format!("  lat: {}", opt(r.lat)),
        format!("  lon: {}", opt(r.lon)),
        String::new(),
        "tracker:".into(),
        format!("  workers: {}", t.workers),
        format!("  queue_depth: {}", t.queue_depth),
        format!("  prune_tick_secs: {}", t.prune_tick_secs),
        format!("  prune_after_secs: {}", t.prune_after_secs),
        format!("  ground_prune_after_secs: {}", t.ground_prune_after_secs),
        format!("  recent_frames: {}", t.recent_frames),
        String::new(),
        "logging:".into(),
        format!("  level: \"{}\"", config.logging.level),
    ];
    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
