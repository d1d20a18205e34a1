use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnifferError};
use crate::scheduler::{SchedulerConfig, Stage, FIRST_CHANNEL, LAST_CHANNEL};
use crate::session::{SessionSettings, TargetFilter};
use crate::writer::{WriterConfig, RECORD_HEADER_LEN};

pub const CAPTURE_DIR: &str = "handshake";
pub const PMKID_FILE: &str = "pmkid.txt";
pub const SUMMARY_FILE: &str = "session.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture interface; auto-detected when unset.
    pub interface: Option<String>,
    pub output_dir: PathBuf,
    /// Also record every received frame to a per-session capture file.
    pub capture_all: bool,
    pub max_clients: usize,
    pub target: TargetFilter,
    pub schedule: SchedulerConfig,
    pub writer: WriterConfig,
    /// Frames buffered between the capture thread and the session.
    pub queue_depth: usize,
    pub tick_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interface: None,
            output_dir: PathBuf::from("."),
            capture_all: false,
            max_clients: 32,
            target: TargetFilter::default(),
            schedule: SchedulerConfig::default(),
            writer: WriterConfig::default(),
            queue_depth: 1024,
            tick_ms: 100,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| SnifferError::Config(format!("Cannot open {}: {}", path.display(), e)))?;
        let config = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    /// Builds the configuration from `<program> [interface] [--config path]`.
    /// File settings are applied first; a positional interface overrides them.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut interface = None;
        let mut config_path = None;

        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = iter
                        .next()
                        .ok_or_else(|| SnifferError::Config("--config needs a path".into()))?;
                    config_path = Some(PathBuf::from(path));
                }
                flag if flag.starts_with('-') => {
                    return Err(SnifferError::Config(format!("Unknown option {}", flag)));
                }
                name => {
                    if interface.replace(name.to_string()).is_some() {
                        return Err(SnifferError::Config("More than one interface given".into()));
                    }
                }
            }
        }

        let mut config = match config_path {
            Some(path) => Config::from_file(&path)?,
            None => Config::default(),
        };
        if interface.is_some() {
            config.interface = interface;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.schedule;
        if !(FIRST_CHANNEL..=LAST_CHANNEL).contains(&s.start_channel) {
            return Err(SnifferError::Config(format!(
                "start_channel {} outside {}..{}",
                s.start_channel, FIRST_CHANNEL, LAST_CHANNEL
            )));
        }
        if s.start_stage == Stage::Done {
            return Err(SnifferError::Config("start_stage cannot be done".into()));
        }

        let intervals = [
            ("scan_hop_interval_ms", s.scan_hop_interval_ms),
            ("deauth_hop_interval_ms", s.deauth_hop_interval_ms),
            ("deauth_interval_ms", s.deauth_interval_ms),
            ("capture_hop_interval_ms", s.capture_hop_interval_ms),
            ("tick_ms", self.tick_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(SnifferError::Config(format!("{} must be greater than zero", name)));
        }

        if !(self.writer.high_water > 0.0 && self.writer.high_water <= 1.0) {
            return Err(SnifferError::Config(format!(
                "high_water {} outside (0, 1]",
                self.writer.high_water
            )));
        }
        if self.writer.capacity <= RECORD_HEADER_LEN {
            return Err(SnifferError::Config("writer capacity too small".into()));
        }
        if self.writer.max_attempts == 0 {
            return Err(SnifferError::Config("max_attempts must be at least 1".into()));
        }
        if self.queue_depth == 0 {
            return Err(SnifferError::Config("queue_depth must be greater than zero".into()));
        }
        Ok(())
    }

    /// Session file layout relative to the output directory. `started` names
    /// the all-traffic capture.
    pub fn session_settings(&self, started: DateTime<Local>) -> SessionSettings {
        let capture_dir = PathBuf::from(CAPTURE_DIR);
        let traffic_file = self
            .capture_all
            .then(|| capture_dir.join(format!("{}.pcap", started.format("%Y%m%d-%H%M%S"))));

        SessionSettings {
            filter: self.target.clone(),
            capture_dir,
            traffic_file,
            pmkid_file: PathBuf::from(PMKID_FILE),
            writer: self.writer.clone(),
            max_clients: self.max_clients,
        }
    }
}
