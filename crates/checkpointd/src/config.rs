use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use checkpoint_core::LoopConfig;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("CHECKPOINT_EXTRACTOR_CMD is empty")]
    EmptyExtractorCommand,
    #[error("unknown bus {0:?} (expected \"session\" or \"system\")")]
    UnknownBus(String),
}

/// Which D-Bus bus the control interface is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            other => Err(ConfigError::UnknownBus(other.to_string())),
        }
    }
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path, or `file:<path>` for a snapshot file (default: /dev/video0).
    pub video_source: String,
    /// Extractor helper program and arguments.
    pub extractor_command: Vec<String>,
    /// Registry TOML file.
    pub registry_path: PathBuf,
    /// Scratch directory for frames handed to the helper.
    pub runtime_dir: PathBuf,
    pub bus: String,
    /// Euclidean distance below which a match is actionable.
    pub match_threshold: f32,
    pub hold_ms: u64,
    pub extraction_timeout_ms: u64,
}

impl Config {
    /// Load configuration from `CHECKPOINT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let config_dir = lookup("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".config")
            })
            .join("checkpoint");

        let runtime_dir = lookup("CHECKPOINT_RUNTIME_DIR")
            .or_else(|| lookup("XDG_RUNTIME_DIR").map(|d| format!("{d}/checkpoint")))
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("checkpoint"));

        let defaults = LoopConfig::default();

        Self {
            video_source: lookup("CHECKPOINT_VIDEO_SOURCE").unwrap_or_else(|| "/dev/video0".to_string()),
            extractor_command: lookup("CHECKPOINT_EXTRACTOR_CMD")
                .unwrap_or_else(|| "checkpoint-extractor".to_string())
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            registry_path: lookup("CHECKPOINT_REGISTRY")
                .map(PathBuf::from)
                .unwrap_or_else(|| config_dir.join("registry.toml")),
            runtime_dir,
            bus: lookup("CHECKPOINT_BUS").unwrap_or_else(|| "session".to_string()),
            match_threshold: parse_or(&lookup, "CHECKPOINT_MATCH_THRESHOLD", defaults.match_threshold),
            hold_ms: parse_or(&lookup, "CHECKPOINT_HOLD_MS", defaults.hold_duration.as_millis() as u64),
            extraction_timeout_ms: parse_or(
                &lookup,
                "CHECKPOINT_EXTRACTION_TIMEOUT_MS",
                defaults.extraction_timeout.as_millis() as u64,
            ),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_threshold > 0.0) {
            return Err(ConfigError::NotPositive("CHECKPOINT_MATCH_THRESHOLD"));
        }
        if self.hold_ms == 0 {
            return Err(ConfigError::NotPositive("CHECKPOINT_HOLD_MS"));
        }
        if self.extraction_timeout_ms == 0 {
            return Err(ConfigError::NotPositive("CHECKPOINT_EXTRACTION_TIMEOUT_MS"));
        }
        if self.extractor_command.is_empty() {
            return Err(ConfigError::EmptyExtractorCommand);
        }
        self.bus_kind()?;
        Ok(())
    }

    pub fn bus_kind(&self) -> Result<BusKind, ConfigError> {
        self.bus.parse()
    }

    /// Detection loop parameters; everything not overridable keeps its default.
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            match_threshold: self.match_threshold,
            hold_duration: Duration::from_millis(self.hold_ms),
            extraction_timeout: Duration::from_millis(self.extraction_timeout_ms),
            ..LoopConfig::default()
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable value; using default");
            default
        }),
        None => default,
    }
}
