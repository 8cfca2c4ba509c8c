use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use vigil_core::{DistanceMatcher, FrameSampler, MatchPolicy, PipelineConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid SMTP config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// JSON encodings store with the known identities.
    pub gallery_path: PathBuf,
    /// SQLite event log.
    pub db_path: PathBuf,
    /// Directory for face and alert snapshots.
    pub snapshot_dir: PathBuf,
    /// Face encoder helper, split on whitespace into program and arguments.
    pub encoder_command: String,
    /// Frames skipped between full detection cycles.
    pub skip_interval: u64,
    /// Enhance every Nth full cycle (0 disables).
    pub enhance_every: u64,
    /// Maximum Euclidean distance for a candidate match.
    pub tolerance: f32,
    /// Confidence must exceed this to accept a match.
    pub min_confidence: f32,
    /// Minimum time between two delivered alerts.
    pub cooldown_secs: u64,
    /// Scale applied to frames before encoding.
    pub downscale: f64,
    pub match_policy: MatchPolicy,
    /// Capacity of the event log queue.
    pub event_queue: usize,
    /// TOML file with SMTP settings; alerts are not delivered without it.
    pub smtp_config: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `VIGIL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("vigil");

        let path = |key: &str, default: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(default);

        Self {
            camera_device: lookup("VIGIL_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            gallery_path: path("VIGIL_GALLERY_PATH", data_dir.join("encodings.json")),
            db_path: path("VIGIL_DB_PATH", data_dir.join("intruder_log.db")),
            snapshot_dir: path("VIGIL_SNAPSHOT_DIR", data_dir.join("snapshots")),
            encoder_command: lookup("VIGIL_ENCODER_CMD").unwrap_or_else(|| "vigil-encoder".to_string()),
            skip_interval: parse_var(&lookup, "VIGIL_SKIP_INTERVAL").unwrap_or(2),
            enhance_every: parse_var(&lookup, "VIGIL_ENHANCE_EVERY").unwrap_or(10),
            tolerance: parse_var(&lookup, "VIGIL_TOLERANCE").unwrap_or(0.4),
            min_confidence: parse_var(&lookup, "VIGIL_MIN_CONFIDENCE").unwrap_or(0.3),
            cooldown_secs: parse_var(&lookup, "VIGIL_COOLDOWN_SECS").unwrap_or(60),
            downscale: parse_var(&lookup, "VIGIL_DOWNSCALE").unwrap_or(0.25),
            match_policy: parse_var(&lookup, "VIGIL_MATCH_POLICY").unwrap_or_default(),
            event_queue: parse_var(&lookup, "VIGIL_EVENT_QUEUE").unwrap_or(256),
            smtp_config: lookup("VIGIL_SMTP_CONFIG").map(PathBuf::from),
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.downscale.is_nan() || self.downscale <= 0.0 || self.downscale > 1.0 {
            return Err(ConfigError::Invalid {
                key: "VIGIL_DOWNSCALE",
                reason: format!("{} is outside (0, 1]", self.downscale),
            });
        }
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(ConfigError::Invalid {
                key: "VIGIL_TOLERANCE",
                reason: format!("{} is not a non-negative distance", self.tolerance),
            });
        }
        if self.skip_interval == u64::MAX {
            return Err(ConfigError::Invalid {
                key: "VIGIL_SKIP_INTERVAL",
                reason: format!("{} leaves no frame to process", self.skip_interval),
            });
        }
        if self.event_queue == 0 {
            return Err(ConfigError::Invalid {
                key: "VIGIL_EVENT_QUEUE",
                reason: "must be at least 1".into(),
            });
        }
        if self.encoder_command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "VIGIL_ENCODER_CMD",
                reason: "empty command".into(),
            });
        }
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            sampler: FrameSampler::new(self.skip_interval, self.enhance_every),
            matcher: DistanceMatcher::new(self.tolerance, self.min_confidence, self.match_policy),
            downscale: self.downscale,
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

/// SMTP settings for alert e-mail (implicit TLS).
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub sender_email: String,
    pub sender_password: String,
    pub receiver_email: String,
    /// Connect and I/O timeout for one delivery.
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    465
}

fn default_smtp_timeout() -> u64 {
    10
}

impl SmtpConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }
}
