use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.5;
pub const DEFAULT_WORKER_SLEEP_INTERVAL_SECS: f64 = 0.1;
pub const DEFAULT_RECONNECT_DELAY_SECS: f64 = 5.0;
pub const DEFAULT_READ_PAUSE_MS: u64 = 10;
pub const DEFAULT_DETECTION_CONFIDENCE: f64 = 0.5;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which face-location model the live stage and enrollment use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionModel {
    Blazeface,
    Yolo,
}

impl std::fmt::Display for DetectionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionModel::Blazeface => write!(f, "blazeface"),
            DetectionModel::Yolo => write!(f, "yolo"),
        }
    }
}

impl std::str::FromStr for DetectionModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blazeface" => Ok(DetectionModel::Blazeface),
            "yolo" => Ok(DetectionModel::Yolo),
            other => Err(format!(
                "detection model must be 'blazeface' or 'yolo', got '{other}'"
            )),
        }
    }
}

/// How the stream receiver talks to the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamBackend {
    /// Built-in multipart/x-mixed-replace JPEG reader.
    Mjpeg,
    /// libavformat demuxer; requires the `ffmpeg` feature.
    Ffmpeg,
}

impl std::str::FromStr for StreamBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mjpeg" => Ok(StreamBackend::Mjpeg),
            "ffmpeg" => Ok(StreamBackend::Ffmpeg),
            other => Err(format!(
                "stream backend must be 'mjpeg' or 'ffmpeg', got '{other}'"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub api_base_url: String,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
}

fn default_camera_width() -> u32 {
    640
}

fn default_camera_height() -> u32 {
    480
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacewatchConfig {
    pub stream_url: String,
    pub stream_backend: StreamBackend,
    pub reconnect_delay_secs: f64,
    pub read_pause_ms: u64,
    pub face_data_dir: PathBuf,
    pub model_dir: Option<PathBuf>,
    pub detection_model: DetectionModel,
    pub detection_confidence: f64,
    pub worker_sleep_interval_secs: f64,
    pub face_match_threshold: f64,
    pub camera: Option<CameraConfig>,
}

impl Default for FacewatchConfig {
    fn default() -> Self {
        Self {
            stream_url: String::new(),
            stream_backend: StreamBackend::Mjpeg,
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECS,
            read_pause_ms: DEFAULT_READ_PAUSE_MS,
            face_data_dir: PathBuf::from("data/people"),
            model_dir: None,
            detection_model: DetectionModel::Yolo,
            detection_confidence: DEFAULT_DETECTION_CONFIDENCE,
            worker_sleep_interval_secs: DEFAULT_WORKER_SLEEP_INTERVAL_SECS,
            face_match_threshold: DEFAULT_MATCH_THRESHOLD,
            camera: None,
        }
    }
}

impl FacewatchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_url.trim().is_empty() {
            return Err(ConfigError::Invalid("stream url must be set".into()));
        }
        // Cosine distance never exceeds 2.
        if !(self.face_match_threshold > 0.0 && self.face_match_threshold <= 2.0) {
            return Err(ConfigError::Invalid(format!(
                "match threshold must be in (0, 2], got {}",
                self.face_match_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.detection_confidence) {
            return Err(ConfigError::Invalid(format!(
                "detection confidence must be between 0.0 and 1.0, got {}",
                self.detection_confidence
            )));
        }
        for (name, value) in [
            ("worker sleep interval", self.worker_sleep_interval_secs),
            ("reconnect delay", self.reconnect_delay_secs),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a positive number of seconds, got {value}"
                )));
            }
        }
        if self.stream_backend == StreamBackend::Ffmpeg && !cfg!(feature = "ffmpeg") {
            return Err(ConfigError::Invalid(
                "ffmpeg stream backend requires building with the `ffmpeg` feature".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.worker_sleep_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_delay_secs)
    }

    pub fn read_pause(&self) -> Duration {
        Duration::from_millis(self.read_pause_ms)
    }
}
