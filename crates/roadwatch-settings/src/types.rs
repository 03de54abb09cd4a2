//! Settings types. Every section has compiled defaults so a partial
//! settings file only needs the keys it changes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadwatchSettings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub detector: DetectorSettings,
    pub labels: LabelSettings,
    pub logging: LoggingSettings,
}

impl RoadwatchSettings {
    /// Reject values that would make the server misbehave rather than fail.
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.session.jpeg_quality) {
            return Err(SettingsError::InvalidValue(format!(
                "session.jpeg_quality must be 1..=100, got {}",
                self.session.jpeg_quality
            )));
        }
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.max_send_queue must be at least 1".into(),
            ));
        }
        if self.labels.vocabulary.is_empty() {
            return Err(SettingsError::InvalidValue(
                "labels.vocabulary must not be empty".into(),
            ));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(SettingsError::InvalidValue(format!(
                "detector.input_size must be a positive multiple of 32, got {}",
                self.detector.input_size
            )));
        }
        Ok(())
    }
}

/// HTTP/WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// Directory holding uploaded videos while their session lives.
    pub upload_dir: PathBuf,
    /// Request body limit for uploads; `None` disables the limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_upload_bytes: Option<usize>,
    /// Outbound frame queue per connection.
    pub max_send_queue: usize,
    /// Interval between server pings.
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            upload_dir: std::env::temp_dir().join("roadwatch"),
            max_upload_bytes: None,
            max_send_queue: 32,
            heartbeat_interval_secs: 30,
        }
    }
}

impl ServerSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

/// Per-session streaming behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Delay inserted between processed frames.
    pub pacing_ms: u64,
    /// How long a socket may stay silent before its start message.
    pub start_timeout_secs: u64,
    /// Uploads never attached to a socket are deleted after this long.
    pub upload_ttl_secs: u64,
    /// How often the idle-upload reaper runs; `0` disables it.
    pub reaper_interval_secs: u64,
    /// Upper bound on waiting for session tasks during shutdown.
    pub shutdown_timeout_secs: u64,
    /// JPEG quality of annotated frames (1-100).
    pub jpeg_quality: u8,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pacing_ms: 300,
            start_timeout_secs: 30,
            upload_ttl_secs: 600,
            reaper_interval_secs: 60,
            shutdown_timeout_secs: 10,
            jpeg_quality: 80,
        }
    }
}

impl SessionSettings {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn upload_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_ttl_secs)
    }

    pub fn reaper_interval(&self) -> Option<Duration> {
        (self.reaper_interval_secs > 0).then(|| Duration::from_secs(self.reaper_interval_secs))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Detector model and frame decoder settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// ONNX model file (YOLOv8 export).
    pub model_path: PathBuf,
    /// Square model input size in pixels.
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Class names by model output index; `None` uses COCO-80.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_names: Option<Vec<String>>,
    /// ffmpeg binary; `None` resolves `ffmpeg` on PATH.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("yolov8n.onnx"),
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            class_names: None,
            ffmpeg_path: None,
        }
    }
}

/// Labels counted per frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSettings {
    pub vocabulary: Vec<String>,
    /// Detector class name -> vocabulary label.
    pub aliases: BTreeMap<String, String>,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            vocabulary: ["car", "person", "truck", "bus", "motorbike", "ambulance"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            aliases: BTreeMap::new(),
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging settings. `RUST_LOG`, when set, wins over `level` and
/// `module_levels`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
    /// Per-module overrides, e.g. `{"roadwatch_vision": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            module_levels: BTreeMap::new(),
        }
    }
}
