use crate::session::{ErrorDisplayMode, LoopConfig, RetryPolicy, TriggerMode};
use emoscope_core::{default_model_dir, BundleNames, DetectorOptions};
use emoscope_hw::{FacingMode, StreamRequest};
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{key}={value}: {reason}")]
    Env { key: String, value: String, reason: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration, loaded from an optional TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub models: ModelsConfig,
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub display: DisplayConfig,
}

/// Model bundle location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelsConfig {
    /// Directory holding the bundles (default: `$XDG_DATA_HOME/emoscope/models`).
    pub base_dir: Option<PathBuf>,
    pub detector_bundle: String,
    pub expression_bundle: String,
    /// Extra load attempts after the first failure.
    pub load_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let names = BundleNames::default();
        Self {
            base_dir: None,
            detector_bundle: names.detector,
            expression_bundle: names.expression,
            load_retries: 0,
            retry_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    /// Explicit V4L2 device; overrides `facing`.
    pub device: Option<String>,
    pub facing: FacingMode,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        let request = StreamRequest::default();
        Self {
            device: request.device,
            facing: request.facing,
            width: request.width,
            height: request.height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    pub trigger: TriggerMode,
    pub poll_interval_ms: u64,
    /// Detector working resolution; a multiple of 32.
    pub input_size: u32,
    pub score_threshold: f32,
    pub start_delay_ms: u64,
    /// Abandon a detection call after this long.
    pub timeout_ms: Option<u64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let options = DetectorOptions::default();
        Self {
            trigger: TriggerMode::Interval,
            poll_interval_ms: 500,
            input_size: options.input_size,
            score_threshold: options.score_threshold,
            start_delay_ms: 1000,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    pub mirror: bool,
    pub error_display: ErrorDisplayMode,
    /// Write a composited PNG here after every cycle.
    pub preview_path: Option<PathBuf>,
    /// TTF/OTF font for label text.
    pub font_path: Option<PathBuf>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mirror: true,
            error_display: ErrorDisplayMode::Status,
            preview_path: None,
            font_path: None,
        }
    }
}

impl Config {
    /// Load from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `EMOSCOPE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `EMOSCOPE_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("EMOSCOPE_MODEL_DIR") {
            self.models.base_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("EMOSCOPE_LOAD_RETRIES") {
            self.models.load_retries = parse_value("EMOSCOPE_LOAD_RETRIES", &v)?;
        }
        if let Some(v) = lookup("EMOSCOPE_CAMERA_DEVICE") {
            self.camera.device = Some(v);
        }
        if let Some(v) = lookup("EMOSCOPE_FACING") {
            self.camera.facing = parse_enum("EMOSCOPE_FACING", &v)?;
        }
        if let Some(v) = lookup("EMOSCOPE_TRIGGER") {
            self.detection.trigger = parse_enum("EMOSCOPE_TRIGGER", &v)?;
        }
        if let Some(v) = lookup("EMOSCOPE_POLL_INTERVAL_MS") {
            self.detection.poll_interval_ms = parse_value("EMOSCOPE_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("EMOSCOPE_INPUT_SIZE") {
            self.detection.input_size = parse_value("EMOSCOPE_INPUT_SIZE", &v)?;
        }
        if let Some(v) = lookup("EMOSCOPE_SCORE_THRESHOLD") {
            self.detection.score_threshold = parse_value("EMOSCOPE_SCORE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("EMOSCOPE_MIRROR") {
            self.display.mirror = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Some(v) = lookup("EMOSCOPE_ERROR_DISPLAY") {
            self.display.error_display = parse_enum("EMOSCOPE_ERROR_DISPLAY", &v)?;
        }
        if let Some(v) = lookup("EMOSCOPE_PREVIEW") {
            self.display.preview_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("EMOSCOPE_FONT") {
            self.display.font_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.score_threshold) {
            return Err(ConfigError::Invalid(format!(
                "score_threshold must be within [0, 1], got {}",
                d.score_threshold
            )));
        }
        if d.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if d.input_size == 0 || d.input_size % 32 != 0 {
            return Err(ConfigError::Invalid(format!(
                "input_size must be a positive multiple of 32, got {}",
                d.input_size
            )));
        }
        if d.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        if self.models.detector_bundle.is_empty() || self.models.expression_bundle.is_empty() {
            return Err(ConfigError::Invalid("bundle names must not be empty".into()));
        }
        Ok(())
    }

    pub fn model_dir(&self) -> PathBuf {
        self.models.base_dir.clone().unwrap_or_else(default_model_dir)
    }

    pub fn bundle_names(&self) -> BundleNames {
        BundleNames {
            detector: self.models.detector_bundle.clone(),
            expression: self.models.expression_bundle.clone(),
        }
    }

    pub fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            device: self.camera.device.clone(),
            facing: self.camera.facing,
            width: self.camera.width,
            height: self.camera.height,
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        let d = &self.detection;
        LoopConfig {
            trigger: d.trigger,
            poll_interval: Duration::from_millis(d.poll_interval_ms),
            detector: DetectorOptions {
                input_size: d.input_size,
                score_threshold: d.score_threshold,
            },
            mirror: self.display.mirror,
            error_display: self.display.error_display,
            start_delay: Duration::from_millis(d.start_delay_ms),
            detect_timeout: d.timeout_ms.map(Duration::from_millis),
            retry: RetryPolicy {
                retries: self.models.load_retries,
                backoff: Duration::from_millis(self.models.retry_backoff_ms),
            },
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a lowercase enum name through its serde representation.
fn parse_enum<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, ConfigError> {
    let normalized = raw.trim().to_ascii_lowercase();
    T::deserialize(normalized.into_deserializer()).map_err(|e: serde::de::value::Error| ConfigError::Env {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
