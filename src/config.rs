use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::detect::{
    DetectionClientConfig, DEFAULT_MIN_CONFIDENCE, DEFAULT_REQUEST_TIMEOUT, DEFAULT_TARGET_LABEL,
};
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::ingest::{CameraSettings, DEFAULT_FRAME_TIMEOUT};
use crate::presence::{
    EvaluatorSettings, DEFAULT_EVALUATION_DEADLINE, DEFAULT_NOT_FOUND_THRESHOLD,
};
use crate::schedule::DEFAULT_SCAN_INTERVAL;

const DEFAULT_NAME: &str = "Camera presence";
const DEFAULT_DETECT_URL: &str = "http://127.0.0.1:5000/v1/vision/detection";
const DEFAULT_CAMERA_URL: &str = "stub://camera";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PresenceConfigFile {
    sensor: Option<String>,
    name: Option<String>,
    detect_url: Option<String>,
    camera_url: Option<String>,
    scan_interval_secs: Option<u64>,
    detection: Option<DetectionConfigFile>,
    evaluation: Option<EvaluationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    min_confidence: Option<f32>,
    target_label: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EvaluationConfigFile {
    not_found_threshold: Option<u32>,
    deadline_secs: Option<u64>,
    frame_timeout_secs: Option<u64>,
    hold_on_unknown: Option<bool>,
}

/// Values that take precedence over both the file and the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub sensor: Option<String>,
    pub name: Option<String>,
    pub detect_url: Option<String>,
    pub camera_url: Option<String>,
    pub scan_interval_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Paired host entity, passed through unchanged.
    pub sensor: String,
    pub name: String,
    pub detect_url: String,
    pub camera_url: String,
    pub scan_interval: Duration,
    pub detection: DetectionSettings,
    pub evaluation: EvaluationSettings,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub min_confidence: f32,
    pub target_label: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EvaluationSettings {
    pub not_found_threshold: u32,
    pub deadline: Duration,
    pub frame_timeout: Duration,
    pub hold_on_unknown: bool,
}

impl PresenceConfig {
    /// Load from the file named by `PRESENCE_CONFIG` (if any), then the environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PRESENCE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, &ConfigOverrides::default())
    }

    /// File, then environment, then `overrides` (command-line flags), then validation.
    pub fn load_with(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PresenceConfigFile) -> Self {
        let detection = file.detection.unwrap_or_default();
        let evaluation = file.evaluation.unwrap_or_default();
        Self {
            sensor: file.sensor.unwrap_or_default(),
            name: file.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            detect_url: file
                .detect_url
                .unwrap_or_else(|| DEFAULT_DETECT_URL.to_string()),
            camera_url: file
                .camera_url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            scan_interval: file
                .scan_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SCAN_INTERVAL),
            detection: DetectionSettings {
                min_confidence: detection.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                target_label: detection
                    .target_label
                    .unwrap_or_else(|| DEFAULT_TARGET_LABEL.to_string()),
                request_timeout: detection
                    .request_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            },
            evaluation: EvaluationSettings {
                not_found_threshold: evaluation
                    .not_found_threshold
                    .unwrap_or(DEFAULT_NOT_FOUND_THRESHOLD),
                deadline: evaluation
                    .deadline_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_EVALUATION_DEADLINE),
                frame_timeout: evaluation
                    .frame_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_FRAME_TIMEOUT),
                hold_on_unknown: evaluation.hold_on_unknown.unwrap_or(false),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(sensor) = non_empty_env("PRESENCE_SENSOR") {
            self.sensor = sensor;
        }
        if let Some(name) = non_empty_env("PRESENCE_NAME") {
            self.name = name;
        }
        if let Some(url) = non_empty_env("PRESENCE_DETECT_URL") {
            self.detect_url = url;
        }
        if let Some(url) = non_empty_env("PRESENCE_CAMERA_URL") {
            self.camera_url = url;
        }
        if let Some(interval) = non_empty_env("PRESENCE_SCAN_INTERVAL_SECS") {
            let seconds: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("PRESENCE_SCAN_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.scan_interval = Duration::from_secs(seconds);
        }
        if let Some(confidence) = non_empty_env("PRESENCE_MIN_CONFIDENCE") {
            self.detection.min_confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("PRESENCE_MIN_CONFIDENCE must be a number"))?;
        }
        if let Some(label) = non_empty_env("PRESENCE_TARGET_LABEL") {
            self.detection.target_label = label;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(sensor) = &overrides.sensor {
            self.sensor = sensor.clone();
        }
        if let Some(name) = &overrides.name {
            self.name = name.clone();
        }
        if let Some(url) = &overrides.detect_url {
            self.detect_url = url.clone();
        }
        if let Some(url) = &overrides.camera_url {
            self.camera_url = url.clone();
        }
        if let Some(seconds) = overrides.scan_interval_secs {
            self.scan_interval = Duration::from_secs(seconds);
        }
    }

    fn validate(&mut self) -> Result<()> {
        self.sensor = self.sensor.trim().to_string();
        if self.sensor.is_empty() {
            return Err(anyhow!("sensor must be set"));
        }

        let detect_url = url::Url::parse(&self.detect_url)
            .map_err(|e| anyhow!("detect_url {:?} is not a valid URL: {}", self.detect_url, e))?;
        if !matches!(detect_url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "detect_url must use http or https, got {}",
                detect_url.scheme()
            ));
        }

        if self.camera_url.trim().is_empty() {
            return Err(anyhow!("camera_url must not be empty"));
        }
        if self.detection.target_label.trim().is_empty() {
            return Err(anyhow!("detection.target_label must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(anyhow!(
                "detection.min_confidence must be between 0 and 1, got {}",
                self.detection.min_confidence
            ));
        }
        if self.evaluation.not_found_threshold == 0 {
            return Err(anyhow!("evaluation.not_found_threshold must be at least 1"));
        }

        for (field, value) in [
            ("scan_interval_secs", self.scan_interval),
            ("detection.request_timeout_secs", self.detection.request_timeout),
            ("evaluation.deadline_secs", self.evaluation.deadline),
            ("evaluation.frame_timeout_secs", self.evaluation.frame_timeout),
        ] {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", field));
            }
        }
        if self.evaluation.deadline >= self.scan_interval {
            log::warn!(
                "evaluation deadline {:?} is not shorter than the scan interval {:?}; ticks will be skipped",
                self.evaluation.deadline,
                self.scan_interval
            );
        }
        Ok(())
    }

    pub fn client_config(&self) -> DetectionClientConfig {
        DetectionClientConfig {
            detect_url: self.detect_url.clone(),
            target_label: self.detection.target_label.clone(),
            request_timeout: self.detection.request_timeout,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            frame_timeout: self.evaluation.frame_timeout,
        }
    }

    pub fn evaluator_settings(&self) -> EvaluatorSettings {
        EvaluatorSettings {
            min_confidence: self.detection.min_confidence,
            not_found_threshold: self.evaluation.not_found_threshold,
            deadline: self.evaluation.deadline,
        }
    }
}

fn read_config_file(path: &Path) -> Result<PresenceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
