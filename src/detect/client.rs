//! Detection service HTTP client.

use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;

use super::backend::{Classifier, DEFAULT_TARGET_LABEL};
use super::error::{ServiceError, ServiceResult};
use super::result::{interpret, parse_response, FrameResult};
use crate::frame::{Frame, DEFAULT_JPEG_QUALITY};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_ERROR_BODY_CHARS: usize = 256;

/// Configuration for the detection client.
#[derive(Debug, Clone)]
pub struct DetectionClientConfig {
    /// Detection endpoint; frames are POSTed here.
    pub detect_url: String,
    /// Label that counts as "found".
    pub target_label: String,
    /// Bound on one classification request, connect through body.
    pub request_timeout: Duration,
    pub jpeg_quality: u8,
}

impl Default for DetectionClientConfig {
    fn default() -> Self {
        Self {
            detect_url: "http://127.0.0.1:5000/v1/vision/detection".to_string(),
            target_label: DEFAULT_TARGET_LABEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Submits frames to a remote object-detection endpoint as multipart uploads.
pub struct HttpDetectionClient {
    http: Client,
    config: DetectionClientConfig,
}

impl HttpDetectionClient {
    pub fn new(config: DetectionClientConfig) -> ServiceResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ServiceError::Transport)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &DetectionClientConfig {
        &self.config
    }

    fn build_form(jpeg: Vec<u8>, min_confidence: f32) -> ServiceResult<Form> {
        let image = Part::bytes(jpeg)
            .file_name("image.jpg")
            .mime_str("image/jpeg")
            .map_err(ServiceError::Transport)?;
        Ok(Form::new()
            .part("image", image)
            .text("min_confidence", min_confidence.to_string()))
    }
}

impl Classifier for HttpDetectionClient {
    fn name(&self) -> &str {
        "http"
    }

    fn classify(&self, frame: &Frame, min_confidence: f32) -> ServiceResult<FrameResult> {
        self.classify_within(frame, min_confidence, None)
    }

    /// The request timeout is shortened to `timeout` when that is sooner.
    fn classify_within(
        &self,
        frame: &Frame,
        min_confidence: f32,
        timeout: Option<Duration>,
    ) -> ServiceResult<FrameResult> {
        let request_timeout = timeout.map_or(self.config.request_timeout, |timeout| {
            timeout.min(self.config.request_timeout)
        });
        let jpeg = frame
            .encode_jpeg(self.config.jpeg_quality)
            .map_err(|e| ServiceError::Encode(format!("{:#}", e)))?;
        log::debug!(
            "submitting frame {} ({} jpeg bytes) to {}",
            frame.index,
            jpeg.len(),
            self.config.detect_url
        );

        let form = Self::build_form(jpeg, min_confidence)?;
        let response = self
            .http
            .post(&self.config.detect_url)
            .multipart(form)
            .timeout(request_timeout)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let body = response.bytes()?;
        let parsed = parse_response(&body)?;
        Ok(interpret(parsed.as_ref(), &self.config.target_label))
    }
}
