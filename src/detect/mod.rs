//! Per-frame classification against a remote object-detection service.

mod backend;
mod client;
mod error;
mod result;

pub use backend::{Classifier, DEFAULT_MIN_CONFIDENCE, DEFAULT_TARGET_LABEL};
pub use client::{DetectionClientConfig, HttpDetectionClient, DEFAULT_REQUEST_TIMEOUT};
pub use error::{ServiceError, ServiceResult};
pub use result::{interpret, parse_response, DetectionResponse, FrameResult, Prediction};
