//! Camera presence sensor
//!
//! This crate decides whether a target object (by default a person) is visible to a
//! camera by classifying frames with a remote object-detection service, and exposes
//! the debounced answer as a binary sensor that a host polls on a fixed interval.
//!
//! # Decision rule
//!
//! Each polling cycle opens the camera stream and classifies frames one by one:
//!
//! 1. **Fast positive**: the first frame containing the target decides `Present`.
//! 2. **Debounced negative**: `Absent` requires `not_found_threshold` (default 5)
//!    confident misses; inconclusive frames neither count nor reset.
//! 3. **Bounded**: stream exhaustion ends the cycle as `Absent`; a deadline or a
//!    cancellation ends it as `Unknown`.
//!
//! # Module Structure
//!
//! - `frame`: Decoded RGB frames and JPEG encoding for upload
//! - `ingest`: Frame sources (synthetic, HTTP MJPEG / snapshot, RTSP)
//! - `detect`: Detection service client and response interpretation
//! - `presence`: The per-cycle debounce state machine
//! - `sensor`: Binary sensor entity holding the last known state
//! - `schedule`: Fixed-interval poller
//! - `config`: File and environment configuration

pub mod cancel;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod presence;
pub mod schedule;
pub mod sensor;

pub use cancel::CancelToken;
pub use config::PresenceConfig;
pub use detect::{
    Classifier, DetectionClientConfig, FrameResult, HttpDetectionClient, ServiceError,
};
pub use frame::Frame;
pub use ingest::{CameraSettings, CameraSource, FrameSource, FrameStream, ReadLimit};
pub use presence::{
    EvaluateError, Evaluation, EvaluatorSettings, PresenceEvaluator, PresenceVerdict,
    StopReason,
};
pub use schedule::{PollStats, Poller};
pub use sensor::{PresenceSensor, UpdateOutcome};
