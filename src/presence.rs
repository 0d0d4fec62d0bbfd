//! Debounced presence evaluation.
//!
//! One evaluation opens the camera stream, classifies frames one at a time and stops
//! at the first of:
//! - a frame with the target object (`Present`, no confirmation required)
//! - `not_found_threshold` frames without it (`Absent`)
//! - the end of the stream (`Absent`)
//! - the evaluation deadline or a cancellation request (`Unknown`)
//!
//! Inconclusive frames and failed classification calls neither advance nor reset the
//! debounce counter. The stream is released on every exit path.
//!
//! The deadline and the cancel token are also handed to the stream as a `ReadLimit`,
//! and each classification call is capped to the time left, so a slow camera or a
//! slow service cannot hold a cycle open past its deadline.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cancel::CancelToken;
use crate::detect::{Classifier, FrameResult, DEFAULT_MIN_CONFIDENCE};
use crate::ingest::{FrameSource, ReadLimit, StreamHandle};

/// Consecutive confident misses required before the verdict flips to absent.
pub const DEFAULT_NOT_FOUND_THRESHOLD: u32 = 5;

/// Upper bound on one evaluation, kept below the default scan interval.
pub const DEFAULT_EVALUATION_DEADLINE: Duration = Duration::from_secs(25);

/// Result of one polling cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceVerdict {
    Present,
    Absent,
    /// The cycle was cut short before a confident verdict.
    Unknown,
}

impl PresenceVerdict {
    pub fn is_present(self) -> bool {
        self == PresenceVerdict::Present
    }
}

impl std::fmt::Display for PresenceVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PresenceVerdict::Present => "present",
            PresenceVerdict::Absent => "absent",
            PresenceVerdict::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Why the frame loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Found,
    ThresholdReached,
    StreamEnded,
    DeadlineExceeded,
    Cancelled,
}

impl StopReason {
    pub fn verdict(self) -> PresenceVerdict {
        match self {
            StopReason::Found => PresenceVerdict::Present,
            StopReason::ThresholdReached | StopReason::StreamEnded => PresenceVerdict::Absent,
            StopReason::DeadlineExceeded | StopReason::Cancelled => PresenceVerdict::Unknown,
        }
    }
}

/// Summary of one evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub verdict: PresenceVerdict,
    pub reason: StopReason,
    /// Frames pulled from the stream.
    pub frames: u64,
    pub not_found: u32,
    pub inconclusive: u32,
    /// Classification calls that failed; each also counts as inconclusive.
    pub service_errors: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum EvaluateError {
    #[error("camera source {address} unavailable: {source:#}")]
    SourceUnavailable {
        address: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Clone, Debug)]
pub struct EvaluatorSettings {
    pub min_confidence: f32,
    pub not_found_threshold: u32,
    pub deadline: Duration,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            not_found_threshold: DEFAULT_NOT_FOUND_THRESHOLD,
            deadline: DEFAULT_EVALUATION_DEADLINE,
        }
    }
}

/// Not-found counter local to one evaluation.
#[derive(Clone, Copy, Debug)]
pub struct DebounceCounter {
    count: u32,
    threshold: u32,
}

impl DebounceCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    /// Record a confident miss. Returns true once the threshold is reached.
    pub fn record_not_found(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count >= self.threshold
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Drives a frame source and a classifier to one presence verdict per call.
pub struct PresenceEvaluator<S, C> {
    source: S,
    classifier: C,
    camera_url: String,
    settings: EvaluatorSettings,
}

impl<S: FrameSource, C: Classifier> PresenceEvaluator<S, C> {
    pub fn new(source: S, classifier: C, camera_url: &str, settings: EvaluatorSettings) -> Self {
        Self {
            source,
            classifier,
            camera_url: camera_url.to_string(),
            settings,
        }
    }

    pub fn camera_url(&self) -> &str {
        &self.camera_url
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    pub fn evaluate(&self, cancel: &CancelToken) -> Result<PresenceVerdict, EvaluateError> {
        self.evaluate_with_report(cancel)
            .map(|evaluation| evaluation.verdict)
    }

    pub fn evaluate_with_report(&self, cancel: &CancelToken) -> Result<Evaluation, EvaluateError> {
        let started = Instant::now();
        let limit = ReadLimit::new(started.checked_add(self.settings.deadline), cancel.clone());
        let mut stream =
            StreamHandle::open(&self.source, &self.camera_url, &limit).map_err(|source| {
                EvaluateError::SourceUnavailable {
                    address: self.camera_url.clone(),
                    source,
                }
            })?;

        let mut counter = DebounceCounter::new(self.settings.not_found_threshold);
        let mut inconclusive = 0u32;
        let mut service_errors = 0u32;

        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if started.elapsed() >= self.settings.deadline {
                break self.deadline_exceeded();
            }

            let Some(frame) = stream.next_frame() else {
                // A read cut short by the limit is not the end of the stream.
                if cancel.is_cancelled() {
                    break StopReason::Cancelled;
                }
                if started.elapsed() >= self.settings.deadline {
                    break self.deadline_exceeded();
                }
                break StopReason::StreamEnded;
            };

            let result = match self.classifier.classify_within(
                &frame,
                self.settings.min_confidence,
                limit.remaining(),
            ) {
                Ok(result) => result,
                Err(e) => {
                    service_errors += 1;
                    log::warn!(
                        "frame {}: {} classifier failed, treating as inconclusive: {}",
                        frame.index,
                        self.classifier.name(),
                        e
                    );
                    FrameResult::Inconclusive
                }
            };
            log::debug!(
                "frame {}: {:?} ({} ms since capture)",
                frame.index,
                result,
                frame.age_millis()
            );

            // A result that arrives after cancellation is discarded.
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            match result {
                FrameResult::ObjectFound => {
                    log::info!("frame {}: target present", frame.index);
                    break StopReason::Found;
                }
                FrameResult::ObjectNotFound => {
                    if counter.record_not_found() {
                        log::info!(
                            "frame {}: no target after {} misses",
                            frame.index,
                            counter.count()
                        );
                        break StopReason::ThresholdReached;
                    }
                }
                FrameResult::Inconclusive => {
                    inconclusive += 1;
                    log::info!("frame {}: not recognized", frame.index);
                }
            }
        };

        let frames = stream.frames_read();
        stream.close();

        if reason == StopReason::StreamEnded {
            log::info!(
                "stream {} ended after {} frames without the target",
                self.camera_url,
                frames
            );
        }

        Ok(Evaluation {
            verdict: reason.verdict(),
            reason,
            frames,
            not_found: counter.count(),
            inconclusive,
            service_errors,
            elapsed: started.elapsed(),
        })
    }

    fn deadline_exceeded(&self) -> StopReason {
        log::warn!(
            "evaluation of {} exceeded {:?} deadline",
            self.camera_url,
            self.settings.deadline
        );
        StopReason::DeadlineExceeded
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
