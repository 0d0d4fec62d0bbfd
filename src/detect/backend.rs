use std::time::Duration;

use crate::frame::Frame;

use super::error::ServiceResult;
use super::result::FrameResult;

/// Default minimum confidence submitted with every classification request.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Label whose presence makes a frame `ObjectFound`.
pub const DEFAULT_TARGET_LABEL: &str = "person";

/// Classifies single frames.
///
/// Implementations hold no state across calls; every call stands on its own.
pub trait Classifier {
    /// Backend identifier (for logs).
    fn name(&self) -> &str;

    /// Classify one frame, asking the backend to drop predictions below `min_confidence`.
    fn classify(&self, frame: &Frame, min_confidence: f32) -> ServiceResult<FrameResult>;

    /// Like `classify`, but the call must finish within `timeout` when one is given.
    fn classify_within(
        &self,
        frame: &Frame,
        min_confidence: f32,
        timeout: Option<Duration>,
    ) -> ServiceResult<FrameResult> {
        let _ = timeout;
        self.classify(frame, min_confidence)
    }
}

impl<C: Classifier + ?Sized> Classifier for &C {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn classify(&self, frame: &Frame, min_confidence: f32) -> ServiceResult<FrameResult> {
        (**self).classify(frame, min_confidence)
    }

    fn classify_within(
        &self,
        frame: &Frame,
        min_confidence: f32,
        timeout: Option<Duration>,
    ) -> ServiceResult<FrameResult> {
        (**self).classify_within(frame, min_confidence, timeout)
    }
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn classify(&self, frame: &Frame, min_confidence: f32) -> ServiceResult<FrameResult> {
        (**self).classify(frame, min_confidence)
    }

    fn classify_within(
        &self,
        frame: &Frame,
        min_confidence: f32,
        timeout: Option<Duration>,
    ) -> ServiceResult<FrameResult> {
        (**self).classify_within(frame, min_confidence, timeout)
    }
}

impl<C: Classifier + ?Sized> Classifier for std::sync::Arc<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn classify(&self, frame: &Frame, min_confidence: f32) -> ServiceResult<FrameResult> {
        (**self).classify(frame, min_confidence)
    }

    fn classify_within(
        &self,
        frame: &Frame,
        min_confidence: f32,
        timeout: Option<Duration>,
    ) -> ServiceResult<FrameResult> {
        (**self).classify_within(frame, min_confidence, timeout)
    }
}
