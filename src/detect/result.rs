//! Detection response schema and per-frame interpretation.
//!
//! The service answers in the DeepStack / CodeProject.AI shape:
//!
//! ```json
//! { "success": true, "predictions": [ { "label": "person", "confidence": 0.91,
//!   "x_min": 10, "y_min": 20, "x_max": 200, "y_max": 380 } ] }
//! ```
//!
//! An empty body, `null`, `[]`, or an object without `predictions` carries no usable
//! signal and is `Inconclusive`. A prediction list decides the frame even when
//! `success` is false; the flag only explains a missing list.

use serde::Deserialize;

use super::error::{ServiceError, ServiceResult};

/// Outcome of classifying one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameResult {
    ObjectFound,
    ObjectNotFound,
    /// The service returned no usable prediction list.
    Inconclusive,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Prediction {
    pub label: String,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub x_min: Option<i64>,
    #[serde(default)]
    pub y_min: Option<i64>,
    #[serde(default)]
    pub x_max: Option<i64>,
    #[serde(default)]
    pub y_max: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct DetectionResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub predictions: Option<Vec<Prediction>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Null(()),
    List(Vec<serde_json::Value>),
    Object(DetectionResponse),
}

/// Parse a raw response body. `Ok(None)` means the payload was empty.
pub fn parse_response(body: &[u8]) -> ServiceResult<Option<DetectionResponse>> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    match serde_json::from_slice::<Payload>(body)? {
        Payload::Null(()) => Ok(None),
        Payload::List(items) if items.is_empty() => Ok(None),
        Payload::List(items) => Err(ServiceError::Malformed(format!(
            "expected an object, got an array of {} items",
            items.len()
        ))),
        Payload::Object(response) => Ok(Some(response)),
    }
}

/// Map a parsed response to a frame result for `target_label`.
pub fn interpret(response: Option<&DetectionResponse>, target_label: &str) -> FrameResult {
    let Some(response) = response else {
        return FrameResult::Inconclusive;
    };
    match &response.predictions {
        None => {
            if response.success == Some(false) {
                log::warn!(
                    "detection service reported failure: {}",
                    response.error.as_deref().unwrap_or("no error message")
                );
            }
            FrameResult::Inconclusive
        }
        Some(predictions) if predictions.iter().any(|p| p.label == target_label) => {
            FrameResult::ObjectFound
        }
        Some(_) => FrameResult::ObjectNotFound,
    }
}
