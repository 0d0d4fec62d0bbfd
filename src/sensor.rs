//! Binary presence sensor entity.
//!
//! The sensor owns the last known boolean state. Each update runs one evaluation and
//! maps the verdict onto that state; failures leave it untouched.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::cancel::CancelToken;
use crate::detect::Classifier;
use crate::ingest::FrameSource;
use crate::presence::{PresenceEvaluator, PresenceVerdict};

/// Stable identifier reported by every camera presence sensor.
pub const UNIQUE_ID: &str = "camera_detect";

/// What one call to [`PresenceSensor::update`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Another update was already running.
    Skipped,
    Updated {
        verdict: PresenceVerdict,
        is_on: bool,
        changed: bool,
    },
    /// Verdict was unknown and the sensor is configured to keep its state.
    Held { verdict: PresenceVerdict },
    Failed { error: String },
}

impl UpdateOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, UpdateOutcome::Updated { changed: true, .. })
    }
}

pub struct PresenceSensor<S, C> {
    sensor_id: String,
    name: String,
    evaluator: PresenceEvaluator<S, C>,
    hold_on_unknown: bool,
    is_on: AtomicBool,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the update finishes, panics included.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: FrameSource, C: Classifier> PresenceSensor<S, C> {
    pub fn new(sensor_id: &str, name: &str, evaluator: PresenceEvaluator<S, C>) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            name: name.to_string(),
            evaluator,
            hold_on_unknown: false,
            is_on: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Keep the current state when an evaluation ends without a verdict.
    pub fn with_hold_on_unknown(mut self, hold: bool) -> Self {
        self.hold_on_unknown = hold;
        self
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> &'static str {
        UNIQUE_ID
    }

    pub fn is_on(&self) -> bool {
        self.is_on.load(Ordering::Acquire)
    }

    pub fn state(&self) -> &'static str {
        if self.is_on() {
            "on"
        } else {
            "off"
        }
    }

    pub fn update(&self, cancel: &CancelToken) -> UpdateOutcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            log::debug!("{}: update already in progress, skipping", self.name);
            return UpdateOutcome::Skipped;
        };

        let verdict = match self.evaluator.evaluate(cancel) {
            Ok(verdict) => verdict,
            Err(e) => {
                log::error!(
                    "{} ({}): presence evaluation failed, keeping {}: {}",
                    self.name,
                    self.sensor_id,
                    self.state(),
                    e
                );
                return UpdateOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let next = match verdict {
            PresenceVerdict::Present => true,
            PresenceVerdict::Absent => false,
            PresenceVerdict::Unknown if self.hold_on_unknown => {
                log::info!("{}: no verdict, holding {}", self.name, self.state());
                return UpdateOutcome::Held { verdict };
            }
            PresenceVerdict::Unknown => false,
        };

        let previous = self.is_on.swap(next, Ordering::AcqRel);
        let changed = previous != next;
        if changed {
            log::info!("{}: {} -> {}", self.name, on_off(previous), on_off(next));
        }
        UpdateOutcome::Updated {
            verdict,
            is_on: next,
            changed,
        }
    }
}

fn on_off(state: bool) -> &'static str {
    if state {
        "on"
    } else {
        "off"
    }
}
