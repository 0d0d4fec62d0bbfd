//! Fixed-interval polling of a presence sensor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::detect::Classifier;
use crate::ingest::FrameSource;
use crate::sensor::{PresenceSensor, UpdateOutcome};

/// Default time between sensor updates.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Counters for one [`Poller::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollStats {
    pub updates: u64,
    pub changes: u64,
    pub failures: u64,
    /// Ticks dropped because an update overran the interval.
    pub missed_ticks: u64,
}

type ChangeCallback = Box<dyn FnMut(bool) + Send>;

pub struct Poller<S, C> {
    sensor: Arc<PresenceSensor<S, C>>,
    scan_interval: Duration,
    on_change: Option<ChangeCallback>,
}

impl<S: FrameSource, C: Classifier> Poller<S, C> {
    pub fn new(sensor: Arc<PresenceSensor<S, C>>, scan_interval: Duration) -> Self {
        Self {
            sensor,
            scan_interval: scan_interval.max(Duration::from_millis(1)),
            on_change: None,
        }
    }

    /// Called with the new state whenever an update flips the sensor.
    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: FnMut(bool) + Send + 'static,
    {
        self.on_change = Some(Box::new(callback));
        self
    }

    pub fn sensor(&self) -> &Arc<PresenceSensor<S, C>> {
        &self.sensor
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn run_once(&mut self, cancel: &CancelToken) -> UpdateOutcome {
        let outcome = self.sensor.update(cancel);
        if let UpdateOutcome::Updated {
            is_on,
            changed: true,
            ..
        } = outcome
        {
            if let Some(callback) = self.on_change.as_mut() {
                callback(is_on);
            }
        }
        outcome
    }

    /// Update now and then on every tick until `cancel` fires.
    pub fn run(&mut self, cancel: &CancelToken) -> PollStats {
        let mut stats = PollStats::default();
        let mut next_tick = Instant::now();

        log::info!(
            "polling {} every {:?}",
            self.sensor.name(),
            self.scan_interval
        );

        while !cancel.is_cancelled() {
            match self.run_once(cancel) {
                UpdateOutcome::Updated { changed, .. } => {
                    stats.updates += 1;
                    if changed {
                        stats.changes += 1;
                    }
                }
                UpdateOutcome::Held { .. } => stats.updates += 1,
                UpdateOutcome::Failed { .. } => {
                    stats.updates += 1;
                    stats.failures += 1;
                }
                UpdateOutcome::Skipped => {}
            }

            next_tick += self.scan_interval;
            let now = Instant::now();
            let mut missed = 0u64;
            while next_tick <= now {
                next_tick += self.scan_interval;
                missed += 1;
            }
            if missed > 0 {
                stats.missed_ticks += missed;
                log::warn!(
                    "{}: update overran the scan interval, skipped {} tick(s)",
                    self.sensor.name(),
                    missed
                );
            }

            if cancel.wait_timeout(next_tick.saturating_duration_since(now)) {
                break;
            }
        }

        log::info!(
            "stopped polling {} after {} updates",
            self.sensor.name(),
            stats.updates
        );
        stats
    }
}
