//! Deviation detection against the trip destination
//!
//! Raises a deviation when the traveler is farther than the threshold from
//! the destination, at most once per cooldown window. The cooldown stamp is
//! updated on every raised deviation, whatever the escalation later decides,
//! so a traveler who stays off-route is not prompted on every sample.
//!
//! The reported accuracy of a sample is not subtracted from the distance.

use crate::domain::types::{epoch_ms, Coordinate, Destination, DeviationEvent};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Result of evaluating one position sample
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    /// No destination set; nothing to compare against
    NoDestination,
    /// Within the threshold
    OnRoute { distance_m: f64 },
    /// Beyond the threshold but inside the cooldown window
    Suppressed { distance_m: f64 },
    /// Deviation raised; cooldown restarted
    Raised(DeviationEvent),
}

pub struct DeviationDetector {
    threshold_m: f64,
    cooldown: Duration,
    /// Process-lifetime cooldown stamp, only mutated here
    last_notified_at: Option<Instant>,
}

impl DeviationDetector {
    pub fn new(threshold_m: f64, cooldown: Duration) -> Self {
        Self { threshold_m, cooldown, last_notified_at: None }
    }

    pub fn threshold_m(&self) -> f64 {
        self.threshold_m
    }

    pub fn last_notified_at(&self) -> Option<Instant> {
        self.last_notified_at
    }

    fn cooldown_active(&self, now: Instant) -> bool {
        match self.last_notified_at {
            Some(last) => now.saturating_duration_since(last) < self.cooldown,
            None => false,
        }
    }

    /// Evaluate a sample against the destination at time `now`
    pub fn evaluate(
        &mut self,
        current: &Coordinate,
        destination: Option<&Destination>,
        now: Instant,
    ) -> Assessment {
        let Some(destination) = destination else {
            return Assessment::NoDestination;
        };

        let distance_m = current.distance_to(&destination.coordinate);

        if self.cooldown_active(now) {
            if distance_m > self.threshold_m {
                debug!(distance_m = %distance_m.round(), "deviation_suppressed_cooldown");
                return Assessment::Suppressed { distance_m };
            }
            return Assessment::OnRoute { distance_m };
        }

        if distance_m > self.threshold_m {
            self.last_notified_at = Some(now);
            return Assessment::Raised(DeviationEvent {
                coordinate: *current,
                timestamp: epoch_ms(),
                distance_m,
            });
        }

        Assessment::OnRoute { distance_m }
    }
}
