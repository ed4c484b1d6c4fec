//! Shared types for the trip safety engine

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Mean earth radius in meters (spherical model)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for escalation session IDs (UUIDv7, time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single position sample from the position feed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported horizontal accuracy in meters (not used for deviation math)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude, accuracy: None }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Latitude within [-90, 90] and longitude within [-180, 180]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance in meters (haversine)
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let phi1 = self.latitude.to_radians();
        let phi2 = other.latitude.to_radians();
        let d_phi = (other.latitude - self.latitude).to_radians();
        let d_lambda = (other.longitude - self.longitude).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    /// Map link for this coordinate
    pub fn map_link(&self) -> String {
        format!("https://maps.google.com/?q={:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// Trip destination chosen by the traveler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub coordinate: Coordinate,
    pub label: String,
}

impl Destination {
    pub fn new(coordinate: Coordinate, label: impl Into<String>) -> Self {
        Self { coordinate, label: label.into() }
    }
}

/// Ordered, append-only trail of position samples for the current trip
///
/// Only the latest sample is ever read by the escalation logic.
#[derive(Debug, Default, Clone)]
pub struct RouteTrail {
    samples: Vec<Coordinate>,
}

impl RouteTrail {
    pub fn new() -> Self {
        Self { samples: Vec::new() }
    }

    pub fn push(&mut self, coordinate: Coordinate) {
        self.samples.push(coordinate);
    }

    pub fn latest(&self) -> Option<&Coordinate> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// A raised deviation, consumed immediately by the escalation controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviationEvent {
    pub coordinate: Coordinate,
    /// Epoch milliseconds when the deviation was raised
    pub timestamp: u64,
    pub distance_m: f64,
}

/// Emergency contact (read-only snapshot loaded once per session)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(alias = "phone")]
    pub phone_number: String,
}

impl EmergencyContact {
    pub fn new(id: impl Into<String>, name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), phone_number: phone.into() }
    }
}

/// Actions a traveler can take on a deviation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseAction {
    #[serde(rename = "send-alert")]
    SendAlert,
    #[serde(rename = "confirm-safe")]
    ConfirmSafe,
}

impl ResponseAction {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseAction::SendAlert => "send-alert",
            ResponseAction::ConfirmSafe => "confirm-safe",
        }
    }

    /// Parse a gateway action id
    pub fn from_action_id(action_id: &str) -> Option<Self> {
        match action_id {
            "send-alert" => Some(ResponseAction::SendAlert),
            "confirm-safe" => Some(ResponseAction::ConfirmSafe),
            _ => None,
        }
    }
}

/// Stimuli processed by the engine, one at a time
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Position sample from the position feed
    Position(Coordinate),
    /// Position feed reported an error (permission denied, provider off)
    PositionUnavailable(String),
    /// Traveler picked a destination
    DestinationSet(Destination),
    /// Trip ended or traveler logged out
    DestinationCleared,
    /// Traveler answered a deviation prompt
    PromptResponse { session_id: SessionId, action: ResponseAction },
    /// Recognized utterance from the speech recognizer
    Utterance(String),
    /// Explicit panic button press
    PanicButton,
}

impl EngineEvent {
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::Position(_) => "position",
            EngineEvent::PositionUnavailable(_) => "position_unavailable",
            EngineEvent::DestinationSet(_) => "destination_set",
            EngineEvent::DestinationCleared => "destination_cleared",
            EngineEvent::PromptResponse { .. } => "prompt_response",
            EngineEvent::Utterance(_) => "utterance",
            EngineEvent::PanicButton => "panic_button",
        }
    }
}
