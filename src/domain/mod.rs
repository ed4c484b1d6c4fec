//! Domain models - core safety types and session objects
//!
//! This module contains the canonical data types used throughout the system:
//! - `Coordinate`, `Destination`, `RouteTrail` - position data
//! - `DeviationEvent` - raised when the traveler strays too far
//! - `EscalationSession`, `VoiceTriggerSession` - state machine session slots
//! - `SafetyError` - failure taxonomy for collaborator calls

pub mod error;
pub mod session;
pub mod types;

pub use error::{SafetyError, SafetyResult};
pub use session::{EscalationSession, EscalationState, VoiceState, VoiceTriggerSession};
pub use types::{
    Coordinate, Destination, DeviationEvent, EmergencyContact, EngineEvent, ResponseAction,
    RouteTrail, SessionId,
};
