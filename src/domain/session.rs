//! Session objects owned by the escalation and voice-trigger state machines

use crate::domain::types::{DeviationEvent, SessionId};
use serde::Serialize;
use tokio::time::Instant;

/// Escalation session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EscalationState {
    PendingResponse,
    Safe,
    AutoAlert,
    ManualAlert,
}

impl EscalationState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationState::PendingResponse => "pending_response",
            EscalationState::Safe => "safe",
            EscalationState::AutoAlert => "auto_alert",
            EscalationState::ManualAlert => "manual_alert",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EscalationState::PendingResponse)
    }
}

/// A single deviation escalation, from prompt to resolution
#[derive(Debug, Clone)]
pub struct EscalationSession {
    pub id: SessionId,
    pub triggering_event: DeviationEvent,
    pub state: EscalationState,
    pub created_at: Instant,
    /// Response-window expiry; the timer lives with the session
    pub deadline: Instant,
}

impl EscalationSession {
    pub fn new(event: DeviationEvent, created_at: Instant, deadline: Instant) -> Self {
        Self {
            id: SessionId::new(),
            triggering_event: event,
            state: EscalationState::PendingResponse,
            created_at,
            deadline,
        }
    }

    /// Move to a terminal state. Returns false if already terminal.
    pub(crate) fn resolve(&mut self, state: EscalationState) -> bool {
        if self.state.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        true
    }
}

/// Voice-trigger pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VoiceState {
    Idle,
    Recording,
    Uploading,
    Dispatched,
    Failed,
}

impl VoiceState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceState::Idle => "idle",
            VoiceState::Recording => "recording",
            VoiceState::Uploading => "uploading",
            VoiceState::Dispatched => "dispatched",
            VoiceState::Failed => "failed",
        }
    }
}

/// The single voice-trigger session slot
#[derive(Debug, Clone)]
pub struct VoiceTriggerSession {
    pub state: VoiceState,
    /// Start of the most recent accepted recording
    pub started_at: Option<Instant>,
    /// Monotonic cycle counter; completions for an older cycle are stale
    pub cycle: u64,
}

impl VoiceTriggerSession {
    pub fn new() -> Self {
        Self { state: VoiceState::Idle, started_at: None, cycle: 0 }
    }
}

impl Default for VoiceTriggerSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Coordinate;
    use std::time::Duration;

    fn event() -> DeviationEvent {
        DeviationEvent { coordinate: Coordinate::new(1.0, 1.0), timestamp: 0, distance_m: 1500.0 }
    }

    #[test]
    fn test_resolve_is_monotonic() {
        let now = Instant::now();
        let mut session = EscalationSession::new(event(), now, now + Duration::from_secs(30));
        assert_eq!(session.state, EscalationState::PendingResponse);

        assert!(session.resolve(EscalationState::Safe));
        assert_eq!(session.state, EscalationState::Safe);

        // No re-entry or second resolution
        assert!(!session.resolve(EscalationState::PendingResponse));
        assert!(!session.resolve(EscalationState::AutoAlert));
        assert_eq!(session.state, EscalationState::Safe);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!EscalationState::PendingResponse.is_terminal());
        assert!(EscalationState::Safe.is_terminal());
        assert!(EscalationState::AutoAlert.is_terminal());
        assert!(EscalationState::ManualAlert.is_terminal());
    }
}
