//! Escalation state machine for raised deviations
//!
//! Idle → PendingResponse → {Safe, AutoAlert, ManualAlert} → Idle.
//!
//! Exactly one session may be pending at a time. The response-window
//! deadline is stored on the session itself, so dropping the session
//! cancels the timer; the engine sleeps until `deadline()` and feeds
//! `ResponseTimedOut` back in.

use crate::domain::session::{EscalationSession, EscalationState};
use crate::domain::types::{Coordinate, DeviationEvent, ResponseAction, SessionId};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Closed set of inputs to the escalation controller
#[derive(Debug, Clone)]
pub enum EscalationInput {
    DeviationDetected(DeviationEvent),
    UserResponded {
        session_id: SessionId,
        action: ResponseAction,
        /// Latest known position at the time of the response
        current: Option<Coordinate>,
    },
    ResponseTimedOut { session_id: SessionId },
}

/// A session that reached a terminal state
#[derive(Debug, Clone)]
pub struct Resolution {
    pub session: EscalationSession,
    /// Position to alert with; `None` for `Safe` (no dispatch)
    pub alert_coordinate: Option<Coordinate>,
}

/// What the engine has to do after an input
#[derive(Debug, Clone)]
pub enum EscalationStep {
    /// Input had no effect (stale, duplicate, or single-flight guard)
    Ignored,
    /// New session opened; the engine must request the prompt
    Opened(EscalationSession),
    /// Session resolved; the machine is back to Idle
    Resolved(Resolution),
}

pub struct EscalationController {
    response_window: Duration,
    /// The single session slot
    active: Option<EscalationSession>,
}

impl EscalationController {
    pub fn new(response_window: Duration) -> Self {
        Self { response_window, active: None }
    }

    pub fn response_window(&self) -> Duration {
        self.response_window
    }

    pub fn is_pending(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&EscalationSession> {
        self.active.as_ref()
    }

    /// Response-window expiry of the pending session, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|s| s.deadline)
    }

    pub fn handle(&mut self, input: EscalationInput, now: Instant) -> EscalationStep {
        match input {
            EscalationInput::DeviationDetected(event) => self.on_deviation(event, now),
            EscalationInput::UserResponded { session_id, action, current } => {
                self.on_response(session_id, action, current)
            }
            EscalationInput::ResponseTimedOut { session_id } => self.on_timeout(session_id, now),
        }
    }

    fn on_deviation(&mut self, event: DeviationEvent, now: Instant) -> EscalationStep {
        if let Some(ref pending) = self.active {
            debug!(
                session_id = %pending.id,
                distance_m = %event.distance_m.round(),
                "escalation_ignored_single_flight"
            );
            return EscalationStep::Ignored;
        }

        let session = EscalationSession::new(event, now, now + self.response_window);
        info!(
            session_id = %session.id,
            distance_m = %event.distance_m.round(),
            window_secs = %self.response_window.as_secs(),
            "escalation_opened"
        );
        self.active = Some(session.clone());
        EscalationStep::Opened(session)
    }

    fn on_response(
        &mut self,
        session_id: SessionId,
        action: ResponseAction,
        current: Option<Coordinate>,
    ) -> EscalationStep {
        if !self.matches(session_id) {
            warn!(session_id = %session_id, action = %action.as_str(), "escalation_response_stale");
            return EscalationStep::Ignored;
        }

        match action {
            ResponseAction::ConfirmSafe => self.resolve(EscalationState::Safe, None),
            ResponseAction::SendAlert => {
                // Prefer the freshest position; fall back to the one that raised the session
                let coordinate = current.or_else(|| {
                    self.active.as_ref().map(|s| s.triggering_event.coordinate)
                });
                self.resolve(EscalationState::ManualAlert, coordinate)
            }
        }
    }

    fn on_timeout(&mut self, session_id: SessionId, now: Instant) -> EscalationStep {
        let Some(ref session) = self.active else {
            return EscalationStep::Ignored;
        };
        if session.id != session_id || now < session.deadline {
            return EscalationStep::Ignored;
        }
        // Timeout always uses the coordinate captured when the deviation was raised
        let coordinate = session.triggering_event.coordinate;
        self.resolve(EscalationState::AutoAlert, Some(coordinate))
    }

    fn matches(&self, session_id: SessionId) -> bool {
        self.active.as_ref().is_some_and(|s| s.id == session_id)
    }

    fn resolve(&mut self, state: EscalationState, coordinate: Option<Coordinate>) -> EscalationStep {
        let Some(mut session) = self.active.take() else {
            return EscalationStep::Ignored;
        };
        session.resolve(state);
        info!(
            session_id = %session.id,
            state = %state.as_str(),
            elapsed_ms = %session.created_at.elapsed().as_millis(),
            "escalation_resolved"
        );
        EscalationStep::Resolved(Resolution { session, alert_coordinate: coordinate })
    }

    /// Drop the pending session, if any (engine teardown)
    pub fn cancel(&mut self) -> Option<EscalationSession> {
        let session = self.active.take();
        if let Some(ref s) = session {
            info!(session_id = %s.id, "escalation_cancelled");
        }
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(30);

    fn deviation(lat: f64) -> DeviationEvent {
        DeviationEvent { coordinate: Coordinate::new(lat, 72.8777), timestamp: 0, distance_m: 1200.0 }
    }

    fn open(controller: &mut EscalationController, now: Instant) -> EscalationSession {
        match controller.handle(EscalationInput::DeviationDetected(deviation(19.0868)), now) {
            EscalationStep::Opened(session) => session,
            other => panic!("expected Opened, got {:?}", other),
        }
    }

    #[test]
    fn test_deviation_opens_session() {
        let mut controller = EscalationController::new(WINDOW);
        let now = Instant::now();
        let session = open(&mut controller, now);

        assert_eq!(session.state, EscalationState::PendingResponse);
        assert_eq!(session.deadline, now + WINDOW);
        assert_eq!(controller.deadline(), Some(now + WINDOW));
        assert!(controller.is_pending());
    }

    #[test]
    fn test_single_flight_guard() {
        let mut controller = EscalationController::new(WINDOW);
        let now = Instant::now();
        let first = open(&mut controller, now);

        let step = controller.handle(EscalationInput::DeviationDetected(deviation(19.2)), now);
        assert!(matches!(step, EscalationStep::Ignored));
        assert_eq!(controller.active().map(|s| s.id), Some(first.id));
    }

    #[test]
    fn test_confirm_safe_never_alerts() {
        let mut controller = EscalationController::new(WINDOW);
        let now = Instant::now();
        let session = open(&mut controller, now);

        let step = controller.handle(
            EscalationInput::UserResponded {
                session_id: session.id,
                action: ResponseAction::ConfirmSafe,
                current: Some(Coordinate::new(19.5, 72.8)),
            },
            now + Duration::from_secs(5),
        );
        match step {
            EscalationStep::Resolved(res) => {
                assert_eq!(res.session.state, EscalationState::Safe);
                assert!(res.alert_coordinate.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!controller.is_pending());

        // Late timeout for the resolved session is ignored
        let late = controller.handle(
            EscalationInput::ResponseTimedOut { session_id: session.id },
            now + WINDOW,
        );
        assert!(matches!(late, EscalationStep::Ignored));
    }

    #[test]
    fn test_send_alert_uses_current_position() {
        let mut controller = EscalationController::new(WINDOW);
        let now = Instant::now();
        let session = open(&mut controller, now);
        let current = Coordinate::new(19.1, 72.9);

        let step = controller.handle(
            EscalationInput::UserResponded {
                session_id: session.id,
                action: ResponseAction::SendAlert,
                current: Some(current),
            },
            now,
        );
        match step {
            EscalationStep::Resolved(res) => {
                assert_eq!(res.session.state, EscalationState::ManualAlert);
                assert_eq!(res.alert_coordinate, Some(current));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_timeout_uses_captured_coordinate() {
        let mut controller = EscalationController::new(WINDOW);
        let now = Instant::now();
        let session = open(&mut controller, now);

        // Too early: ignored
        let early = controller.handle(
            EscalationInput::ResponseTimedOut { session_id: session.id },
            now + Duration::from_secs(29),
        );
        assert!(matches!(early, EscalationStep::Ignored));
        assert!(controller.is_pending());

        let step = controller.handle(
            EscalationInput::ResponseTimedOut { session_id: session.id },
            now + WINDOW,
        );
        match step {
            EscalationStep::Resolved(res) => {
                assert_eq!(res.session.state, EscalationState::AutoAlert);
                assert_eq!(res.alert_coordinate, Some(session.triggering_event.coordinate));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(controller.deadline().is_none());
    }

    #[test]
    fn test_stale_response_ignored() {
        let mut controller = EscalationController::new(WINDOW);
        let now = Instant::now();
        let _session = open(&mut controller, now);

        let step = controller.handle(
            EscalationInput::UserResponded {
                session_id: SessionId::new(),
                action: ResponseAction::ConfirmSafe,
                current: None,
            },
            now,
        );
        assert!(matches!(step, EscalationStep::Ignored));
        assert!(controller.is_pending());
    }

    #[test]
    fn test_new_session_after_resolution() {
        let mut controller = EscalationController::new(WINDOW);
        let now = Instant::now();
        let first = open(&mut controller, now);
        controller.handle(
            EscalationInput::UserResponded {
                session_id: first.id,
                action: ResponseAction::ConfirmSafe,
                current: None,
            },
            now,
        );

        let second = open(&mut controller, now + Duration::from_secs(61));
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_cancel_clears_deadline() {
        let mut controller = EscalationController::new(WINDOW);
        let now = Instant::now();
        open(&mut controller, now);
        assert!(controller.cancel().is_some());
        assert!(controller.deadline().is_none());
        assert!(controller.cancel().is_none());
    }
}
