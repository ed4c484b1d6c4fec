//! Stimulus handlers for the Engine
//!
//! Handlers mutate state synchronously and push every collaborator call
//! onto a spawned task, so a slow network never delays the next stimulus.

use super::{Engine, TaskEvent};
use crate::domain::error::with_timeout;
use crate::domain::session::EscalationState;
use crate::domain::types::{Coordinate, Destination, ResponseAction, SessionId};
use crate::infra::metrics::AlertSource;
use crate::io::incidents::IncidentRecord;
use crate::io::notify::{Prompt, PromptHandle};
use crate::services::deviation::Assessment;
use crate::services::dispatcher::{AlertMessage, DispatchOutcome, DispatchReport};
use crate::services::escalation::{EscalationInput, EscalationStep, Resolution};
use crate::services::voice_trigger::TriggerDecision;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

impl Engine {
    /// Handle a position sample: record it, check for deviation, maybe escalate
    pub(crate) fn handle_position(&mut self, coordinate: Coordinate, now: Instant) {
        if !coordinate.is_valid() {
            warn!(lat = %coordinate.latitude, lon = %coordinate.longitude, "position_invalid");
            return;
        }
        self.metrics.record_position();
        self.trail.push(coordinate);

        match self.detector.evaluate(&coordinate, self.destination.as_ref(), now) {
            Assessment::Raised(event) => {
                self.metrics.record_deviation_raised();
                warn!(
                    distance_m = %event.distance_m.round(),
                    lat = %coordinate.latitude,
                    lon = %coordinate.longitude,
                    "deviation_raised"
                );
                match self.escalation.handle(EscalationInput::DeviationDetected(event), now) {
                    EscalationStep::Ignored => self.metrics.record_escalation_ignored(),
                    step => self.apply_step(step, AlertSource::Auto),
                }
            }
            Assessment::Suppressed { .. } => {
                self.metrics.record_deviation_suppressed();
            }
            Assessment::OnRoute { distance_m } => {
                debug!(distance_m = %distance_m.round(), "position_on_route");
            }
            Assessment::NoDestination => {}
        }
    }

    /// Position feed failure; deviation monitoring simply sees no samples
    pub(crate) fn handle_position_unavailable(&mut self, reason: &str) {
        warn!(reason = %reason, "position_unavailable");
    }

    pub(crate) fn handle_destination_set(&mut self, destination: Destination) {
        info!(
            label = %destination.label,
            lat = %destination.coordinate.latitude,
            lon = %destination.coordinate.longitude,
            "destination_set"
        );
        self.trail.clear();
        self.destination = Some(destination);
    }

    /// Trip ended. A pending escalation keeps running to resolution.
    pub(crate) fn handle_destination_cleared(&mut self) {
        info!(samples = %self.trail.len(), "trip_ended");
        self.destination = None;
        self.trail.clear();
    }

    pub(crate) fn handle_prompt_response(
        &mut self,
        session_id: SessionId,
        action: ResponseAction,
        now: Instant,
    ) {
        let input = EscalationInput::UserResponded {
            session_id,
            action,
            current: self.trail.latest().copied(),
        };
        let step = self.escalation.handle(input, now);
        self.apply_step(step, AlertSource::Manual);
    }

    /// Response window closed without an answer
    pub(crate) fn on_response_deadline(&mut self) {
        let Some(session_id) = self.escalation.active().map(|s| s.id) else {
            return;
        };
        let step =
            self.escalation.handle(EscalationInput::ResponseTimedOut { session_id }, Instant::now());
        self.apply_step(step, AlertSource::Auto);
        self.publish_status();
    }

    pub(crate) fn handle_utterance(&mut self, text: &str, now: Instant) {
        match self.voice.on_utterance(text, now) {
            TriggerDecision::StartRecording { cycle, duration } => {
                self.metrics.record_voice_trigger(true);
                self.spawn_recording(cycle, duration);
            }
            TriggerDecision::Busy | TriggerDecision::Debounced | TriggerDecision::Disabled => {
                self.metrics.record_voice_trigger(false);
            }
            TriggerDecision::NotTriggered => {}
        }
    }

    /// Panic button: resolve a pending session as "send alert", or alert now
    pub(crate) fn handle_panic(&mut self, now: Instant) {
        if let Some(session_id) = self.escalation.active().map(|s| s.id) {
            info!(session_id = %session_id, "panic_resolves_pending_session");
            let input = EscalationInput::UserResponded {
                session_id,
                action: ResponseAction::SendAlert,
                current: self.trail.latest().copied(),
            };
            let step = self.escalation.handle(input, now);
            self.apply_step(step, AlertSource::Panic);
            return;
        }

        let coordinate = self.trail.latest().copied();
        warn!(has_position = %coordinate.is_some(), "panic_button_pressed");
        self.metrics.record_alert(AlertSource::Panic);
        self.write_incident(
            IncidentRecord::new("panic", "alert_requested").with_coordinate(coordinate.as_ref()),
        );
        self.spawn_dispatch(AlertSource::Panic, None, coordinate, None);
    }

    /// Apply a completed collaborator call
    pub(crate) fn handle_task_event(&mut self, task: TaskEvent) {
        match task {
            TaskEvent::PromptScheduled { session_id, result } => match result {
                Ok(handle) => {
                    if self.escalation.active().is_some_and(|s| s.id == session_id) {
                        debug!(session_id = %session_id, "prompt_scheduled");
                        self.prompt = Some((session_id, handle));
                    } else {
                        // Session resolved before the gateway answered
                        self.spawn_dismiss(handle);
                    }
                }
                Err(e) => {
                    // The response timer still runs; an unanswered prompt auto-escalates
                    error!(
                        session_id = %session_id,
                        kind = %e.kind(),
                        error = %e,
                        "prompt_schedule_failed"
                    );
                }
            },
            TaskEvent::RecordingFinished { cycle, result } => {
                let current = cycle == self.voice.session().cycle;
                if self.voice.on_recording_finished(cycle, result.as_ref().map(Bytes::len)) {
                    if let Ok(clip) = result {
                        self.spawn_upload(cycle, clip);
                    }
                } else if let (true, Err(e)) = (current, &result) {
                    self.metrics.record_recording_failed();
                    self.write_incident(
                        IncidentRecord::new("voice", "failed")
                            .with_error(format!("recording {}: {}", e.kind(), e)),
                    );
                }
            }
            TaskEvent::UploadFinished { cycle, result } => {
                let current = cycle == self.voice.session().cycle;
                let url = result.as_ref().map(String::as_str);
                if self.voice.on_upload_finished(cycle, url) {
                    if let Ok(url) = result {
                        let coordinate = self.trail.latest().copied();
                        self.metrics.record_alert(AlertSource::Voice);
                        self.write_incident(
                            IncidentRecord::new("voice", "dispatched")
                                .with_coordinate(coordinate.as_ref())
                                .with_evidence(&url),
                        );
                        self.spawn_dispatch(AlertSource::Voice, None, coordinate, Some(url));
                    }
                } else if let (true, Err(e)) = (current, &result) {
                    self.metrics.record_upload_failed();
                    self.write_incident(
                        IncidentRecord::new("voice", "failed")
                            .with_error(format!("upload {}: {}", e.kind(), e)),
                    );
                }
            }
        }
        self.publish_status();
    }

    /// Act on an escalation step
    fn apply_step(&mut self, step: EscalationStep, source: AlertSource) {
        match step {
            EscalationStep::Ignored => {}
            EscalationStep::Opened(session) => {
                self.metrics.record_escalation_opened();
                let prompt = Prompt::deviation(
                    session.id,
                    session.triggering_event.distance_m,
                    self.escalation.response_window(),
                );
                self.spawn_prompt(prompt);
            }
            EscalationStep::Resolved(resolution) => self.apply_resolution(resolution, source),
        }
    }

    fn apply_resolution(&mut self, resolution: Resolution, source: AlertSource) {
        let Resolution { session, alert_coordinate } = resolution;
        self.dismiss_prompt(session.id);

        self.write_incident(
            IncidentRecord::new("escalation", session.state.as_str())
                .with_session(session.id)
                .with_distance(session.triggering_event.distance_m)
                .with_coordinate(Some(&session.triggering_event.coordinate)),
        );

        self.metrics.record_outcome(session.state);
        match session.state {
            EscalationState::Safe | EscalationState::PendingResponse => {}
            EscalationState::AutoAlert | EscalationState::ManualAlert => {
                self.metrics.record_alert(source);
                self.spawn_dispatch(source, Some(session.id), alert_coordinate, None);
            }
        }
    }

    /// Withdraw the prompt for a resolved session, if one was shown
    pub(crate) fn dismiss_prompt(&mut self, session_id: SessionId) {
        match self.prompt.take() {
            Some((id, handle)) if id == session_id => self.spawn_dismiss(handle),
            other => self.prompt = other,
        }
    }

    fn spawn_prompt(&self, prompt: Prompt) {
        let gateway = self.gateway.clone();
        let task_tx = self.task_tx.clone();
        let timeout = self.config.prompt_timeout();
        tokio::spawn(async move {
            let session_id = prompt.session_id;
            let result = with_timeout("notification gateway", timeout, gateway.schedule(&prompt)).await;
            let _ = task_tx.send(TaskEvent::PromptScheduled { session_id, result }).await;
        });
    }

    fn spawn_dismiss(&self, handle: PromptHandle) {
        let gateway = self.gateway.clone();
        let timeout = self.config.prompt_timeout();
        tokio::spawn(async move {
            if let Err(e) = with_timeout("notification gateway", timeout, gateway.dismiss(&handle)).await {
                debug!(handle = %handle.0, error = %e, "prompt_dismiss_failed");
            }
        });
    }

    fn spawn_recording(&mut self, cycle: u64, duration: Duration) {
        let recorder = self.recorder.clone();
        let task_tx = self.task_tx.clone();
        let handle = tokio::spawn(async move {
            let result = recorder.record(duration).await;
            let _ = task_tx.send(TaskEvent::RecordingFinished { cycle, result }).await;
        });
        self.voice.attach_task(handle);
    }

    fn spawn_upload(&mut self, cycle: u64, clip: Bytes) {
        let storage = self.storage.clone();
        let task_tx = self.task_tx.clone();
        let timeout = self.config.storage_timeout();
        let content_type = self.config.audio_content_type().to_string();
        let handle = tokio::spawn(async move {
            let result = with_timeout("upload", timeout, storage.upload(clip, &content_type)).await;
            let _ = task_tx.send(TaskEvent::UploadFinished { cycle, result }).await;
        });
        self.voice.attach_task(handle);
    }

    /// Render the alert now and deliver it off the event loop
    fn spawn_dispatch(
        &self,
        source: AlertSource,
        session_id: Option<SessionId>,
        coordinate: Option<Coordinate>,
        evidence_url: Option<String>,
    ) {
        let message = AlertMessage {
            traveler_name: self.config.traveler_name(),
            destination_label: self.destination.as_ref().map(|d| d.label.as_str()),
            coordinate: coordinate.as_ref(),
            evidence_url: evidence_url.as_deref(),
        }
        .render();

        let dispatcher = self.dispatcher.clone();
        let contacts = self.contacts.clone();
        let metrics = self.metrics.clone();
        let incidents = self.incidents.clone();
        tokio::spawn(async move {
            let DispatchReport { outcome, latency_ms } =
                dispatcher.dispatch(&contacts, &message).await;
            metrics.record_dispatch(outcome.as_str(), latency_ms);

            if let Some(log) = incidents {
                let mut record = IncidentRecord::new("dispatch", outcome.as_str())
                    .with_source(source.as_str())
                    .with_coordinate(coordinate.as_ref());
                if let Some(id) = session_id {
                    record = record.with_session(id);
                }
                if let Some(ref url) = evidence_url {
                    record = record.with_evidence(url);
                }
                if let DispatchOutcome::Failed(ref reason) = outcome {
                    record = record.with_error(reason);
                }
                log.write(&record);
            }
        });
    }

    pub(crate) fn write_incident(&self, record: IncidentRecord) {
        if let Some(ref log) = self.incidents {
            log.write(&record);
        }
    }
}
