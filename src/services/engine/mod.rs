//! Safety engine event loop
//!
//! The Engine is the single owner of every piece of mutable safety state:
//! - Deviation cooldown (DeviationDetector)
//! - The escalation session slot and its response-window deadline
//! - The voice-trigger session slot and its in-flight capture task
//! - Current destination and route trail
//!
//! Stimuli are processed one at a time. Collaborator calls (prompt,
//! capture, upload, delivery) run in spawned tasks; completions come back
//! on an internal channel and are applied like any other stimulus.

mod handlers;

use crate::domain::error::SafetyResult;
use crate::domain::session::VoiceState;
use crate::domain::types::{Destination, EmergencyContact, EngineEvent, RouteTrail, SessionId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::blob::BlobStorage;
use crate::io::incidents::IncidentLog;
use crate::io::notify::{NotificationGateway, PromptHandle};
use crate::io::recorder::AudioRecorder;
use crate::io::sms::DeliveryChannel;
use crate::services::deviation::DeviationDetector;
use crate::services::dispatcher::AlertDispatcher;
use crate::services::escalation::EscalationController;
use crate::services::voice_trigger::{TriggerMatcher, VoiceTriggerPipeline};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant as StdInstant;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::info;

/// Capacity of the internal task completion channel
const TASK_CHANNEL_CAPACITY: usize = 64;

/// External collaborators handed to the engine
#[derive(Clone)]
pub struct Collaborators {
    pub channel: Arc<dyn DeliveryChannel>,
    pub gateway: Arc<dyn NotificationGateway>,
    pub storage: Arc<dyn BlobStorage>,
    pub recorder: Arc<dyn AudioRecorder>,
}

/// Completion of a spawned collaborator call
#[derive(Debug)]
pub(crate) enum TaskEvent {
    PromptScheduled { session_id: SessionId, result: SafetyResult<PromptHandle> },
    RecordingFinished { cycle: u64, result: SafetyResult<Bytes> },
    UploadFinished { cycle: u64, result: SafetyResult<String> },
}

/// Snapshot of the engine state for reporters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    pub escalation_pending: bool,
    pub voice_state: VoiceState,
    pub voice_enabled: bool,
    pub destination_set: bool,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            escalation_pending: false,
            voice_state: VoiceState::Idle,
            voice_enabled: false,
            destination_set: false,
        }
    }
}

/// Central event processor for trip safety
pub struct Engine {
    pub(crate) config: Config,
    pub(crate) detector: DeviationDetector,
    pub(crate) escalation: EscalationController,
    pub(crate) voice: VoiceTriggerPipeline,
    pub(crate) dispatcher: Arc<AlertDispatcher>,
    /// Read-only contact snapshot taken at startup
    pub(crate) contacts: Arc<[EmergencyContact]>,
    pub(crate) gateway: Arc<dyn NotificationGateway>,
    pub(crate) storage: Arc<dyn BlobStorage>,
    pub(crate) recorder: Arc<dyn AudioRecorder>,
    pub(crate) destination: Option<Destination>,
    pub(crate) trail: RouteTrail,
    /// Prompt shown for the pending session, if the gateway accepted it
    pub(crate) prompt: Option<(SessionId, PromptHandle)>,
    pub(crate) incidents: Option<Arc<IncidentLog>>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) task_tx: mpsc::Sender<TaskEvent>,
    pub(crate) task_rx: mpsc::Receiver<TaskEvent>,
    status_tx: watch::Sender<EngineStatus>,
}

impl Engine {
    pub fn new(config: Config, collaborators: Collaborators, metrics: Arc<Metrics>) -> Self {
        let dispatcher = Arc::new(AlertDispatcher::new(
            collaborators.channel,
            config.delivery_timeout(),
            config.default_country_code(),
        ));
        let voice = VoiceTriggerPipeline::new(
            TriggerMatcher::new(config.trigger_phrases()),
            config.recording_duration(),
            config.debounce_window(),
            config.voice_enabled(),
        );
        let incidents = if config.egress_file().is_empty() {
            None
        } else {
            Some(Arc::new(IncidentLog::new(config.egress_file())))
        };
        let (task_tx, task_rx) = mpsc::channel(TASK_CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(EngineStatus::default());

        let engine = Self {
            detector: DeviationDetector::new(config.deviation_threshold_m(), config.cooldown()),
            escalation: EscalationController::new(config.response_window()),
            voice,
            dispatcher,
            contacts: config.contacts().to_vec().into(),
            gateway: collaborators.gateway,
            storage: collaborators.storage,
            recorder: collaborators.recorder,
            destination: config.trip_destination().cloned(),
            trail: RouteTrail::new(),
            prompt: None,
            incidents,
            metrics,
            task_tx,
            task_rx,
            status_tx,
            config,
        };
        engine.publish_status();
        engine
    }

    /// Subscribe to engine status updates
    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    pub(crate) fn publish_status(&self) {
        self.status_tx.send_replace(EngineStatus {
            escalation_pending: self.escalation.is_pending(),
            voice_state: self.voice.state(),
            voice_enabled: self.voice.is_enabled(),
            destination_set: self.destination.is_some(),
        });
    }

    /// Run until the event channel closes or shutdown is signalled, then tear down
    pub async fn run(
        &mut self,
        mut event_rx: mpsc::Receiver<EngineEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            contacts = %self.contacts.len(),
            threshold_m = %self.detector.threshold_m(),
            destination = ?self.destination.as_ref().map(|d| d.label.as_str()),
            voice_enabled = %self.voice.is_enabled(),
            "engine_started"
        );

        loop {
            let deadline = self.escalation.deadline();
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(e) => self.process_event(e),
                        None => break,
                    }
                }
                Some(task) = self.task_rx.recv() => {
                    self.handle_task_event(task);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_response_deadline();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.teardown();
        info!("engine_stopped");
    }

    /// Process a single stimulus to completion
    pub fn process_event(&mut self, event: EngineEvent) {
        let process_start = StdInstant::now();
        let now = Instant::now();

        match event {
            EngineEvent::Position(coordinate) => self.handle_position(coordinate, now),
            EngineEvent::PositionUnavailable(reason) => self.handle_position_unavailable(&reason),
            EngineEvent::DestinationSet(destination) => self.handle_destination_set(destination),
            EngineEvent::DestinationCleared => self.handle_destination_cleared(),
            EngineEvent::PromptResponse { session_id, action } => {
                self.handle_prompt_response(session_id, action, now)
            }
            EngineEvent::Utterance(text) => self.handle_utterance(&text, now),
            EngineEvent::PanicButton => self.handle_panic(now),
        }

        self.publish_status();
        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_event_processed(latency_us);
    }

    /// Cancel the response timer, abort any capture, and forget the trip
    pub fn teardown(&mut self) {
        if let Some(session) = self.escalation.cancel() {
            self.dismiss_prompt(session.id);
        }
        self.voice.teardown();
        self.trail.clear();
        self.publish_status();
        info!("engine_teardown");
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn trail(&self) -> &RouteTrail {
        &self.trail
    }

    pub fn escalation(&self) -> &EscalationController {
        &self.escalation
    }

    pub fn voice(&self) -> &VoiceTriggerPipeline {
        &self.voice
    }
}
