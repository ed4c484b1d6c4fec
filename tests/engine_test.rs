//! End-to-end tests driving the engine run loop on paused time

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tripguard::domain::{
    Coordinate, Destination, EmergencyContact, EngineEvent, ResponseAction, SafetyError,
    SafetyResult, SessionId,
};
use tripguard::infra::{Config, Metrics};
use tripguard::io::{AudioRecorder, BlobStorage, DeliveryChannel, NotificationGateway, Prompt, PromptHandle};
use tripguard::services::{Collaborators, Engine, EngineStatus};

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    fn is_available(&self) -> bool {
        true
    }

    async fn send(&self, _numbers: &[String], message: &str) -> SafetyResult<()> {
        self.sent.lock().push(message.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingGateway {
    prompts: Mutex<Vec<SessionId>>,
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn schedule(&self, prompt: &Prompt) -> SafetyResult<PromptHandle> {
        self.prompts.lock().push(prompt.session_id);
        Ok(PromptHandle(prompt.session_id.to_string()))
    }

    async fn dismiss(&self, _handle: &PromptHandle) -> SafetyResult<()> {
        Ok(())
    }
}

struct StaticStorage;

#[async_trait]
impl BlobStorage for StaticStorage {
    async fn upload(&self, _data: Bytes, _content_type: &str) -> SafetyResult<String> {
        Ok("https://blob.test/clip.wav".to_string())
    }
}

struct SleepingRecorder {
    deny: bool,
}

#[async_trait]
impl AudioRecorder for SleepingRecorder {
    async fn record(&self, duration: Duration) -> SafetyResult<Bytes> {
        if self.deny {
            return Err(SafetyError::PermissionDenied { subsystem: "microphone" });
        }
        tokio::time::sleep(duration).await;
        Ok(Bytes::from_static(b"RIFF"))
    }
}

struct Harness {
    channel: Arc<RecordingChannel>,
    gateway: Arc<RecordingGateway>,
    event_tx: mpsc::Sender<EngineEvent>,
    shutdown_tx: watch::Sender<bool>,
    status: watch::Receiver<EngineStatus>,
    handle: tokio::task::JoinHandle<Engine>,
}

impl Harness {
    fn start(config: Config, deny_microphone: bool) -> Self {
        let channel = Arc::new(RecordingChannel::default());
        let gateway = Arc::new(RecordingGateway::default());
        let collaborators = Collaborators {
            channel: channel.clone(),
            gateway: gateway.clone(),
            storage: Arc::new(StaticStorage),
            recorder: Arc::new(SleepingRecorder { deny: deny_microphone }),
        };
        let mut engine = Engine::new(config, collaborators, Arc::new(Metrics::new()));
        let status = engine.status();
        let (event_tx, event_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            engine.run(event_rx, shutdown_rx).await;
            engine
        });
        Self { channel, gateway, event_tx, shutdown_tx, status, handle }
    }

    async fn send(&self, event: EngineEvent) {
        self.event_tx.send(event).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    fn sent(&self) -> Vec<String> {
        self.channel.sent.lock().clone()
    }

    async fn stop(self) -> Engine {
        self.shutdown_tx.send(true).unwrap();
        self.handle.await.unwrap()
    }
}

fn config() -> Config {
    Config::default()
        .with_traveler_name("Asha")
        .with_deviation_threshold_m(500.0)
        .with_egress_file("")
        .with_contacts(vec![EmergencyContact::new("1", "Ravi", "+919800000002")])
}

fn home() -> Destination {
    Destination::new(Coordinate::new(19.0760, 72.8777), "Home")
}

fn far_away() -> Coordinate {
    Coordinate::new(19.0868, 72.8777)
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_deviation_alerts_contacts() {
    let harness = Harness::start(config(), false);

    harness.send(EngineEvent::DestinationSet(home())).await;
    harness.send(EngineEvent::Position(far_away())).await;

    assert!(harness.status.borrow().escalation_pending);
    assert_eq!(harness.gateway.prompts.lock().len(), 1);
    assert!(harness.sent().is_empty());

    tokio::time::sleep(Duration::from_secs(31)).await;

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("EMERGENCY: Asha"));
    assert!(sent[0].contains("19.086800,72.877700"));
    assert!(!harness.status.borrow().escalation_pending);

    let engine = harness.stop().await;
    assert!(!engine.escalation().is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_safe_never_alerts() {
    let harness = Harness::start(config(), false);

    harness.send(EngineEvent::DestinationSet(home())).await;
    harness.send(EngineEvent::Position(far_away())).await;
    let session_id = harness.gateway.prompts.lock()[0];

    harness
        .send(EngineEvent::PromptResponse { session_id, action: ResponseAction::ConfirmSafe })
        .await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(harness.sent().is_empty());
    assert!(!harness.status.borrow().escalation_pending);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_near_destination_does_not_escalate() {
    let harness = Harness::start(config(), false);

    harness.send(EngineEvent::DestinationSet(home())).await;
    harness.send(EngineEvent::Position(Coordinate::new(19.0770, 72.8777))).await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(harness.gateway.prompts.lock().is_empty());
    assert!(harness.sent().is_empty());

    let engine = harness.stop().await;
    assert_eq!(engine.destination().map(|d| d.label.as_str()), Some("Home"));
}

#[tokio::test(start_paused = true)]
async fn test_trigger_phrase_sends_evidence_link() {
    let harness = Harness::start(config(), false);

    harness.send(EngineEvent::Position(far_away())).await;
    harness.send(EngineEvent::Utterance("someone please help me".to_string())).await;
    assert_eq!(harness.status.borrow().voice_state.as_str(), "recording");

    tokio::time::sleep(Duration::from_secs(20)).await;

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("https://blob.test/clip.wav"));
    assert_eq!(harness.status.borrow().voice_state.as_str(), "idle");
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_denied_microphone_disables_voice() {
    let harness = Harness::start(config(), true);

    harness.send(EngineEvent::Utterance("help".to_string())).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!harness.status.borrow().voice_enabled);
    assert!(harness.sent().is_empty());
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_panic_button_alerts_immediately() {
    let harness = Harness::start(config(), false);

    harness.send(EngineEvent::Position(far_away())).await;
    harness.send(EngineEvent::PanicButton).await;

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("19.086800,72.877700"));
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_closing_event_channel_stops_engine() {
    let harness = Harness::start(config(), false);
    harness.send(EngineEvent::DestinationSet(home())).await;
    harness.send(EngineEvent::Position(far_away())).await;

    let Harness { event_tx, handle, .. } = harness;
    drop(event_tx);
    let engine = handle.await.unwrap();

    assert!(!engine.escalation().is_pending());
    assert!(engine.trail().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_incidents_are_written_to_egress_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("incidents.jsonl");
    let path_str = path.to_str().unwrap().to_string();
    let harness = Harness::start(config().with_egress_file(&path_str), false);

    harness.send(EngineEvent::DestinationSet(home())).await;
    harness.send(EngineEvent::Position(far_away())).await;
    tokio::time::sleep(Duration::from_secs(31)).await;
    harness.stop().await;

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> =
        content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert!(lines.iter().any(|l| l["kind"] == "escalation" && l["outcome"] == "auto_alert"));
    assert!(lines.iter().any(|l| l["kind"] == "dispatch" && l["outcome"] == "sent"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_recording_incident_carries_error_kind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("incidents.jsonl");
    let path_str = path.to_str().unwrap().to_string();
    let harness = Harness::start(config().with_egress_file(&path_str), true);

    harness.send(EngineEvent::Utterance("help".to_string())).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness.stop().await;

    let content = std::fs::read_to_string(&path).unwrap();
    let failure: serde_json::Value = content
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap())
        .find(|l| l["kind"] == "voice" && l["outcome"] == "failed")
        .unwrap();
    assert!(failure["error"].as_str().unwrap().starts_with("recording permission_denied:"));
}
