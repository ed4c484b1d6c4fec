//! MQTT client for receiving traveler stimuli
//!
//! One subscription per stimulus topic (position, destination, speech,
//! prompt responses, panic). Payloads are parsed into `EngineEvent`s and
//! handed to the engine. Position samples and transcripts use `try_send`
//! and are shed when the engine is busy; control events wait for room.

use crate::domain::error::{with_timeout, SafetyError, SafetyResult};
use crate::domain::types::{epoch_ms, Coordinate, Destination, EngineEvent, ResponseAction, SessionId};
use crate::infra::config::{Config, TopicsConfig};
use crate::infra::metrics::Metrics;
use crate::io::geocode::Geocoder;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Timestamp as sent by the position feed
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    EpochMs(u64),
    IsoString(String),
}

#[derive(Debug, Deserialize)]
struct PositionMessage {
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    accuracy: Option<f64>,
    #[serde(default)]
    timestamp: Option<TimestampValue>,
    /// Set by the feed when it cannot produce fixes (permission, provider off)
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DestinationMessage {
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    clear: bool,
}

#[derive(Debug, Deserialize)]
struct SpeechMessage {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    session_id: SessionId,
    #[serde(alias = "actionId")]
    action: String,
}

/// Result of parsing one inbound message
#[derive(Debug, Clone)]
pub enum Inbound {
    Event(EngineEvent),
    /// Destination given as an address; needs geocoding first
    Geocode(String),
}

/// Parse ISO 8601 timestamp to epoch milliseconds
fn parse_iso_time(time_str: &str) -> Option<u64> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .ok()
        .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as u64)
}

fn timestamp_to_epoch_ms(ts: &TimestampValue) -> Option<u64> {
    match ts {
        TimestampValue::EpochMs(ms) => Some(*ms),
        TimestampValue::IsoString(s) => parse_iso_time(s),
    }
}

fn invalid(e: impl std::fmt::Display) -> SafetyError {
    SafetyError::InvalidPayload(e.to_string())
}

fn parse_position(payload: &[u8]) -> SafetyResult<Inbound> {
    let msg: PositionMessage = serde_json::from_slice(payload).map_err(invalid)?;
    if let Some(reason) = msg.error {
        return Ok(Inbound::Event(EngineEvent::PositionUnavailable(reason)));
    }
    let (Some(latitude), Some(longitude)) = (msg.latitude, msg.longitude) else {
        return Err(invalid("position without latitude/longitude"));
    };

    let mut coordinate = Coordinate::new(latitude, longitude);
    if let Some(accuracy) = msg.accuracy {
        coordinate = coordinate.with_accuracy(accuracy);
    }
    if let Some(sampled_at) = msg.timestamp.as_ref().and_then(timestamp_to_epoch_ms) {
        debug!(age_ms = %epoch_ms().saturating_sub(sampled_at), "position_sample_age");
    }
    Ok(Inbound::Event(EngineEvent::Position(coordinate)))
}

fn parse_destination(payload: &[u8]) -> SafetyResult<Inbound> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Inbound::Event(EngineEvent::DestinationCleared));
    }
    let msg: DestinationMessage = serde_json::from_slice(payload).map_err(invalid)?;
    if msg.clear {
        return Ok(Inbound::Event(EngineEvent::DestinationCleared));
    }
    if let (Some(latitude), Some(longitude)) = (msg.latitude, msg.longitude) {
        let coordinate = Coordinate::new(latitude, longitude);
        if !coordinate.is_valid() {
            return Err(invalid(format!("destination out of range: {}, {}", latitude, longitude)));
        }
        let label = msg.label.or(msg.address).unwrap_or_else(|| "destination".to_string());
        return Ok(Inbound::Event(EngineEvent::DestinationSet(Destination::new(coordinate, label))));
    }
    match msg.address {
        Some(address) if !address.trim().is_empty() => Ok(Inbound::Geocode(address)),
        _ => Err(invalid("destination needs coordinates, an address, or clear")),
    }
}

fn parse_speech(payload: &[u8]) -> SafetyResult<Inbound> {
    let text = match serde_json::from_slice::<SpeechMessage>(payload) {
        Ok(msg) => msg.text,
        // Plain-text transcripts are accepted as-is
        Err(_) => std::str::from_utf8(payload).map_err(invalid)?.trim().to_string(),
    };
    Ok(Inbound::Event(EngineEvent::Utterance(text)))
}

fn parse_response(payload: &[u8]) -> SafetyResult<Inbound> {
    let msg: ResponseMessage = serde_json::from_slice(payload).map_err(invalid)?;
    let action = ResponseAction::from_action_id(&msg.action)
        .ok_or_else(|| invalid(format!("unknown action '{}'", msg.action)))?;
    Ok(Inbound::Event(EngineEvent::PromptResponse { session_id: msg.session_id, action }))
}

/// Route a message by topic and parse it
pub fn parse_message(topics: &TopicsConfig, topic: &str, payload: &[u8]) -> SafetyResult<Inbound> {
    if topic == topics.position {
        parse_position(payload)
    } else if topic == topics.destination {
        parse_destination(payload)
    } else if topic == topics.speech {
        parse_speech(payload)
    } else if topic == topics.responses {
        parse_response(payload)
    } else if topic == topics.panic {
        Ok(Inbound::Event(EngineEvent::PanicButton))
    } else {
        Err(invalid(format!("unexpected topic {}", topic)))
    }
}

/// Stimuli that a later message supersedes
fn is_sheddable(event: &EngineEvent) -> bool {
    matches!(event, EngineEvent::Position(_) | EngineEvent::Utterance(_))
}

/// Forward an event to the engine. Returns false once the engine is gone.
///
/// Sheddable stimuli are dropped when the queue is full. Panic presses,
/// prompt responses and destination changes wait for room.
async fn forward(
    event_tx: &mpsc::Sender<EngineEvent>,
    event: EngineEvent,
    metrics: &Metrics,
    last_drop_warn: &mut Instant,
) -> bool {
    if !is_sheddable(&event) {
        if event_tx.send(event).await.is_err() {
            warn!("Event channel closed");
            return false;
        }
        return true;
    }

    match event_tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            metrics.record_event_dropped();
            if last_drop_warn.elapsed() > Duration::from_secs(1) {
                warn!(kind = %event.kind(), "mqtt_event_dropped: channel full");
                *last_drop_warn = Instant::now();
            }
            true
        }
        Err(TrySendError::Closed(_)) => {
            warn!("Event channel closed");
            false
        }
    }
}

/// Geocode off the broker loop, then hand the destination to the engine
fn spawn_geocode(
    geocoder: Arc<dyn Geocoder>,
    address: String,
    timeout: Duration,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    tokio::spawn(async move {
        match with_timeout("geocoding", timeout, geocoder.geocode(&address)).await {
            Ok(destination) => {
                if event_tx.send(EngineEvent::DestinationSet(destination)).await.is_err() {
                    warn!("Event channel closed");
                }
            }
            Err(e) => {
                error!(address = %address, error = %e, "destination_geocode_failed");
            }
        }
    });
}

/// Start the MQTT client and send parsed events to the channel
///
/// Events are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped events are counted in metrics and logged (rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    event_tx: mpsc::Sender<EngineEvent>,
    geocoder: Arc<dyn Geocoder>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut mqttoptions =
        MqttOptions::new(config.mqtt_client_id(), config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let topics = config.topics().clone();
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(&topics.position, QoS::AtMostOnce).await?;
    client.subscribe(&topics.speech, QoS::AtMostOnce).await?;
    client.subscribe(&topics.destination, QoS::AtLeastOnce).await?;
    client.subscribe(&topics.responses, QoS::AtLeastOnce).await?;
    client.subscribe(&topics.panic, QoS::AtLeastOnce).await?;

    info!(
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        position = %topics.position,
        responses = %topics.responses,
        "MQTT client subscribed"
    );

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            // Check for shutdown signal
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            // Process MQTT events
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match parse_message(&topics, &publish.topic, &publish.payload) {
                            Ok(Inbound::Event(event)) => {
                                debug!(topic = %publish.topic, kind = %event.kind(), "mqtt_event");
                                if !forward(&event_tx, event, &metrics, &mut last_drop_warn).await {
                                    return Ok(());
                                }
                            }
                            Ok(Inbound::Geocode(address)) => {
                                info!(address = %address, "destination_geocode_requested");
                                spawn_geocode(
                                    geocoder.clone(),
                                    address,
                                    config.geocoding_timeout(),
                                    event_tx.clone(),
                                );
                            }
                            Err(e) => {
                                warn!(topic = %publish.topic, error = %e, "mqtt_payload_rejected");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "MQTT error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
