//! Interactive prompt gateway over MQTT
//!
//! Prompts are published as JSON to the prompts topic; the companion app
//! answers on the responses topic, which is consumed by the MQTT ingest
//! client (see `io::mqtt`). Delivery is at-most-once from the engine's view:
//! a lost prompt still auto-escalates when the response window closes.

use crate::domain::error::{SafetyError, SafetyResult};
use crate::domain::types::{epoch_ms, ResponseAction, SessionId};
use crate::infra::config::Config;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interactive prompt asking the traveler to confirm safety
#[derive(Debug, Clone, Serialize)]
pub struct Prompt {
    pub session_id: SessionId,
    pub title: String,
    pub body: String,
    pub actions: Vec<&'static str>,
    /// Epoch ms after which the prompt auto-escalates
    pub expires_at: u64,
}

impl Prompt {
    /// Build the deviation prompt for a session
    pub fn deviation(session_id: SessionId, distance_m: f64, window: Duration) -> Self {
        Self {
            session_id,
            title: "Are you safe?".to_string(),
            body: format!(
                "You are {:.0} m from your destination. Your contacts will be alerted in {} s unless you respond.",
                distance_m,
                window.as_secs()
            ),
            actions: vec![ResponseAction::SendAlert.as_str(), ResponseAction::ConfirmSafe.as_str()],
            expires_at: epoch_ms() + window.as_millis() as u64,
        }
    }
}

/// Handle to a scheduled prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptHandle(pub String);

/// Notification gateway collaborator
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn schedule(&self, prompt: &Prompt) -> SafetyResult<PromptHandle>;

    /// Withdraw a prompt once its session has resolved (best effort)
    async fn dismiss(&self, handle: &PromptHandle) -> SafetyResult<()>;
}

#[derive(Debug, Serialize)]
struct DismissPayload<'a> {
    session_id: &'a str,
    dismiss: bool,
}

/// MQTT-backed prompt gateway
pub struct MqttPromptGateway {
    client: AsyncClient,
    topic: String,
}

impl MqttPromptGateway {
    /// Create the gateway and spawn its connection event loop
    pub fn new(config: &Config) -> Self {
        let client_id = format!("{}-prompts-{}", config.mqtt_client_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 32);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("prompt_gateway_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("prompt_gateway_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "prompt_gateway_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, topic: config.topics().prompts.clone() }
    }

    async fn publish(&self, payload: Vec<u8>) -> SafetyResult<()> {
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| SafetyError::network("notification gateway", e))
    }
}

#[async_trait]
impl NotificationGateway for MqttPromptGateway {
    async fn schedule(&self, prompt: &Prompt) -> SafetyResult<PromptHandle> {
        let payload =
            serde_json::to_vec(prompt).map_err(|e| SafetyError::InvalidPayload(e.to_string()))?;
        self.publish(payload).await?;
        debug!(session_id = %prompt.session_id, topic = %self.topic, "prompt_published");
        Ok(PromptHandle(prompt.session_id.to_string()))
    }

    async fn dismiss(&self, handle: &PromptHandle) -> SafetyResult<()> {
        let payload = serde_json::to_vec(&DismissPayload { session_id: &handle.0, dismiss: true })
            .map_err(|e| SafetyError::InvalidPayload(e.to_string()))?;
        self.publish(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deviation_prompt() {
        let id = SessionId::new();
        let prompt = Prompt::deviation(id, 1234.4, Duration::from_secs(30));
        assert_eq!(prompt.session_id, id);
        assert!(prompt.body.contains("1234 m"));
        assert!(prompt.body.contains("30 s"));
        assert_eq!(prompt.actions, vec!["send-alert", "confirm-safe"]);
    }

    #[test]
    fn test_prompt_serializes_session_id_as_string() {
        let id = SessionId::new();
        let prompt = Prompt::deviation(id, 1500.0, Duration::from_secs(30));
        let json: serde_json::Value = serde_json::to_value(&prompt).unwrap();
        assert_eq!(json["session_id"], serde_json::Value::String(id.to_string()));
        assert_eq!(json["actions"][0], "send-alert");
    }
}
