//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::types::{Coordinate, Destination, EmergencyContact};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Upper bound for configured windows; keeps deadline arithmetic in range
const MAX_WINDOW_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct TravelerConfig {
    #[serde(default = "default_traveler_name")]
    pub name: String,
}

impl Default for TravelerConfig {
    fn default() -> Self {
        Self { name: default_traveler_name() }
    }
}

fn default_traveler_name() -> String {
    "Traveler".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub topics: TopicsConfig,
}

fn default_client_id() -> String {
    "tripguard".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    /// Position feed samples (inbound)
    #[serde(default = "default_position_topic")]
    pub position: String,
    /// Destination set/clear messages (inbound)
    #[serde(default = "default_destination_topic")]
    pub destination: String,
    /// Recognized utterances from the speech recognizer (inbound)
    #[serde(default = "default_speech_topic")]
    pub speech: String,
    /// Prompt responses from the notification gateway (inbound)
    #[serde(default = "default_responses_topic")]
    pub responses: String,
    /// Panic button presses (inbound)
    #[serde(default = "default_panic_topic")]
    pub panic: String,
    /// Interactive prompts (outbound)
    #[serde(default = "default_prompts_topic")]
    pub prompts: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            position: default_position_topic(),
            destination: default_destination_topic(),
            speech: default_speech_topic(),
            responses: default_responses_topic(),
            panic: default_panic_topic(),
            prompts: default_prompts_topic(),
        }
    }
}

fn default_position_topic() -> String {
    "tripguard/position".to_string()
}

fn default_destination_topic() -> String {
    "tripguard/destination".to_string()
}

fn default_speech_topic() -> String {
    "tripguard/speech".to_string()
}

fn default_responses_topic() -> String {
    "tripguard/responses".to_string()
}

fn default_panic_topic() -> String {
    "tripguard/panic".to_string()
}

fn default_prompts_topic() -> String {
    "tripguard/prompts".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviationConfig {
    /// Distance from destination (meters) above which a deviation is raised
    #[serde(default = "default_threshold_m")]
    pub threshold_m: f64,
    /// Minimum time between two raised deviations
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for DeviationConfig {
    fn default() -> Self {
        Self { threshold_m: default_threshold_m(), cooldown_secs: default_cooldown_secs() }
    }
}

fn default_threshold_m() -> f64 {
    1000.0
}

fn default_cooldown_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_response_window_secs")]
    pub response_window_secs: u64,
    /// Timeout for scheduling the interactive prompt
    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            response_window_secs: default_response_window_secs(),
            prompt_timeout_ms: default_prompt_timeout_ms(),
        }
    }
}

fn default_response_window_secs() -> u64 {
    30
}

fn default_prompt_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_voice_enabled")]
    pub enabled: bool,
    #[serde(default = "default_trigger_phrases")]
    pub trigger_phrases: Vec<String>,
    #[serde(default = "default_recording_secs")]
    pub recording_secs: u64,
    /// Added to the recording duration to form the debounce window
    #[serde(default = "default_debounce_buffer_secs")]
    pub debounce_buffer_secs: u64,
    /// ALSA capture device passed to arecord
    #[serde(default = "default_recorder_device")]
    pub recorder_device: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: default_voice_enabled(),
            trigger_phrases: default_trigger_phrases(),
            recording_secs: default_recording_secs(),
            debounce_buffer_secs: default_debounce_buffer_secs(),
            recorder_device: default_recorder_device(),
            content_type: default_content_type(),
        }
    }
}

fn default_voice_enabled() -> bool {
    true
}

fn default_trigger_phrases() -> Vec<String> {
    vec!["help".to_string(), "help me".to_string(), "emergency".to_string()]
}

fn default_recording_secs() -> u64 {
    15
}

fn default_debounce_buffer_secs() -> u64 {
    1
}

fn default_recorder_device() -> String {
    "default".to_string()
}

fn default_content_type() -> String {
    "audio/wav".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// SMS gateway endpoint; absent means the channel is unavailable
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_delivery_timeout_ms")]
    pub timeout_ms: u64,
    /// Prefix for contact numbers that do not start with '+'
    #[serde(default)]
    pub default_country_code: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self { url: None, timeout_ms: default_delivery_timeout_ms(), default_country_code: None }
    }
}

fn default_delivery_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub upload_url: Option<String>,
    /// Base for shareable links when the upload response carries no URL
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default = "default_storage_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { upload_url: None, public_base_url: None, timeout_ms: default_storage_timeout_ms() }
    }
}

fn default_storage_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_geocoding_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self { url: None, timeout_ms: default_geocoding_timeout_ms() }
    }
}

fn default_geocoding_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct TripDestinationConfig {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TripConfig {
    #[serde(default)]
    pub destination: Option<TripDestinationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

fn default_prometheus_port() -> u16 {
    9464
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for incident egress (JSONL format); empty disables it
    #[serde(default = "default_egress_file")]
    pub file: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { file: default_egress_file() }
    }
}

fn default_egress_file() -> String {
    "incidents.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub traveler: TravelerConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub deviation: DeviationConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub trip: TripConfig,
    #[serde(default)]
    pub contacts: Vec<ContactConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub egress: EgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    traveler_name: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_client_id: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    topics: TopicsConfig,
    deviation_threshold_m: f64,
    cooldown_secs: u64,
    response_window_secs: u64,
    prompt_timeout_ms: u64,
    voice_enabled: bool,
    trigger_phrases: Vec<String>,
    recording_secs: u64,
    debounce_buffer_secs: u64,
    recorder_device: String,
    audio_content_type: String,
    delivery_url: Option<String>,
    delivery_timeout_ms: u64,
    default_country_code: Option<String>,
    storage_upload_url: Option<String>,
    storage_public_base_url: Option<String>,
    storage_timeout_ms: u64,
    geocoding_url: Option<String>,
    geocoding_timeout_ms: u64,
    trip_destination: Option<Destination>,
    contacts: Vec<EmergencyContact>,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    egress_file: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        let voice = VoiceConfig::default();
        let delivery = DeliveryConfig::default();
        let storage = StorageConfig::default();
        let geocoding = GeocodingConfig::default();
        Self {
            traveler_name: default_traveler_name(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: default_client_id(),
            mqtt_username: None,
            mqtt_password: None,
            topics: TopicsConfig::default(),
            deviation_threshold_m: default_threshold_m(),
            cooldown_secs: default_cooldown_secs(),
            response_window_secs: default_response_window_secs(),
            prompt_timeout_ms: default_prompt_timeout_ms(),
            voice_enabled: voice.enabled,
            trigger_phrases: voice.trigger_phrases,
            recording_secs: voice.recording_secs,
            debounce_buffer_secs: voice.debounce_buffer_secs,
            recorder_device: voice.recorder_device,
            audio_content_type: voice.content_type,
            delivery_url: delivery.url,
            delivery_timeout_ms: delivery.timeout_ms,
            default_country_code: delivery.default_country_code,
            storage_upload_url: storage.upload_url,
            storage_public_base_url: storage.public_base_url,
            storage_timeout_ms: storage.timeout_ms,
            geocoding_url: geocoding.url,
            geocoding_timeout_ms: geocoding.timeout_ms,
            trip_destination: None,
            contacts: Vec::new(),
            metrics_interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
            egress_file: default_egress_file(),
            config_file: "default".to_string(),
        }
    }
}

/// Threshold and window sanity checks
fn validate_windows(config: &TomlConfig) -> anyhow::Result<()> {
    let threshold = config.deviation.threshold_m;
    anyhow::ensure!(
        threshold.is_finite() && threshold > 0.0,
        "deviation.threshold_m must be a positive number of meters, got {}",
        threshold
    );
    anyhow::ensure!(
        config.deviation.cooldown_secs <= MAX_WINDOW_SECS,
        "deviation.cooldown_secs must be at most {}",
        MAX_WINDOW_SECS
    );
    let window = config.escalation.response_window_secs;
    anyhow::ensure!(
        (1..=MAX_WINDOW_SECS).contains(&window),
        "escalation.response_window_secs must be between 1 and {}, got {}",
        MAX_WINDOW_SECS,
        window
    );
    let voice = &config.voice;
    anyhow::ensure!(
        (1..=MAX_WINDOW_SECS).contains(&voice.recording_secs),
        "voice.recording_secs must be between 1 and {}, got {}",
        MAX_WINDOW_SECS,
        voice.recording_secs
    );
    let debounce = voice.recording_secs.checked_add(voice.debounce_buffer_secs);
    anyhow::ensure!(
        debounce.is_some_and(|secs| secs <= MAX_WINDOW_SECS),
        "voice.recording_secs + voice.debounce_buffer_secs must be at most {}",
        MAX_WINDOW_SECS
    );
    Ok(())
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        // Default to dev.toml
        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        validate_windows(&toml_config)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;

        let trip_destination = match toml_config.trip.destination {
            Some(dest) => {
                let coordinate = Coordinate::new(dest.latitude, dest.longitude);
                anyhow::ensure!(
                    coordinate.is_valid(),
                    "Invalid trip destination ({}, {}) in {}",
                    dest.latitude,
                    dest.longitude,
                    path.display()
                );
                let label = dest.label.unwrap_or_else(|| "destination".to_string());
                Some(Destination::new(coordinate, label))
            }
            None => None,
        };

        // Contacts without an explicit id are numbered in file order
        let contacts = toml_config
            .contacts
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let id = c.id.unwrap_or_else(|| format!("contact-{}", i + 1));
                EmergencyContact::new(id, c.name, c.phone)
            })
            .collect();

        Ok(Self {
            traveler_name: toml_config.traveler.name,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_client_id: toml_config.mqtt.client_id,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            topics: toml_config.mqtt.topics,
            deviation_threshold_m: toml_config.deviation.threshold_m,
            cooldown_secs: toml_config.deviation.cooldown_secs,
            response_window_secs: toml_config.escalation.response_window_secs,
            prompt_timeout_ms: toml_config.escalation.prompt_timeout_ms,
            voice_enabled: toml_config.voice.enabled,
            trigger_phrases: toml_config.voice.trigger_phrases,
            recording_secs: toml_config.voice.recording_secs,
            debounce_buffer_secs: toml_config.voice.debounce_buffer_secs,
            recorder_device: toml_config.voice.recorder_device,
            audio_content_type: toml_config.voice.content_type,
            delivery_url: toml_config.delivery.url,
            delivery_timeout_ms: toml_config.delivery.timeout_ms,
            default_country_code: toml_config.delivery.default_country_code,
            storage_upload_url: toml_config.storage.upload_url,
            storage_public_base_url: toml_config.storage.public_base_url,
            storage_timeout_ms: toml_config.storage.timeout_ms,
            geocoding_url: toml_config.geocoding.url,
            geocoding_timeout_ms: toml_config.geocoding.timeout_ms,
            trip_destination,
            contacts,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            egress_file: toml_config.egress.file,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        let config_path = Self::resolve_config_path(args);
        Self::load_from_path(&config_path)
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn traveler_name(&self) -> &str {
        &self.traveler_name
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt_client_id
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn topics(&self) -> &TopicsConfig {
        &self.topics
    }

    pub fn deviation_threshold_m(&self) -> f64 {
        self.deviation_threshold_m
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn response_window(&self) -> Duration {
        Duration::from_secs(self.response_window_secs)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    pub fn voice_enabled(&self) -> bool {
        self.voice_enabled
    }

    pub fn trigger_phrases(&self) -> &[String] {
        &self.trigger_phrases
    }

    pub fn recording_duration(&self) -> Duration {
        Duration::from_secs(self.recording_secs)
    }

    /// Recording duration plus the fixed buffer
    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.recording_secs.saturating_add(self.debounce_buffer_secs))
    }

    pub fn recorder_device(&self) -> &str {
        &self.recorder_device
    }

    pub fn audio_content_type(&self) -> &str {
        &self.audio_content_type
    }

    pub fn delivery_url(&self) -> Option<&str> {
        self.delivery_url.as_deref()
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn default_country_code(&self) -> Option<&str> {
        self.default_country_code.as_deref()
    }

    pub fn storage_upload_url(&self) -> Option<&str> {
        self.storage_upload_url.as_deref()
    }

    pub fn storage_public_base_url(&self) -> Option<&str> {
        self.storage_public_base_url.as_deref()
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn geocoding_url(&self) -> Option<&str> {
        self.geocoding_url.as_deref()
    }

    pub fn geocoding_timeout(&self) -> Duration {
        Duration::from_millis(self.geocoding_timeout_ms)
    }

    pub fn trip_destination(&self) -> Option<&Destination> {
        self.trip_destination.as_ref()
    }

    pub fn contacts(&self) -> &[EmergencyContact] {
        &self.contacts
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to set the emergency contact snapshot
    pub fn with_contacts(mut self, contacts: Vec<EmergencyContact>) -> Self {
        self.contacts = contacts;
        self
    }

    /// Builder method to set the deviation threshold
    pub fn with_deviation_threshold_m(mut self, meters: f64) -> Self {
        self.deviation_threshold_m = meters;
        self
    }

    /// Builder method to set the traveler display name
    pub fn with_traveler_name(mut self, name: &str) -> Self {
        self.traveler_name = name.to_string();
        self
    }

    /// Builder method to set the incident egress file
    pub fn with_egress_file(mut self, file: &str) -> Self {
        self.egress_file = file.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.deviation_threshold_m(), 1000.0);
        assert_eq!(config.cooldown(), Duration::from_secs(60));
        assert_eq!(config.response_window(), Duration::from_secs(30));
        assert_eq!(config.recording_duration(), Duration::from_secs(15));
        assert_eq!(config.debounce_window(), Duration::from_secs(16));
        assert!(config.contacts().is_empty());
        assert!(config.delivery_url().is_none());
    }

    #[test]
    fn test_default_topics() {
        let config = Config::default();
        assert_eq!(config.topics().position, "tripguard/position");
        assert_eq!(config.topics().prompts, "tripguard/prompts");
        assert_eq!(config.topics().responses, "tripguard/responses");
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["tripguard".to_string()];
        // CONFIG_FILE may be set in the environment; only check when it is not
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "tripguard".to_string(),
            "--config".to_string(),
            "config/mumbai.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/mumbai.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["tripguard".to_string(), "--config=config/pune.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/pune.toml");
    }

    #[test]
    fn test_egress_file_default() {
        let egress = EgressConfig::default();
        assert_eq!(egress.file, "incidents.jsonl");

        let config = Config::default();
        assert_eq!(config.egress_file(), "incidents.jsonl");
    }

    #[test]
    fn test_builders() {
        let config = Config::default()
            .with_deviation_threshold_m(500.0)
            .with_traveler_name("Priya")
            .with_contacts(vec![EmergencyContact::new("1", "Asha", "+919800000001")]);
        assert_eq!(config.deviation_threshold_m(), 500.0);
        assert_eq!(config.traveler_name(), "Priya");
        assert_eq!(config.contacts().len(), 1);
    }
}
