//! IO modules - external system interfaces
//!
//! This module contains every collaborator seam and its concrete adapter:
//! - `mqtt` - MQTT client for receiving traveler stimuli
//! - `notify` - Interactive prompt gateway (MQTT)
//! - `sms` - Alert delivery channel (HTTP SMS gateway)
//! - `blob` - Evidence upload (HTTP blob storage)
//! - `recorder` - Fixed-duration audio capture
//! - `geocode` - Address to destination lookup
//! - `incidents` - Incident output to file (JSONL format)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod blob;
pub mod geocode;
pub mod incidents;
pub mod mqtt;
pub mod notify;
pub mod prometheus;
pub mod recorder;
pub mod sms;

// Re-export commonly used types
pub use blob::{BlobStorage, HttpBlobStorage};
pub use geocode::{Geocoder, HttpGeocoder};
pub use incidents::{IncidentLog, IncidentRecord};
pub use notify::{MqttPromptGateway, NotificationGateway, Prompt, PromptHandle};
pub use recorder::{ArecordRecorder, AudioRecorder};
pub use sms::{DeliveryChannel, HttpSmsChannel};
