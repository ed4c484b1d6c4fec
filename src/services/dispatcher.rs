//! Alert dispatch to emergency contacts
//!
//! One batched send per alert, no internal retry. Callers report the
//! outcome and never re-invoke automatically.

use crate::domain::error::{with_timeout, SafetyError};
use crate::domain::types::{Coordinate, EmergencyContact};
use crate::io::sms::DeliveryChannel;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Fallback label when no destination is set
const UNKNOWN_LOCATION: &str = "unknown location";

/// Outcome of one dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Delivery channel not usable on this device
    Unavailable,
    /// Empty contact list; nothing was sent
    NoContacts,
    /// The send attempt raised an error
    Failed(String),
}

impl DispatchOutcome {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Sent => "sent",
            DispatchOutcome::Unavailable => "unavailable",
            DispatchOutcome::NoContacts => "no_contacts",
            DispatchOutcome::Failed(_) => "failed",
        }
    }
}

/// Outcome of a dispatch plus the time spent in the delivery channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcome: DispatchOutcome,
    /// Zero when no send was attempted
    pub latency_ms: u64,
}

impl DispatchReport {
    fn skipped(outcome: DispatchOutcome) -> Self {
        Self { outcome, latency_ms: 0 }
    }
}

/// Inputs to the emergency message template
#[derive(Debug, Clone)]
pub struct AlertMessage<'a> {
    pub traveler_name: &'a str,
    pub destination_label: Option<&'a str>,
    pub coordinate: Option<&'a Coordinate>,
    pub evidence_url: Option<&'a str>,
}

impl AlertMessage<'_> {
    /// Render the fixed message structure
    pub fn render(&self) -> String {
        let label = self.destination_label.filter(|l| !l.trim().is_empty()).unwrap_or(UNKNOWN_LOCATION);
        let location = match self.coordinate {
            Some(c) => c.map_link(),
            None => "unavailable".to_string(),
        };
        let mut message = format!(
            "EMERGENCY: {} may be in danger while travelling to {}. Last known location: {}",
            self.traveler_name, label, location
        );
        if let Some(url) = self.evidence_url {
            message.push_str(" Audio evidence: ");
            message.push_str(url);
        }
        message
    }
}

/// Apply the default country code to numbers without an international prefix
pub fn normalize_number(number: &str, default_country_code: Option<&str>) -> String {
    let trimmed: String = number.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
    match default_country_code {
        Some(code) if !trimmed.starts_with('+') => {
            let code = code.trim_start_matches('+');
            let local = trimmed.trim_start_matches('0');
            format!("+{}{}", code, local)
        }
        _ => trimmed,
    }
}

pub struct AlertDispatcher {
    channel: Arc<dyn DeliveryChannel>,
    timeout: Duration,
    default_country_code: Option<String>,
}

impl AlertDispatcher {
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        timeout: Duration,
        default_country_code: Option<&str>,
    ) -> Self {
        Self { channel, timeout, default_country_code: default_country_code.map(str::to_string) }
    }

    /// Send `message` to every contact in one batched attempt
    pub async fn dispatch(&self, contacts: &[EmergencyContact], message: &str) -> DispatchReport {
        if contacts.is_empty() {
            warn!("dispatch_no_contacts");
            return DispatchReport::skipped(DispatchOutcome::NoContacts);
        }

        if !self.channel.is_available() {
            error!(recipients = %contacts.len(), "dispatch_channel_unavailable");
            return DispatchReport::skipped(DispatchOutcome::Unavailable);
        }

        let numbers: Vec<String> = contacts
            .iter()
            .map(|c| normalize_number(&c.phone_number, self.default_country_code.as_deref()))
            .collect();

        let start = Instant::now();
        let result = with_timeout("sms", self.timeout, self.channel.send(&numbers, message)).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(()) => {
                info!(recipients = %numbers.len(), latency_ms = %latency_ms, "alert_dispatched");
                DispatchOutcome::Sent
            }
            Err(SafetyError::Unavailable(_)) => DispatchOutcome::Unavailable,
            Err(e) => {
                error!(error = %e, latency_ms = %latency_ms, "alert_dispatch_failed");
                DispatchOutcome::Failed(e.to_string())
            }
        };
        DispatchReport { outcome, latency_ms }
    }
}
