//! Incident egress - appends safety incidents to file
//!
//! Incidents are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::types::Coordinate;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// One line in the incident log
#[derive(Debug, Clone, Serialize)]
pub struct IncidentRecord {
    /// RFC 3339 UTC timestamp
    pub ts: String,
    /// escalation, voice, dispatch, panic
    pub kind: &'static str,
    /// Terminal state or dispatch outcome
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IncidentRecord {
    pub fn new(kind: &'static str, outcome: &str) -> Self {
        Self::at(Utc::now(), kind, outcome)
    }

    pub fn at(ts: DateTime<Utc>, kind: &'static str, outcome: &str) -> Self {
        Self {
            ts: ts.to_rfc3339_opts(SecondsFormat::Millis, true),
            kind,
            outcome: outcome.to_string(),
            session_id: None,
            source: None,
            distance_m: None,
            lat: None,
            lon: None,
            evidence_url: None,
            error: None,
        }
    }

    pub fn with_session(mut self, session_id: impl ToString) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_source(mut self, source: &'static str) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_distance(mut self, distance_m: f64) -> Self {
        self.distance_m = Some(distance_m.round());
        self
    }

    pub fn with_coordinate(mut self, coordinate: Option<&Coordinate>) -> Self {
        if let Some(c) = coordinate {
            self.lat = Some(c.latitude);
            self.lon = Some(c.longitude);
        }
        self
    }

    pub fn with_evidence(mut self, url: &str) -> Self {
        self.evidence_url = Some(url.to_string());
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Egress writer for incidents
pub struct IncidentLog {
    file_path: String,
}

impl IncidentLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "incident_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Append an incident. Returns true if successful, false otherwise
    pub fn write(&self, record: &IncidentRecord) -> bool {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, kind = %record.kind, "incident_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                debug!(kind = %record.kind, outcome = %record.outcome, "incident_written");
                true
            }
            Err(e) => {
                error!(kind = %record.kind, error = %e, "incident_write_failed");
                false
            }
        }
    }

    /// Append a line to the incident file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
