//! Evidence upload to HTTP blob storage
//!
//! Clips are PUT to `{upload_url}/{object_name}`. The shareable link is taken
//! from a JSON `{"url": ...}` response body when present, otherwise built as
//! `{public_base_url}/{object_name}`.

use crate::domain::error::{SafetyError, SafetyResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{error, info};
use uuid::Uuid;

/// Blob storage collaborator
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Upload bytes and return a publicly shareable URL
    async fn upload(&self, data: Bytes, content_type: &str) -> SafetyResult<String>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    url: Option<String>,
}

/// File extension for a recorded clip
fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/mp4" | "audio/m4a" => "m4a",
        _ => "bin",
    }
}

/// Object name for a new evidence clip (time-sortable)
pub fn object_name(content_type: &str) -> String {
    format!("evidence-{}.{}", Uuid::now_v7(), extension_for(content_type))
}

pub struct HttpBlobStorage {
    upload_url: String,
    public_base_url: Option<String>,
    client: Option<reqwest::Client>,
}

impl HttpBlobStorage {
    pub fn new(upload_url: Option<&str>, public_base_url: Option<&str>, timeout: Duration) -> Self {
        let upload_url = upload_url.map(|u| u.trim_end_matches('/').to_string()).unwrap_or_default();
        let client = if upload_url.is_empty() {
            None
        } else {
            reqwest::Client::builder().timeout(timeout).build().ok()
        };
        Self {
            upload_url,
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
            client,
        }
    }

    /// Resolve the shareable link from the response body or the public base
    fn resolve_url(&self, body: &[u8], name: &str) -> SafetyResult<String> {
        if let Ok(UploadResponse { url: Some(url) }) = serde_json::from_slice(body) {
            return Ok(url);
        }
        match self.public_base_url {
            Some(ref base) => Ok(format!("{}/{}", base, name)),
            None => Err(SafetyError::InvalidPayload("upload response carried no url".to_string())),
        }
    }
}

#[async_trait]
impl BlobStorage for HttpBlobStorage {
    async fn upload(&self, data: Bytes, content_type: &str) -> SafetyResult<String> {
        let Some(ref client) = self.client else {
            return Err(SafetyError::Unavailable("blob storage"));
        };

        let name = object_name(content_type);
        let target = format!("{}/{}", self.upload_url, name);
        let size = data.len();
        let start = Instant::now();

        let response = client
            .put(&target)
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, object = %name, "evidence_upload_failed");
                SafetyError::network("upload", e)
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(status = %status.as_u16(), object = %name, "evidence_upload_rejected");
            return Err(SafetyError::network("upload", format!("storage returned {}", status)));
        }

        let body = response.bytes().await.map_err(|e| SafetyError::network("upload", e))?;
        let url = self.resolve_url(&body, &name)?;

        info!(
            object = %name,
            bytes = %size,
            latency_ms = %start.elapsed().as_millis(),
            "evidence_uploaded"
        );
        Ok(url)
    }
}
