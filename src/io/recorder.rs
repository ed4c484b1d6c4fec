//! Fixed-duration audio capture via ALSA `arecord`
//!
//! The capture process is spawned with `kill_on_drop`, so the microphone is
//! released on every exit path: normal completion, error, timeout, or the
//! owning task being aborted during teardown.

use crate::domain::error::{SafetyError, SafetyResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Grace period on top of the clip length before the capture is abandoned
const CAPTURE_GRACE: Duration = Duration::from_secs(5);

/// Sample rate for evidence clips (speech quality)
const SAMPLE_RATE_HZ: u32 = 16_000;

/// Audio capture collaborator
#[async_trait]
pub trait AudioRecorder: Send + Sync {
    /// Record a clip of exactly `duration` and return the encoded bytes
    async fn record(&self, duration: Duration) -> SafetyResult<Bytes>;
}

pub struct ArecordRecorder {
    device: String,
    program: String,
}

impl ArecordRecorder {
    pub fn new(device: &str) -> Self {
        Self { device: device.to_string(), program: "arecord".to_string() }
    }

    /// Override the capture program (used for non-ALSA hosts)
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    fn command(&self, duration: Duration) -> Command {
        let secs = duration.as_secs().max(1);
        let mut cmd = Command::new(&self.program);
        cmd.args(["-q", "-D", self.device.as_str(), "-f", "S16_LE", "-c", "1", "-t", "wav"])
            .arg("-r")
            .arg(SAMPLE_RATE_HZ.to_string())
            .arg("-d")
            .arg(secs.to_string())
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Classify capture stderr output
fn classify_failure(stderr: &str) -> SafetyError {
    let lower = stderr.to_lowercase();
    if lower.contains("permission denied") || lower.contains("operation not permitted") {
        SafetyError::PermissionDenied { subsystem: "microphone" }
    } else {
        SafetyError::Recording(stderr.trim().to_string())
    }
}

#[async_trait]
impl AudioRecorder for ArecordRecorder {
    async fn record(&self, duration: Duration) -> SafetyResult<Bytes> {
        let child = self.command(duration).spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => SafetyError::Unavailable("recorder"),
            ErrorKind::PermissionDenied => SafetyError::PermissionDenied { subsystem: "microphone" },
            _ => SafetyError::Recording(e.to_string()),
        })?;

        debug!(device = %self.device, duration_secs = %duration.as_secs(), "capture_started");

        // Dropping the in-flight future drops the child, which kills it
        let output = match tokio::time::timeout(duration + CAPTURE_GRACE, child.wait_with_output())
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(SafetyError::Recording(e.to_string())),
            Err(_) => {
                warn!(device = %self.device, "capture_timed_out");
                return Err(SafetyError::Timeout {
                    service: "recorder",
                    timeout: duration + CAPTURE_GRACE,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        if output.stdout.is_empty() {
            return Err(SafetyError::Recording("capture produced no audio".to_string()));
        }

        info!(device = %self.device, bytes = %output.stdout.len(), "capture_completed");
        Ok(Bytes::from(output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_permission_denied() {
        let err = classify_failure("arecord: main:830: audio open error: Permission denied");
        assert!(matches!(err, SafetyError::PermissionDenied { subsystem: "microphone" }));
    }

    #[test]
    fn test_classify_other_failure() {
        let err = classify_failure("arecord: main:830: audio open error: No such file or directory\n");
        match err {
            SafetyError::Recording(msg) => assert!(msg.ends_with("No such file or directory")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let recorder =
            ArecordRecorder::new("default").with_program("/nonexistent/tripguard-arecord");
        let result = recorder.record(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(SafetyError::Unavailable("recorder"))));
    }
}
