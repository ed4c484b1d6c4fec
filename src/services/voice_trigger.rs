//! Voice-trigger capture pipeline
//!
//! Idle → Recording → Uploading → {Dispatched, Failed} → Idle.
//!
//! The pipeline only tracks state. Recording and upload run as tasks owned
//! by the engine; their handle is parked here so teardown can abort them,
//! which drops the capture process and releases the microphone. Completions
//! carry the cycle number they were started for and are discarded when it
//! no longer matches.

use crate::domain::error::SafetyError;
use crate::domain::session::{VoiceState, VoiceTriggerSession};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Case-insensitive, word-boundary phrase matcher
#[derive(Debug, Clone)]
pub struct TriggerMatcher {
    /// Each phrase pre-split into lowercase words
    phrases: Vec<Vec<String>>,
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl TriggerMatcher {
    pub fn new(phrases: &[String]) -> Self {
        let phrases = phrases.iter().map(|p| words(p)).filter(|w| !w.is_empty()).collect();
        Self { phrases }
    }

    /// First configured phrase found in the utterance, joined by single spaces
    pub fn find(&self, utterance: &str) -> Option<String> {
        let spoken = words(utterance);
        self.phrases
            .iter()
            .find(|phrase| spoken.windows(phrase.len()).any(|w| w == phrase.as_slice()))
            .map(|phrase| phrase.join(" "))
    }
}

/// Result of feeding an utterance into the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    /// No trigger phrase in the utterance
    NotTriggered,
    /// Phrase detected but the pipeline is disabled (microphone denied)
    Disabled,
    /// Phrase detected while a cycle is in flight
    Busy,
    /// Phrase detected inside the debounce window
    Debounced,
    /// New cycle accepted; the engine must start a recording
    StartRecording { cycle: u64, duration: Duration },
}

pub struct VoiceTriggerPipeline {
    matcher: TriggerMatcher,
    recording_duration: Duration,
    debounce_window: Duration,
    session: VoiceTriggerSession,
    /// Cleared once the microphone is denied; never re-enabled at runtime
    enabled: bool,
    /// In-flight recording or upload task
    task: Option<JoinHandle<()>>,
}

impl VoiceTriggerPipeline {
    pub fn new(
        matcher: TriggerMatcher,
        recording_duration: Duration,
        debounce_window: Duration,
        enabled: bool,
    ) -> Self {
        Self {
            matcher,
            recording_duration,
            debounce_window,
            session: VoiceTriggerSession::new(),
            enabled,
            task: None,
        }
    }

    pub fn state(&self) -> VoiceState {
        self.session.state
    }

    pub fn session(&self) -> &VoiceTriggerSession {
        &self.session
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn debounce_elapsed(&self, now: Instant) -> bool {
        match self.session.started_at {
            Some(started) => now.saturating_duration_since(started) >= self.debounce_window,
            None => true,
        }
    }

    /// Feed a recognized utterance
    pub fn on_utterance(&mut self, text: &str, now: Instant) -> TriggerDecision {
        let Some(phrase) = self.matcher.find(text) else {
            return TriggerDecision::NotTriggered;
        };

        if !self.enabled {
            debug!(phrase = %phrase, "voice_trigger_disabled");
            return TriggerDecision::Disabled;
        }
        if self.session.state != VoiceState::Idle {
            debug!(phrase = %phrase, state = %self.session.state.as_str(), "voice_trigger_busy");
            return TriggerDecision::Busy;
        }
        if !self.debounce_elapsed(now) {
            debug!(phrase = %phrase, "voice_trigger_debounced");
            return TriggerDecision::Debounced;
        }

        self.session.cycle += 1;
        self.session.state = VoiceState::Recording;
        self.session.started_at = Some(now);
        info!(
            phrase = %phrase,
            cycle = %self.session.cycle,
            duration_secs = %self.recording_duration.as_secs(),
            "voice_trigger_recording"
        );
        TriggerDecision::StartRecording {
            cycle: self.session.cycle,
            duration: self.recording_duration,
        }
    }

    /// Park the task running the current stage
    pub fn attach_task(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.task.replace(handle) {
            previous.abort();
        }
    }

    fn is_current(&self, cycle: u64, expected: VoiceState) -> bool {
        if cycle != self.session.cycle || self.session.state != expected {
            debug!(cycle = %cycle, current = %self.session.cycle, "voice_completion_stale");
            return false;
        }
        true
    }

    /// Recording finished. Returns true when the clip should be uploaded.
    pub fn on_recording_finished(&mut self, cycle: u64, result: Result<usize, &SafetyError>) -> bool {
        if !self.is_current(cycle, VoiceState::Recording) {
            return false;
        }
        self.task = None;
        match result {
            Ok(bytes) => {
                self.session.state = VoiceState::Uploading;
                info!(cycle = %cycle, bytes = %bytes, "voice_recording_complete");
                true
            }
            Err(e) => {
                if matches!(e, SafetyError::PermissionDenied { .. }) {
                    self.enabled = false;
                    error!(error = %e, "voice_pipeline_disabled");
                } else {
                    warn!(cycle = %cycle, error = %e, "voice_recording_failed");
                }
                self.fail();
                false
            }
        }
    }

    /// Upload finished. Returns true when the alert should be dispatched.
    pub fn on_upload_finished(&mut self, cycle: u64, result: Result<&str, &SafetyError>) -> bool {
        if !self.is_current(cycle, VoiceState::Uploading) {
            return false;
        }
        self.task = None;
        match result {
            Ok(url) => {
                self.session.state = VoiceState::Dispatched;
                info!(cycle = %cycle, url = %url, "voice_evidence_uploaded");
                self.session.state = VoiceState::Idle;
                true
            }
            Err(e) => {
                // No text-only fallback alert on this path
                warn!(cycle = %cycle, error = %e, "voice_upload_failed");
                self.fail();
                false
            }
        }
    }

    fn fail(&mut self) {
        self.session.state = VoiceState::Failed;
        debug!(cycle = %self.session.cycle, "voice_cycle_failed");
        self.session.state = VoiceState::Idle;
    }

    /// Abort any in-flight stage and return to Idle. Bumping the cycle
    /// turns completions already queued by the aborted task into no-ops.
    pub fn teardown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!(cycle = %self.session.cycle, "voice_cycle_aborted");
        }
        self.session.cycle += 1;
        self.session.state = VoiceState::Idle;
    }
}

impl Drop for VoiceTriggerPipeline {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
