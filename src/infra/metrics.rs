//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free. `report()` swaps the windowed counters
//! for the periodic log; `snapshot()` only loads, for scrapers that expect
//! monotonic series.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::session::EscalationState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a value using binary search
#[inline]
fn bucket_index(value: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < value)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Where an alert originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSource {
    /// Response window expired
    Auto,
    /// Traveler chose "send alert" on the prompt
    Manual,
    /// Voice trigger with audio evidence
    Voice,
    /// Explicit panic button
    Panic,
}

impl AlertSource {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSource::Auto => "auto",
            AlertSource::Manual => "manual",
            AlertSource::Voice => "voice",
            AlertSource::Panic => "panic",
        }
    }
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps the windowed counters; every
/// other counter is monotonic.
pub struct Metrics {
    /// Total stimuli ever processed (monotonic)
    events_total: AtomicU64,
    /// Processing latency histogram buckets (monotonic)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of processing latencies in microseconds (monotonic)
    latency_sum_total_us: AtomicU64,
    /// Stimuli since last report (reset on report)
    events_since_report: AtomicU64,
    /// Sum of processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max processing latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Processing latency buckets for the report window (reset on report)
    window_buckets: [AtomicU64; NUM_BUCKETS],
    /// Position samples received (monotonic)
    positions_total: AtomicU64,
    /// Deviations raised (monotonic)
    deviations_raised: AtomicU64,
    /// Qualifying deviations suppressed by the cooldown (monotonic)
    deviations_suppressed: AtomicU64,
    /// Escalation sessions opened (monotonic)
    escalations_opened: AtomicU64,
    /// Deviations ignored because a session was already pending (monotonic)
    escalations_ignored: AtomicU64,
    /// Sessions resolved safe (monotonic)
    outcome_safe: AtomicU64,
    /// Sessions auto-escalated on timeout (monotonic)
    outcome_auto: AtomicU64,
    /// Sessions escalated by the traveler or the panic button (monotonic)
    outcome_manual: AtomicU64,
    /// Alerts handed to the dispatcher, by source (monotonic)
    alerts_auto: AtomicU64,
    alerts_manual: AtomicU64,
    alerts_voice: AtomicU64,
    alerts_panic: AtomicU64,
    /// Dispatch outcomes (monotonic)
    dispatch_sent: AtomicU64,
    dispatch_unavailable: AtomicU64,
    dispatch_no_contacts: AtomicU64,
    dispatch_failed: AtomicU64,
    /// Dispatch latency histogram in milliseconds (cumulative)
    dispatch_latency_buckets: [AtomicU64; NUM_BUCKETS],
    dispatch_latency_sum_ms: AtomicU64,
    /// Voice triggers that started a recording (monotonic)
    voice_triggers_accepted: AtomicU64,
    /// Voice triggers ignored by debounce or busy pipeline (monotonic)
    voice_triggers_ignored: AtomicU64,
    /// Recording cycles that failed during capture (monotonic)
    recordings_failed: AtomicU64,
    /// Evidence uploads that failed (monotonic)
    uploads_failed: AtomicU64,
    /// Inbound messages dropped due to channel full (monotonic)
    events_dropped: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_total: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_total_us: AtomicU64::new(0),
            events_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            window_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            positions_total: AtomicU64::new(0),
            deviations_raised: AtomicU64::new(0),
            deviations_suppressed: AtomicU64::new(0),
            escalations_opened: AtomicU64::new(0),
            escalations_ignored: AtomicU64::new(0),
            outcome_safe: AtomicU64::new(0),
            outcome_auto: AtomicU64::new(0),
            outcome_manual: AtomicU64::new(0),
            alerts_auto: AtomicU64::new(0),
            alerts_manual: AtomicU64::new(0),
            alerts_voice: AtomicU64::new(0),
            alerts_panic: AtomicU64::new(0),
            dispatch_sent: AtomicU64::new(0),
            dispatch_unavailable: AtomicU64::new(0),
            dispatch_no_contacts: AtomicU64::new(0),
            dispatch_failed: AtomicU64::new(0),
            dispatch_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            dispatch_latency_sum_ms: AtomicU64::new(0),
            voice_triggers_accepted: AtomicU64::new(0),
            voice_triggers_ignored: AtomicU64::new(0),
            recordings_failed: AtomicU64::new(0),
            uploads_failed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a stimulus was processed with given latency (lock-free)
    #[inline]
    pub fn record_event_processed(&self, latency_us: u64) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_total_us.fetch_add(latency_us, Ordering::Relaxed);
        self.events_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.window_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_position(&self) {
        self.positions_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_deviation_raised(&self) {
        self.deviations_raised.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_deviation_suppressed(&self) {
        self.deviations_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_escalation_opened(&self) {
        self.escalations_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_escalation_ignored(&self) {
        self.escalations_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the terminal state of an escalation session
    #[inline]
    pub fn record_outcome(&self, state: EscalationState) {
        let counter = match state {
            EscalationState::Safe => &self.outcome_safe,
            EscalationState::AutoAlert => &self.outcome_auto,
            EscalationState::ManualAlert => &self.outcome_manual,
            EscalationState::PendingResponse => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an alert being handed to the dispatcher
    #[inline]
    pub fn record_alert(&self, source: AlertSource) {
        let counter = match source {
            AlertSource::Auto => &self.alerts_auto,
            AlertSource::Manual => &self.alerts_manual,
            AlertSource::Voice => &self.alerts_voice,
            AlertSource::Panic => &self.alerts_panic,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dispatch outcome by label (sent, unavailable, no_contacts, failed)
    #[inline]
    pub fn record_dispatch(&self, outcome: &str, latency_ms: u64) {
        let counter = match outcome {
            "sent" => &self.dispatch_sent,
            "unavailable" => &self.dispatch_unavailable,
            "no_contacts" => &self.dispatch_no_contacts,
            _ => &self.dispatch_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let bucket = bucket_index(latency_ms);
        self.dispatch_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.dispatch_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_voice_trigger(&self, accepted: bool) {
        if accepted {
            self.voice_triggers_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.voice_triggers_ignored.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_recording_failed(&self) {
        self.recordings_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_upload_failed(&self) {
        self.uploads_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total stimuli processed
    #[inline]
    pub fn events_total(&self) -> u64 {
        self.events_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn deviations_raised(&self) -> u64 {
        self.deviations_raised.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn escalations_opened(&self) -> u64 {
        self.escalations_opened.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn voice_triggers_accepted(&self) -> u64 {
        self.voice_triggers_accepted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dispatch_sent(&self) -> u64 {
        self.dispatch_sent.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset the windowed counters
    ///
    /// Used by the periodic logger only. Rate, average, max and percentiles
    /// cover the time since the previous report.
    pub fn report(&self, escalation_pending: bool, voice_state: &'static str) -> MetricsSummary {
        let events_count = self.events_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let window = swap_buckets(&self.window_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let events_per_sec = if elapsed.as_secs_f64() > 0.0 {
            events_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let mut summary = self.summary(escalation_pending, voice_state);
        summary.events_per_sec = events_per_sec;
        summary.avg_process_latency_us =
            if events_count > 0 { latency_sum / events_count } else { 0 };
        summary.max_process_latency_us = max_latency;
        summary.lat_p50_us = percentile_from_buckets(&window, 0.50);
        summary.lat_p99_us = percentile_from_buckets(&window, 0.99);
        summary
    }

    /// Cumulative view without resetting anything (Prometheus scrapes)
    pub fn snapshot(&self, escalation_pending: bool, voice_state: &'static str) -> MetricsSummary {
        let mut summary = self.summary(escalation_pending, voice_state);
        let count: u64 = summary.lat_buckets.iter().sum();
        summary.avg_process_latency_us = if count > 0 { summary.lat_sum_us / count } else { 0 };
        summary.max_process_latency_us = self.latency_max_us.load(Ordering::Relaxed);
        summary.lat_p50_us = percentile_from_buckets(&summary.lat_buckets, 0.50);
        summary.lat_p99_us = percentile_from_buckets(&summary.lat_buckets, 0.99);
        summary
    }

    /// Monotonic counters and histograms
    fn summary(&self, escalation_pending: bool, voice_state: &'static str) -> MetricsSummary {
        let dispatch_lat_buckets = load_buckets(&self.dispatch_latency_buckets);
        let dispatch_count: u64 = dispatch_lat_buckets.iter().sum();
        let dispatch_lat_sum_ms = self.dispatch_latency_sum_ms.load(Ordering::Relaxed);
        let dispatch_lat_avg_ms =
            if dispatch_count > 0 { dispatch_lat_sum_ms / dispatch_count } else { 0 };

        MetricsSummary {
            events_total: self.events_total.load(Ordering::Relaxed),
            events_per_sec: 0.0,
            avg_process_latency_us: 0,
            max_process_latency_us: 0,
            lat_buckets: load_buckets(&self.latency_buckets),
            lat_sum_us: self.latency_sum_total_us.load(Ordering::Relaxed),
            lat_p50_us: 0,
            lat_p99_us: 0,
            positions_total: self.positions_total.load(Ordering::Relaxed),
            deviations_raised: self.deviations_raised.load(Ordering::Relaxed),
            deviations_suppressed: self.deviations_suppressed.load(Ordering::Relaxed),
            escalations_opened: self.escalations_opened.load(Ordering::Relaxed),
            escalations_ignored: self.escalations_ignored.load(Ordering::Relaxed),
            escalation_pending,
            outcome_safe: self.outcome_safe.load(Ordering::Relaxed),
            outcome_auto: self.outcome_auto.load(Ordering::Relaxed),
            outcome_manual: self.outcome_manual.load(Ordering::Relaxed),
            alerts_auto: self.alerts_auto.load(Ordering::Relaxed),
            alerts_manual: self.alerts_manual.load(Ordering::Relaxed),
            alerts_voice: self.alerts_voice.load(Ordering::Relaxed),
            alerts_panic: self.alerts_panic.load(Ordering::Relaxed),
            dispatch_sent: self.dispatch_sent.load(Ordering::Relaxed),
            dispatch_unavailable: self.dispatch_unavailable.load(Ordering::Relaxed),
            dispatch_no_contacts: self.dispatch_no_contacts.load(Ordering::Relaxed),
            dispatch_failed: self.dispatch_failed.load(Ordering::Relaxed),
            dispatch_lat_buckets,
            dispatch_lat_sum_ms,
            dispatch_lat_avg_ms,
            voice_state,
            voice_triggers_accepted: self.voice_triggers_accepted.load(Ordering::Relaxed),
            voice_triggers_ignored: self.voice_triggers_ignored.load(Ordering::Relaxed),
            recordings_failed: self.recordings_failed.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub events_total: u64,
    pub events_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    /// Stimulus processing latency histogram buckets (µs, cumulative)
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_sum_us: u64,
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub positions_total: u64,
    pub deviations_raised: u64,
    pub deviations_suppressed: u64,
    pub escalations_opened: u64,
    pub escalations_ignored: u64,
    /// Whether an escalation session is currently pending
    pub escalation_pending: bool,
    pub outcome_safe: u64,
    pub outcome_auto: u64,
    pub outcome_manual: u64,
    pub alerts_auto: u64,
    pub alerts_manual: u64,
    pub alerts_voice: u64,
    pub alerts_panic: u64,
    pub dispatch_sent: u64,
    pub dispatch_unavailable: u64,
    pub dispatch_no_contacts: u64,
    pub dispatch_failed: u64,
    /// Dispatch latency histogram buckets (ms)
    pub dispatch_lat_buckets: [u64; NUM_BUCKETS],
    pub dispatch_lat_sum_ms: u64,
    pub dispatch_lat_avg_ms: u64,
    pub voice_state: &'static str,
    pub voice_triggers_accepted: u64,
    pub voice_triggers_ignored: u64,
    pub recordings_failed: u64,
    pub uploads_failed: u64,
    pub events_dropped: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events_total = %self.events_total,
            events_per_sec = format!("{:.2}", self.events_per_sec),
            p99_us = %self.lat_p99_us,
            positions = %self.positions_total,
            deviations = %self.deviations_raised,
            suppressed = %self.deviations_suppressed,
            escalations = %self.escalations_opened,
            pending = %self.escalation_pending,
            safe = %self.outcome_safe,
            auto = %self.outcome_auto,
            manual = %self.outcome_manual,
            panic = %self.alerts_panic,
            sent = %self.dispatch_sent,
            failed = %self.dispatch_failed,
            voice_state = %self.voice_state,
            voice_triggers = %self.voice_triggers_accepted,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.events_total(), 0);
        assert_eq!(metrics.deviations_raised(), 0);
    }

    #[test]
    fn test_record_event() {
        let metrics = Metrics::new();

        metrics.record_event_processed(100);
        metrics.record_event_processed(500);
        metrics.record_event_processed(50);

        assert_eq!(metrics.events_total(), 3);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 500);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_event_processed(150);
        metrics.record_deviation_raised();

        let summary = metrics.report(true, "idle");
        assert_eq!(summary.events_total, 1);
        assert_eq!(summary.avg_process_latency_us, 150);
        assert_eq!(summary.deviations_raised, 1);
        assert!(summary.escalation_pending);

        // Periodic counters reset, monotonic ones do not
        let summary = metrics.report(false, "idle");
        assert_eq!(summary.avg_process_latency_us, 0);
        assert_eq!(summary.events_total, 1);
        assert_eq!(summary.deviations_raised, 1);
    }

    #[test]
    fn test_dispatch_outcomes() {
        let metrics = Metrics::new();
        metrics.record_dispatch("sent", 300);
        metrics.record_dispatch("no_contacts", 0);
        metrics.record_dispatch("failed", 900);
        metrics.record_dispatch("unavailable", 0);

        let summary = metrics.report(false, "idle");
        assert_eq!(summary.dispatch_sent, 1);
        assert_eq!(summary.dispatch_no_contacts, 1);
        assert_eq!(summary.dispatch_failed, 1);
        assert_eq!(summary.dispatch_unavailable, 1);
        assert_eq!(summary.dispatch_lat_avg_ms, 300);
    }

    #[test]
    fn test_alert_sources_and_outcomes_are_separate() {
        let metrics = Metrics::new();
        metrics.record_alert(AlertSource::Auto);
        metrics.record_alert(AlertSource::Panic);
        metrics.record_alert(AlertSource::Voice);
        metrics.record_outcome(EscalationState::AutoAlert);
        metrics.record_outcome(EscalationState::ManualAlert);
        metrics.record_outcome(EscalationState::PendingResponse);

        let summary = metrics.report(false, "idle");
        assert_eq!(summary.alerts_auto, 1);
        assert_eq!(summary.alerts_panic, 1);
        assert_eq!(summary.alerts_voice, 1);
        assert_eq!(summary.alerts_manual, 0);
        assert_eq!(summary.outcome_auto, 1);
        assert_eq!(summary.outcome_manual, 1);
        assert_eq!(summary.outcome_safe, 0);
    }

    #[test]
    fn test_snapshot_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_event_processed(150);

        let first = metrics.snapshot(false, "idle");
        let second = metrics.snapshot(false, "idle");
        assert_eq!(first.lat_buckets.iter().sum::<u64>(), 1);
        assert_eq!(second.lat_buckets.iter().sum::<u64>(), 1);
        assert_eq!(second.lat_sum_us, 150);

        // Scrapes leave the report window intact
        let report = metrics.report(false, "idle");
        assert_eq!(report.avg_process_latency_us, 150);
        assert_eq!(report.max_process_latency_us, 150);

        // and the periodic reset leaves the cumulative histogram intact
        let after = metrics.snapshot(false, "idle");
        assert_eq!(after.lat_buckets.iter().sum::<u64>(), 1);
        assert_eq!(after.avg_process_latency_us, 150);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_event_processed(i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.events_total(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_event_processed(150);
        }

        let summary = metrics.report(false, "idle");
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }
}
