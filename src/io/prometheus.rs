//! Prometheus metrics HTTP endpoint
//!
//! Exposes safety engine metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::engine::EngineStatus;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with device label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    device: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{device=\"{device}\"}} {val}");
}

/// Write a counter family split by one label
fn write_labelled_counter(
    output: &mut String,
    name: &str,
    help: &str,
    device: &str,
    label: &str,
    values: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (value, count) in values {
        let _ = writeln!(output, "{name}{{device=\"{device}\",{label}=\"{value}\"}} {count}");
    }
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    device: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{device=\"{device}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{device=\"{device}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{device=\"{device}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{device=\"{device}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
///
/// Reads a snapshot so scrapes never reset the periodic log window.
fn format_prometheus_metrics(metrics: &Metrics, status: &EngineStatus, device: &str) -> String {
    let summary = metrics.snapshot(status.escalation_pending, status.voice_state.as_str());
    let mut output = String::with_capacity(4096);

    write_core_metrics(&mut output, device, &summary);
    write_metric(
        &mut output,
        "tripguard_destination_set",
        "1 while a trip destination is configured",
        MetricType::Gauge,
        device,
        u64::from(status.destination_set),
    );
    write_escalation_metrics(&mut output, device, &summary);
    write_dispatch_metrics(&mut output, device, &summary);
    write_voice_metrics(&mut output, device, &summary, status.voice_enabled);

    output
}

fn write_core_metrics(output: &mut String, device: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "tripguard_events_total",
        "Total stimuli processed",
        MetricType::Counter,
        device,
        summary.events_total,
    );
    write_histogram(
        output,
        "tripguard_event_latency_us",
        "Stimulus processing latency in microseconds",
        device,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.lat_sum_us,
    );
    write_metric(
        output,
        "tripguard_positions_total",
        "Position samples received",
        MetricType::Counter,
        device,
        summary.positions_total,
    );
    write_metric(
        output,
        "tripguard_events_dropped_total",
        "Inbound messages dropped because the engine queue was full",
        MetricType::Counter,
        device,
        summary.events_dropped,
    );
}

fn write_escalation_metrics(output: &mut String, device: &str, summary: &MetricsSummary) {
    write_labelled_counter(
        output,
        "tripguard_deviations_total",
        "Deviation evaluations beyond the threshold",
        device,
        "result",
        &[("raised", summary.deviations_raised), ("suppressed", summary.deviations_suppressed)],
    );
    write_labelled_counter(
        output,
        "tripguard_escalations_total",
        "Escalation sessions opened or ignored by the single-flight guard",
        device,
        "result",
        &[("opened", summary.escalations_opened), ("ignored", summary.escalations_ignored)],
    );
    write_labelled_counter(
        output,
        "tripguard_escalation_outcomes_total",
        "Terminal escalation states",
        device,
        "outcome",
        &[
            ("safe", summary.outcome_safe),
            ("auto_alert", summary.outcome_auto),
            ("manual_alert", summary.outcome_manual),
        ],
    );
    write_metric(
        output,
        "tripguard_escalation_pending",
        "1 while a session awaits the traveler's response",
        MetricType::Gauge,
        device,
        u64::from(summary.escalation_pending),
    );
    write_labelled_counter(
        output,
        "tripguard_alerts_total",
        "Alerts handed to the dispatcher",
        device,
        "source",
        &[
            ("auto", summary.alerts_auto),
            ("manual", summary.alerts_manual),
            ("voice", summary.alerts_voice),
            ("panic", summary.alerts_panic),
        ],
    );
}

fn write_dispatch_metrics(output: &mut String, device: &str, summary: &MetricsSummary) {
    write_labelled_counter(
        output,
        "tripguard_dispatch_total",
        "Alert dispatch outcomes",
        device,
        "outcome",
        &[
            ("sent", summary.dispatch_sent),
            ("unavailable", summary.dispatch_unavailable),
            ("no_contacts", summary.dispatch_no_contacts),
            ("failed", summary.dispatch_failed),
        ],
    );
    write_histogram(
        output,
        "tripguard_dispatch_latency_ms",
        "Alert delivery latency in milliseconds",
        device,
        &summary.dispatch_lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.dispatch_lat_sum_ms,
    );
}

fn write_voice_metrics(output: &mut String, device: &str, summary: &MetricsSummary, enabled: bool) {
    write_labelled_counter(
        output,
        "tripguard_voice_triggers_total",
        "Trigger phrase detections",
        device,
        "result",
        &[("accepted", summary.voice_triggers_accepted), ("ignored", summary.voice_triggers_ignored)],
    );
    write_labelled_counter(
        output,
        "tripguard_voice_failures_total",
        "Voice cycles that failed",
        device,
        "stage",
        &[("recording", summary.recordings_failed), ("upload", summary.uploads_failed)],
    );
    write_metric(
        output,
        "tripguard_voice_enabled",
        "1 while the voice pipeline accepts triggers",
        MetricType::Gauge,
        device,
        u64::from(enabled),
    );
    let _ = writeln!(output, "# HELP tripguard_voice_state Current voice pipeline state");
    let _ = writeln!(output, "# TYPE tripguard_voice_state gauge");
    let _ = writeln!(
        output,
        "tripguard_voice_state{{device=\"{device}\",state=\"{}\"}} 1",
        summary.voice_state
    );
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    status: watch::Receiver<EngineStatus>,
    device: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let snapshot = *status.borrow();
            let body = format_prometheus_metrics(&metrics, &snapshot, &device);
            text_response(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body)
        }
        (&Method::GET, "/health") => text_response(StatusCode::OK, "text/plain", "ok".to_string()),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };
    Ok(response)
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    status: watch::Receiver<EngineStatus>,
    device: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let device = Arc::new(device);

    info!(port = %port, device = %device, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let status = status.clone();
                        let device = device.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let status = status.clone();
                                let device = device.clone();
                                async move { handle_request(req, metrics, status, device).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::VoiceState;
    use crate::domain::session::EscalationState;
    use crate::infra::metrics::AlertSource;

    fn status(destination_set: bool) -> EngineStatus {
        EngineStatus {
            escalation_pending: false,
            voice_state: VoiceState::Idle,
            voice_enabled: true,
            destination_set,
        }
    }

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_event_processed(150);
        metrics.record_deviation_raised();
        metrics.record_escalation_opened();
        metrics.record_outcome(EscalationState::AutoAlert);
        metrics.record_alert(AlertSource::Auto);
        metrics.record_dispatch("sent", 420);

        let status = EngineStatus {
            escalation_pending: true,
            voice_state: VoiceState::Recording,
            voice_enabled: true,
            destination_set: true,
        };
        let output = format_prometheus_metrics(&metrics, &status, "phone-1");

        assert!(output.contains("tripguard_events_total{device=\"phone-1\"} 1"));
        assert!(output.contains("tripguard_event_latency_us_bucket{device=\"phone-1\",le=\"200\"} 1"));
        assert!(output.contains("tripguard_deviations_total{device=\"phone-1\",result=\"raised\"} 1"));
        assert!(output.contains("tripguard_escalation_outcomes_total{device=\"phone-1\",outcome=\"auto_alert\"} 1"));
        assert!(output.contains("tripguard_dispatch_total{device=\"phone-1\",outcome=\"sent\"} 1"));
        assert!(output.contains("tripguard_escalation_pending{device=\"phone-1\"} 1"));
        assert!(output.contains("tripguard_voice_state{device=\"phone-1\",state=\"recording\"} 1"));
        assert!(output.contains("tripguard_destination_set{device=\"phone-1\"} 1"));
        assert!(output.contains("tripguard_alerts_total{device=\"phone-1\",source=\"auto\"} 1"));
        assert!(output.contains("tripguard_dispatch_latency_ms_sum{device=\"phone-1\"} 420"));
    }

    #[test]
    fn test_repeated_scrapes_keep_histogram_counts() {
        let metrics = Metrics::new();
        metrics.record_event_processed(150);
        metrics.record_event_processed(170);

        for _ in 0..2 {
            let output = format_prometheus_metrics(&metrics, &status(false), "d");
            assert!(output.contains("tripguard_event_latency_us_count{device=\"d\"} 2"));
            assert!(output.contains("tripguard_event_latency_us_sum{device=\"d\"} 320"));
            assert!(output.contains("tripguard_destination_set{device=\"d\"} 0"));
        }

        // The interval logger still sees the window the scrapes left alone
        let report = metrics.report(false, "idle");
        assert_eq!(report.avg_process_latency_us, 160);

        let output = format_prometheus_metrics(&metrics, &status(true), "d");
        assert!(output.contains("tripguard_event_latency_us_count{device=\"d\"} 2"));
        assert!(output.contains("tripguard_destination_set{device=\"d\"} 1"));
    }

    #[test]
    fn test_text_response() {
        let response = text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[hyper::header::CONTENT_TYPE], "text/plain");
    }
}
