//! tripguard - trip safety escalation daemon
//!
//! Watches the traveler's position against the trip destination and
//! escalates to emergency contacts on unconfirmed deviations or spoken
//! distress phrases.
//!
//! Module structure:
//! - `domain/` - Core safety types (Coordinate, sessions, errors)
//! - `io/` - External interfaces (MQTT, SMS, blob storage, recorder)
//! - `services/` - Safety logic (Engine, escalation, voice trigger)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use tripguard::infra::{Config, Metrics};
use tripguard::io::{
    ArecordRecorder, Geocoder, HttpBlobStorage, HttpGeocoder, HttpSmsChannel, MqttPromptGateway,
};
use tripguard::services::{Collaborators, Engine};

/// tripguard - trip safety escalation engine
#[derive(Parser, Debug)]
#[command(name = "tripguard", version, about)]
struct Args {
    /// Path to TOML configuration file (else CONFIG_FILE, else config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments using clap
    let args = Args::parse();

    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "tripguard starting");

    // Load configuration from TOML file
    let config = match args.config {
        Some(ref path) => Config::load_from_path(path),
        None => Config::load(&[]),
    };

    info!(
        config_file = %config.config_file(),
        traveler = %config.traveler_name(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        contacts = %config.contacts().len(),
        threshold_m = %config.deviation_threshold_m(),
        cooldown_secs = %config.cooldown().as_secs(),
        response_window_secs = %config.response_window().as_secs(),
        voice_enabled = %config.voice_enabled(),
        delivery_configured = %config.delivery_url().is_some(),
        storage_configured = %config.storage_upload_url().is_some(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );
    if config.contacts().is_empty() {
        tracing::warn!("no emergency contacts configured; alerts will not be delivered");
    }

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let collaborators = Collaborators {
        channel: Arc::new(HttpSmsChannel::new(config.delivery_url(), config.delivery_timeout())),
        gateway: Arc::new(MqttPromptGateway::new(&config)),
        storage: Arc::new(HttpBlobStorage::new(
            config.storage_upload_url(),
            config.storage_public_base_url(),
            config.storage_timeout(),
        )),
        recorder: Arc::new(ArecordRecorder::new(config.recorder_device())),
    };
    let geocoder: Arc<dyn Geocoder> =
        Arc::new(HttpGeocoder::new(config.geocoding_url(), config.geocoding_timeout()));

    let mut engine = Engine::new(config.clone(), collaborators, metrics.clone());
    let status = engine.status();

    // Create event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(1000);

    // Start MQTT client
    let mqtt_config = config.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = tripguard::io::mqtt::start_mqtt_client(
            &mqtt_config,
            event_tx,
            geocoder,
            mqtt_metrics,
            mqtt_shutdown,
        )
        .await
        {
            tracing::error!(error = %e, "MQTT client error");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_status = status.clone();
        let prom_device = config.mqtt_client_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = tripguard::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_status,
                prom_device,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let reporter_status = status.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let snapshot = *reporter_status.borrow();
            let summary =
                metrics_clone.report(snapshot.escalation_pending, snapshot.voice_state.as_str());
            summary.log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run engine - consumes events until shutdown or channel close
    engine.run(event_rx, shutdown_rx).await;

    info!("tripguard shutdown complete");
    Ok(())
}
