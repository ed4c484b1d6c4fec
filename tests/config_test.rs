//! Integration tests for configuration loading

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tripguard::infra::Config;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[traveler]
name = "Asha"

[mqtt]
host = "test-host"
port = 1884
client_id = "phone-7"

[mqtt.topics]
position = "trip/phone-7/position"

[deviation]
threshold_m = 750.0
cooldown_secs = 45

[escalation]
response_window_secs = 20

[voice]
enabled = false
trigger_phrases = ["help me", "call police"]
recording_secs = 8
debounce_buffer_secs = 3

[delivery]
url = "http://sms-gateway/send"
timeout_ms = 2500
default_country_code = "+91"

[trip.destination]
latitude = 19.0760
longitude = 72.8777
label = "Home"

[[contacts]]
id = "mom"
name = "Mom"
phone = "9876543210"

[[contacts]]
name = "Ravi"
phone = "+15551234567"

[metrics]
interval_secs = 15
prometheus_port = 9091
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.traveler_name(), "Asha");
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_client_id(), "phone-7");
    assert_eq!(config.topics().position, "trip/phone-7/position");
    assert!((config.deviation_threshold_m() - 750.0).abs() < f64::EPSILON);
    assert_eq!(config.cooldown(), Duration::from_secs(45));
    assert_eq!(config.response_window(), Duration::from_secs(20));
    assert!(!config.voice_enabled());
    assert_eq!(config.trigger_phrases(), ["help me", "call police"]);
    assert_eq!(config.recording_duration(), Duration::from_secs(8));
    assert_eq!(config.debounce_window(), Duration::from_secs(11));
    assert_eq!(config.delivery_url(), Some("http://sms-gateway/send"));
    assert_eq!(config.delivery_timeout(), Duration::from_millis(2500));
    assert_eq!(config.default_country_code(), Some("+91"));
    assert_eq!(config.prometheus_port(), 9091);
    assert_eq!(config.metrics_interval_secs(), 15);

    let destination = config.trip_destination().unwrap();
    assert_eq!(destination.label, "Home");
    assert!((destination.coordinate.latitude - 19.0760).abs() < 1e-9);

    let contacts = config.contacts();
    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0].id, "mom");
    assert_eq!(contacts[1].id, "contact-2");
    assert_eq!(contacts[1].phone_number, "+15551234567");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let temp_file = write_config(
        r#"
[mqtt]
host = "broker"
port = 1883
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.mqtt_host(), "broker");
    assert!(config.voice_enabled());
    assert!(config.trip_destination().is_none());
    assert!(config.contacts().is_empty());
    assert!(config.delivery_url().is_none());
    assert_eq!(config.egress_file(), "incidents.jsonl");
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_invalid_destination_is_rejected() {
    let temp_file = write_config(
        r#"
[mqtt]
host = "broker"
port = 1883

[trip.destination]
latitude = 123.0
longitude = 72.0
"#,
    );

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("destination"));
}

#[test]
fn test_missing_mqtt_port_is_rejected() {
    let temp_file = write_config(
        r#"
[mqtt]
host = "broker"
"#,
    );

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert!(config.contacts().is_empty());
    assert_eq!(config.response_window(), Duration::from_secs(30));
}

fn with_mqtt(extra: &str) -> NamedTempFile {
    write_config(&format!("[mqtt]\nhost = \"broker\"\nport = 1883\n\n{}", extra))
}

#[test]
fn test_non_positive_threshold_is_rejected() {
    for threshold in ["-5.0", "0.0", "nan", "inf"] {
        let temp_file = with_mqtt(&format!("[deviation]\nthreshold_m = {}\n", threshold));
        let err = Config::from_file(temp_file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("threshold_m"), "{} accepted", threshold);
    }
}

#[test]
fn test_oversized_windows_are_rejected() {
    let cases = [
        ("[voice]\nrecording_secs = 9223372036854775807\ndebounce_buffer_secs = 9223372036854775807\n", "recording_secs"),
        ("[voice]\nrecording_secs = 10\ndebounce_buffer_secs = 9223372036854775807\n", "debounce_buffer_secs"),
        ("[escalation]\nresponse_window_secs = 9223372036854775807\n", "response_window_secs"),
        ("[escalation]\nresponse_window_secs = 0\n", "response_window_secs"),
        ("[deviation]\ncooldown_secs = 9223372036854775807\n", "cooldown_secs"),
    ];
    for (section, field) in cases {
        let temp_file = with_mqtt(section);
        let err = Config::from_file(temp_file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains(field), "{} accepted", field);
    }
}

#[test]
fn test_invalid_windows_fall_back_to_defaults() {
    let temp_file = with_mqtt("[escalation]\nresponse_window_secs = 0\n");
    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.response_window(), Duration::from_secs(30));
}
