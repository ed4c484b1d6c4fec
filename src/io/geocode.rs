//! Address geocoding (Nominatim-compatible search API)
//!
//! `GET {url}?q=<address>&format=json&limit=1` returning
//! `[{"lat": "19.07", "lon": "72.87", "display_name": "..."}]`.

use crate::domain::error::{SafetyError, SafetyResult};
use crate::domain::types::{Coordinate, Destination};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve an address string to a destination
    async fn geocode(&self, address: &str) -> SafetyResult<Destination>;
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: Option<String>,
}

/// Parse a search response into a destination labelled with the query
fn parse_hits(body: &[u8], address: &str) -> SafetyResult<Destination> {
    let hits: Vec<SearchHit> =
        serde_json::from_slice(body).map_err(|e| SafetyError::InvalidPayload(e.to_string()))?;
    let hit = hits
        .into_iter()
        .next()
        .ok_or_else(|| SafetyError::InvalidPayload(format!("no match for '{}'", address)))?;

    let latitude: f64 = hit.lat.parse().map_err(|_| SafetyError::InvalidPayload(hit.lat.clone()))?;
    let longitude: f64 =
        hit.lon.parse().map_err(|_| SafetyError::InvalidPayload(hit.lon.clone()))?;
    let coordinate = Coordinate::new(latitude, longitude);
    if !coordinate.is_valid() {
        return Err(SafetyError::InvalidPayload(format!("{}, {}", latitude, longitude)));
    }

    let label = if address.trim().is_empty() {
        hit.display_name.unwrap_or_else(|| "destination".to_string())
    } else {
        address.trim().to_string()
    };
    Ok(Destination::new(coordinate, label))
}

pub struct HttpGeocoder {
    url: String,
    client: Option<reqwest::Client>,
}

impl HttpGeocoder {
    pub fn new(url: Option<&str>, timeout: Duration) -> Self {
        let url = url.unwrap_or_default().to_string();
        let client = if url.is_empty() {
            None
        } else {
            reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("tripguard/", env!("CARGO_PKG_VERSION")))
                .build()
                .ok()
        };
        Self { url, client }
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, address: &str) -> SafetyResult<Destination> {
        let Some(ref client) = self.client else {
            return Err(SafetyError::Unavailable("geocoder"));
        };

        let response = client
            .get(&self.url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "geocode_request_failed");
                SafetyError::network("geocoding", e)
            })?;

        if !response.status().is_success() {
            return Err(SafetyError::network(
                "geocoding",
                format!("service returned {}", response.status()),
            ));
        }

        let body = response.bytes().await.map_err(|e| SafetyError::network("geocoding", e))?;
        let destination = parse_hits(&body, address)?;
        info!(
            label = %destination.label,
            lat = %destination.coordinate.latitude,
            lon = %destination.coordinate.longitude,
            "destination_geocoded"
        );
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hits() {
        let body = br#"[{"lat":"19.0760","lon":"72.8777","display_name":"Mumbai, Maharashtra"}]"#;
        let dest = parse_hits(body, "Gateway of India").unwrap();
        assert_eq!(dest.label, "Gateway of India");
        assert!((dest.coordinate.latitude - 19.0760).abs() < 1e-9);
        assert!((dest.coordinate.longitude - 72.8777).abs() < 1e-9);
    }

    #[test]
    fn test_parse_hits_empty() {
        assert!(matches!(parse_hits(b"[]", "nowhere"), Err(SafetyError::InvalidPayload(_))));
    }

    #[test]
    fn test_parse_hits_out_of_range() {
        let body = br#"[{"lat":"123.0","lon":"72.8777"}]"#;
        assert!(parse_hits(body, "x").is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_geocoder() {
        let geocoder = HttpGeocoder::new(None, Duration::from_secs(1));
        assert!(matches!(
            geocoder.geocode("Pune").await,
            Err(SafetyError::Unavailable("geocoder"))
        ));
    }
}
