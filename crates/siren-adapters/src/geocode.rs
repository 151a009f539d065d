//! Nominatim geocoder for incident ingress.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use siren_core::GeocoderConfig;
use siren_proto::{Geocoder, Point};

const USER_AGENT: &str = "siren-dispatch/0.4";
const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

pub struct NominatimGeocoder {
    http: Client,
    base_url: String,
    region_suffix: String,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocoderConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.base_url.clone(),
            region_suffix: config.region_suffix.clone(),
        }
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn resolve(&self, address: &str) -> Option<Point> {
        let query = if self.region_suffix.is_empty() {
            address.to_string()
        } else {
            format!("{address}, {}", self.region_suffix)
        };
        let result = self
            .http
            .get(&self.base_url)
            .query(&[("format", "json"), ("q", query.as_str())])
            .header("User-Agent", USER_AGENT)
            .timeout(TIMEOUT)
            .send()
            .await;

        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!("geocoder HTTP {}", response.status());
                return None;
            }
            Err(e) => {
                debug!("geocoder request error: {e}");
                return None;
            }
        };

        let hits: Vec<SearchHit> = match response.json().await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("geocoder payload error: {e}");
                return None;
            }
        };
        let hit = hits.into_iter().next()?;
        let lat = hit.lat.parse::<f64>().ok()?;
        let lon = hit.lon.parse::<f64>().ok()?;
        Some(Point::new(lat, lon))
    }
}
