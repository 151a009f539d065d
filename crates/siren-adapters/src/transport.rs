//! City transport feed client.
//!
//! Pulls street closures, parking availability and traffic counts from the
//! municipal open-data API (GeoJSON feature collections) and loads them
//! into the store. Feed failures are absorbed: a sync that cannot reach
//! the API simply loads nothing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use siren_core::{ClosureSeed, CountKind, ParkingSeed, Store, TrafficCountSeed};
use siren_proto::{Geometry, Point};

const DEFAULT_BASE_URL: &str = "https://api-transporte.buenosaires.gob.ar";
const TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Value,
    #[serde(default)]
    geometry: Option<Geometry>,
}

impl Feature {
    fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    fn prop_f64(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(Value::as_f64)
    }

    fn point(&self) -> Option<Point> {
        match self.geometry.as_ref()? {
            Geometry::Point { coordinates } => Some(Point::from_lon_lat(*coordinates)),
            Geometry::LineString { coordinates } => {
                coordinates.first().map(|c| Point::from_lon_lat(*c))
            }
        }
    }

    fn prop_datetime(&self, key: &str) -> Option<DateTime<Utc>> {
        self.prop_str(key)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

pub struct TransportFeedClient {
    http: Client,
    base_url: String,
}

impl TransportFeedClient {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(&self, endpoint: &str) -> Option<FeatureCollection> {
        let url = format!("{}{endpoint}", self.base_url);
        let result = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header("User-Agent", "siren-dispatch/0.4")
            .timeout(TIMEOUT)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<FeatureCollection>().await {
                    Ok(collection) => Some(collection),
                    Err(e) => {
                        warn!("transport feed payload error for {endpoint}: {e}");
                        None
                    }
                }
            }
            Ok(response) => {
                warn!("transport feed HTTP {} for {endpoint}", response.status());
                None
            }
            Err(e) => {
                warn!("transport feed unreachable for {endpoint}: {e}");
                None
            }
        }
    }

    /// Loads current street closures. Returns how many rows were stored.
    pub async fn sync_closures(&self, store: &Store, now: DateTime<Utc>) -> usize {
        let Some(collection) = self.fetch("/transito").await else {
            return 0;
        };
        let mut stored = 0;
        for feature in &collection.features {
            if feature.prop_str("tipo") != Some("corte_calle") {
                continue;
            }
            let Some(point) = feature.point() else { continue };
            let name = feature
                .prop_str("nombre")
                .or_else(|| feature.prop_str("descripcion"))
                .unwrap_or("unnamed closure")
                .to_string();
            let seed = ClosureSeed {
                name,
                closure_type: feature.prop_str("tipo_corte").unwrap_or("total").to_string(),
                point_location: Some(point),
                geometry: feature.geometry.clone(),
                start_at: feature.prop_datetime("fecha_inicio").unwrap_or(now),
                end_at: feature.prop_datetime("fecha_fin"),
                is_active: true,
            };
            if store.add_closure(seed).is_ok() {
                stored += 1;
            }
        }
        info!(stored, "street closures loaded from transport feed");
        stored
    }

    /// Loads parking availability. Returns how many rows were stored.
    pub async fn sync_parking(&self, store: &Store) -> usize {
        let Some(collection) = self.fetch("/estacionamiento").await else {
            return 0;
        };
        let mut stored = 0;
        for feature in &collection.features {
            let Some(point) = feature.point() else { continue };
            let total = feature.prop_f64("capacidad").unwrap_or(1.0).max(0.0) as u32;
            let available = feature.prop_f64("disponibles").unwrap_or(0.0).max(0.0) as u32;
            let seed = ParkingSeed {
                name: feature
                    .prop_str("nombre")
                    .or_else(|| feature.prop_str("direccion"))
                    .unwrap_or("unnamed parking")
                    .to_string(),
                location: point,
                total_spaces: total,
                available_spaces: available,
                spot_type: feature.prop_str("tipo").unwrap_or("street").to_string(),
                is_paid: feature
                    .properties
                    .get("pago")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                max_duration_hours: feature.prop_f64("duracion_maxima").map(|h| h as u32),
            };
            if store.add_parking(seed).is_ok() {
                stored += 1;
            }
        }
        info!(stored, "parking spots loaded from transport feed");
        stored
    }

    /// Loads traffic counts. Returns how many rows were stored.
    pub async fn sync_traffic_counts(&self, store: &Store, now: DateTime<Utc>) -> usize {
        let Some(collection) = self.fetch("/transito").await else {
            return 0;
        };
        let mut stored = 0;
        for feature in &collection.features {
            let Some(kind) = feature.prop_str("tipo_conteo").map(map_count_type) else {
                continue;
            };
            let Some(point) = feature.point() else { continue };
            let Some(value) = feature
                .prop_f64("valor")
                .or_else(|| feature.prop_f64("conteo"))
            else {
                continue;
            };
            let seed = TrafficCountSeed {
                location: point,
                count_type: kind,
                count_value: value,
                unit: feature.prop_str("unidad").unwrap_or("vehicles").to_string(),
                timestamp: feature
                    .prop_datetime("timestamp")
                    .or_else(|| feature.prop_datetime("fecha"))
                    .unwrap_or(now),
                period_minutes: feature.prop_f64("periodo_minutos").unwrap_or(60.0) as u32,
            };
            if store.add_traffic_count(seed).is_ok() {
                stored += 1;
            }
        }
        info!(stored, "traffic counts loaded from transport feed");
        stored
    }
}

fn map_count_type(raw: &str) -> CountKind {
    match raw {
        "speed" | "velocidad" => CountKind::Speed,
        "occupancy" | "ocupacion" | "ocupación" => CountKind::Occupancy,
        _ => CountKind::Vehicle,
    }
}
