//! Green-wave signal coordination for red-code dispatches.
//!
//! For each dispatched resource the coordinator selects the catalog
//! intersections lying along the straight line to the incident and computes
//! per-intersection green windows. Waves live in a process-local registry
//! with a 30-minute TTL, purged on access. Activation never fails for lack
//! of intersections: the window list is simply empty.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use siren_proto::{Code, Point, point_segment_distance_m, haversine_m};

use crate::config::ConfigError;
use crate::error::{Result, ServiceError};
use crate::model::{Incident, IncidentId};

/// Waves expire 30 minutes after activation.
const WAVE_TTL: i64 = 30 * 60;
/// Catalog intersections further than this from the travel line are not
/// part of the wave.
const MAX_LINE_DISTANCE_M: f64 = 500.0;
/// Assumed travel speed when the resource has no usable telemetry.
const DEFAULT_SPEED_KMH: f64 = 50.0;
/// Resource speeds below this are treated as stationary noise.
const MIN_SPEED_KMH: f64 = 5.0;
/// The light turns green this many seconds before predicted arrival.
const GREEN_LEAD_S: i64 = 5;
const GREEN_HOLD_MAJOR_S: i64 = 45;
const GREEN_HOLD_SECONDARY_S: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntersectionKind {
    Major,
    Secondary,
}

/// One catalog entry. The catalog is externalised configuration, validated
/// at start-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intersection {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "type")]
    pub kind: IntersectionKind,
}

impl Intersection {
    pub fn location(&self) -> Point {
        Point::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Default)]
pub struct IntersectionCatalog {
    intersections: Vec<Intersection>,
}

impl IntersectionCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(intersections: Vec<Intersection>) -> std::result::Result<Self, ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for entry in &intersections {
            if entry.id.trim().is_empty() {
                return Err(ConfigError::CatalogInvalid(format!(
                    "intersection '{}' has an empty id",
                    entry.name
                )));
            }
            if !entry.lat.is_finite() || !entry.lon.is_finite() {
                return Err(ConfigError::CatalogInvalid(format!(
                    "intersection '{}' has non-finite coordinates",
                    entry.id
                )));
            }
            if !seen.insert(entry.id.clone()) {
                return Err(ConfigError::CatalogInvalid(format!(
                    "duplicate intersection id '{}'",
                    entry.id
                )));
            }
        }
        Ok(Self { intersections })
    }

    pub fn load(path: &Path) -> std::result::Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::CatalogIo {
            path: path.display().to_string(),
            source,
        })?;
        let intersections: Vec<Intersection> =
            serde_json::from_str(&raw).map_err(|source| ConfigError::CatalogParse {
                path: path.display().to_string(),
                source,
            })?;
        Self::new(intersections)
    }

    pub fn len(&self) -> usize {
        self.intersections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intersections.is_empty()
    }
}

/// A single timed green window at one intersection.
#[derive(Debug, Clone, Serialize)]
pub struct GreenWindow {
    pub intersection: Intersection,
    pub distance_from_start_m: f64,
    pub arrival: DateTime<Utc>,
    pub green_start: DateTime<Utc>,
    pub green_end: DateTime<Utc>,
    /// 1 for major intersections, 2 for secondary.
    pub priority: u8,
}

/// An active wave for one resource of one incident.
#[derive(Debug, Clone, Serialize)]
pub struct GreenWave {
    pub wave_id: String,
    pub incident: IncidentId,
    pub resource_id: String,
    pub created_at: DateTime<Utc>,
    pub path_start: Point,
    pub path_end: Point,
    pub windows: Vec<GreenWindow>,
}

/// Live answer for one intersection's signal state.
#[derive(Debug, Clone, Serialize)]
pub struct IntersectionStatus {
    pub intersection_id: String,
    pub is_green: bool,
    pub has_emergency: bool,
    pub next_green: Option<DateTime<Utc>>,
    pub active_incidents: Vec<IncidentId>,
}

/// A resource position feeding an activation.
#[derive(Debug, Clone)]
pub struct WaveResource {
    pub resource_id: String,
    pub location: Point,
    /// Current simulated speed, if known.
    pub speed_kmh: Option<f64>,
}

pub struct GreenWaveCoordinator {
    catalog: IntersectionCatalog,
    waves: Mutex<HashMap<String, GreenWave>>,
}

impl GreenWaveCoordinator {
    pub fn new(catalog: IntersectionCatalog) -> Self {
        Self {
            catalog,
            waves: Mutex::new(HashMap::new()),
        }
    }

    /// Activates (or refreshes) the wave for every given resource of a
    /// red-code incident. Re-activation replaces the resource's previous
    /// entry, never duplicates it.
    pub fn activate(
        &self,
        incident: &Incident,
        resources: &[WaveResource],
        now: DateTime<Utc>,
    ) -> Result<Vec<GreenWave>> {
        if incident.code != Some(Code::Red) {
            return Err(ServiceError::Validation(
                "green wave is only available for red-code incidents".to_string(),
            ));
        }
        let Some(target) = incident.location else {
            return Err(ServiceError::Validation(
                "incident has no coordinates for green wave".to_string(),
            ));
        };

        let mut activated = Vec::new();
        let mut waves = self.lock()?;
        purge_expired(&mut waves, now);

        for resource in resources {
            let speed = resource
                .speed_kmh
                .filter(|s| *s >= MIN_SPEED_KMH)
                .unwrap_or(DEFAULT_SPEED_KMH);
            let windows = self.windows_for(resource.location, target, speed, now);
            let wave = GreenWave {
                wave_id: format!("incident_{}_{}", incident.id, resource.resource_id),
                incident: incident.id,
                resource_id: resource.resource_id.clone(),
                created_at: now,
                path_start: resource.location,
                path_end: target,
                windows,
            };
            info!(
                wave = %wave.wave_id,
                intersections = wave.windows.len(),
                "green wave activated"
            );
            waves.insert(wave.wave_id.clone(), wave.clone());
            activated.push(wave);
        }
        Ok(activated)
    }

    /// Intersections within 500 m perpendicular distance of the straight
    /// travel line, ordered by distance from the resource, with timed
    /// windows at the given speed.
    fn windows_for(
        &self,
        start: Point,
        end: Point,
        speed_kmh: f64,
        now: DateTime<Utc>,
    ) -> Vec<GreenWindow> {
        let speed_ms = speed_kmh * 1000.0 / 3600.0;
        let mut selected: Vec<(f64, &Intersection)> = self
            .catalog
            .intersections
            .iter()
            .filter(|i| point_segment_distance_m(i.location(), start, end) <= MAX_LINE_DISTANCE_M)
            .map(|i| (haversine_m(start, i.location()), i))
            .collect();
        selected.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        selected
            .into_iter()
            .map(|(distance, intersection)| {
                let travel = Duration::milliseconds((distance / speed_ms * 1000.0) as i64);
                let arrival = now + travel;
                let hold = match intersection.kind {
                    IntersectionKind::Major => GREEN_HOLD_MAJOR_S,
                    IntersectionKind::Secondary => GREEN_HOLD_SECONDARY_S,
                };
                GreenWindow {
                    intersection: intersection.clone(),
                    distance_from_start_m: distance,
                    arrival,
                    green_start: arrival - Duration::seconds(GREEN_LEAD_S),
                    green_end: arrival + Duration::seconds(hold),
                    priority: match intersection.kind {
                        IntersectionKind::Major => 1,
                        IntersectionKind::Secondary => 2,
                    },
                }
            })
            .collect()
    }

    /// All live waves; expired entries are dropped on the way.
    pub fn active_waves(&self, now: DateTime<Utc>) -> Result<Vec<GreenWave>> {
        let mut waves = self.lock()?;
        purge_expired(&mut waves, now);
        let mut out: Vec<GreenWave> = waves.values().cloned().collect();
        out.sort_by(|a, b| a.wave_id.cmp(&b.wave_id));
        Ok(out)
    }

    /// Drops every wave belonging to an incident. Returns how many were
    /// removed.
    pub fn deactivate(&self, incident: IncidentId) -> Result<usize> {
        let mut waves = self.lock()?;
        let before = waves.len();
        waves.retain(|_, wave| wave.incident != incident);
        let removed = before - waves.len();
        if removed > 0 {
            debug!(incident = %incident, removed, "green waves deactivated");
        }
        Ok(removed)
    }

    /// Signal state of one intersection across every active wave.
    pub fn intersection_status(
        &self,
        intersection_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IntersectionStatus> {
        let mut waves = self.lock()?;
        purge_expired(&mut waves, now);

        let mut status = IntersectionStatus {
            intersection_id: intersection_id.to_string(),
            is_green: false,
            has_emergency: false,
            next_green: None,
            active_incidents: Vec::new(),
        };
        for wave in waves.values() {
            for window in &wave.windows {
                if window.intersection.id != intersection_id {
                    continue;
                }
                status.has_emergency = true;
                if !status.active_incidents.contains(&wave.incident) {
                    status.active_incidents.push(wave.incident);
                }
                if window.green_start <= now && now <= window.green_end {
                    status.is_green = true;
                } else if now < window.green_start {
                    status.next_green = Some(match status.next_green {
                        Some(existing) => existing.min(window.green_start),
                        None => window.green_start,
                    });
                }
            }
        }
        status.active_incidents.sort();
        Ok(status)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, GreenWave>>> {
        self.waves
            .lock()
            .map_err(|_| ServiceError::Unavailable("green wave registry lock poisoned".to_string()))
    }
}

fn purge_expired(waves: &mut HashMap<String, GreenWave>, now: DateTime<Utc>) {
    waves.retain(|_, wave| (now - wave.created_at).num_seconds() < WAVE_TTL);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IncidentStatus;

    fn catalog() -> IntersectionCatalog {
        IntersectionCatalog::new(vec![
            Intersection {
                id: "9julio_corrientes".to_string(),
                name: "9 de Julio y Corrientes".to_string(),
                lat: -34.6037,
                lon: -58.3816,
                kind: IntersectionKind::Major,
            },
            Intersection {
                id: "9julio_rivadavia".to_string(),
                name: "9 de Julio y Rivadavia".to_string(),
                lat: -34.6092,
                lon: -58.3816,
                kind: IntersectionKind::Major,
            },
            Intersection {
                id: "florida_corrientes".to_string(),
                name: "Florida y Corrientes".to_string(),
                lat: -34.6020,
                lon: -58.3748,
                kind: IntersectionKind::Secondary,
            },
            Intersection {
                id: "cabildo_juramento".to_string(),
                name: "Cabildo y Juramento".to_string(),
                lat: -34.5632,
                lon: -58.4561,
                kind: IntersectionKind::Major,
            },
        ])
        .unwrap()
    }

    fn red_incident(location: Point) -> Incident {
        let mut incident = Incident {
            id: IncidentId(7),
            description: "incendio".to_string(),
            address: None,
            location: Some(location),
            code: None,
            priority: 0,
            status: IncidentStatus::Assigned,
            green_wave: false,
            assigned_force: None,
            assigned_vehicle: None,
            reported_at: Utc::now(),
            resolved_at: None,
            resolution_notes: String::new(),
            ai_response: String::new(),
        };
        incident.apply_code(Code::Red);
        incident
    }

    fn resource_at(location: Point) -> WaveResource {
        WaveResource {
            resource_id: "vehicle_1".to_string(),
            location,
            speed_kmh: None,
        }
    }

    #[test]
    fn test_activation_produces_timed_windows() {
        let coordinator = GreenWaveCoordinator::new(catalog());
        let now = Utc::now();
        let incident = red_incident(Point::new(-34.6100, -58.3770));
        let waves = coordinator
            .activate(&incident, &[resource_at(Point::new(-34.6037, -58.3816))], now)
            .unwrap();

        assert_eq!(waves.len(), 1);
        let windows = &waves[0].windows;
        assert!(!windows.is_empty());
        for window in windows {
            let hold = (window.green_end - window.arrival).num_seconds();
            assert!(hold == 45 || hold == 30, "hold was {hold}");
            assert_eq!((window.arrival - window.green_start).num_seconds(), 5);
        }
        // Far-away intersection is not part of the wave.
        assert!(windows.iter().all(|w| w.intersection.id != "cabildo_juramento"));
        // Windows come ordered by distance from the resource.
        for pair in windows.windows(2) {
            assert!(pair[0].distance_from_start_m <= pair[1].distance_from_start_m);
        }
    }

    #[test]
    fn test_double_activation_keeps_one_entry() {
        let coordinator = GreenWaveCoordinator::new(catalog());
        let now = Utc::now();
        let incident = red_incident(Point::new(-34.6100, -58.3770));
        let resource = resource_at(Point::new(-34.6037, -58.3816));

        coordinator.activate(&incident, &[resource.clone()], now).unwrap();
        coordinator.activate(&incident, &[resource], now + Duration::seconds(30)).unwrap();

        let active = coordinator.active_waves(now + Duration::seconds(31)).unwrap();
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn test_non_red_incident_rejected() {
        let coordinator = GreenWaveCoordinator::new(catalog());
        let mut incident = red_incident(Point::new(-34.6100, -58.3770));
        incident.apply_code(Code::Yellow);
        let err = coordinator
            .activate(&incident, &[resource_at(Point::new(-34.6037, -58.3816))], Utc::now())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn test_empty_catalog_yields_empty_windows() {
        let coordinator = GreenWaveCoordinator::new(IntersectionCatalog::empty());
        let incident = red_incident(Point::new(-34.6100, -58.3770));
        let waves = coordinator
            .activate(&incident, &[resource_at(Point::new(-34.6037, -58.3816))], Utc::now())
            .unwrap();
        assert_eq!(waves.len(), 1);
        assert!(waves[0].windows.is_empty());
    }

    #[test]
    fn test_waves_expire_after_ttl() {
        let coordinator = GreenWaveCoordinator::new(catalog());
        let now = Utc::now();
        let incident = red_incident(Point::new(-34.6100, -58.3770));
        coordinator
            .activate(&incident, &[resource_at(Point::new(-34.6037, -58.3816))], now)
            .unwrap();

        assert_eq!(coordinator.active_waves(now + Duration::minutes(29)).unwrap().len(), 1);
        assert!(coordinator.active_waves(now + Duration::minutes(31)).unwrap().is_empty());
    }

    #[test]
    fn test_intersection_status_reports_wave() {
        let coordinator = GreenWaveCoordinator::new(catalog());
        let now = Utc::now();
        let incident = red_incident(Point::new(-34.6100, -58.3770));
        let start = Point::new(-34.6037, -58.3816);
        coordinator.activate(&incident, &[resource_at(start)], now).unwrap();

        // The wave starts at the first intersection, so its window opens
        // immediately (arrival at distance zero).
        let status = coordinator
            .intersection_status("9julio_corrientes", now + Duration::seconds(1))
            .unwrap();
        assert!(status.has_emergency);
        assert!(status.is_green);
        assert_eq!(status.active_incidents, vec![incident.id]);

        let unrelated = coordinator
            .intersection_status("cabildo_juramento", now)
            .unwrap();
        assert!(!unrelated.has_emergency);
        assert!(!unrelated.is_green);
        assert!(unrelated.next_green.is_none());
    }

    #[test]
    fn test_deactivate_removes_incident_waves() {
        let coordinator = GreenWaveCoordinator::new(catalog());
        let now = Utc::now();
        let incident = red_incident(Point::new(-34.6100, -58.3770));
        coordinator
            .activate(&incident, &[resource_at(Point::new(-34.6037, -58.3816))], now)
            .unwrap();
        assert_eq!(coordinator.deactivate(incident.id).unwrap(), 1);
        assert!(coordinator.active_waves(now).unwrap().is_empty());
    }

    #[test]
    fn test_catalog_rejects_duplicates_and_bad_coords() {
        let dup = vec![
            Intersection {
                id: "a".to_string(),
                name: "A".to_string(),
                lat: -34.6,
                lon: -58.4,
                kind: IntersectionKind::Major,
            },
            Intersection {
                id: "a".to_string(),
                name: "A bis".to_string(),
                lat: -34.61,
                lon: -58.41,
                kind: IntersectionKind::Secondary,
            },
        ];
        assert!(IntersectionCatalog::new(dup).is_err());

        let bad = vec![Intersection {
            id: "b".to_string(),
            name: "B".to_string(),
            lat: f64::NAN,
            lon: -58.4,
            kind: IntersectionKind::Major,
        }];
        assert!(IntersectionCatalog::new(bad).is_err());
    }
}
