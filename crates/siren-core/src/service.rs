//! The dispatch service: the single entry point collaborators call.
//!
//! Owns every long-lived engine (triage, planner, adjuster, green wave,
//! tracking, parking) plus the per-incident serialization tokens that keep
//! concurrent plans for the same incident from double-dispatching a
//! vehicle. Constructed once at start-up; everything is passed by
//! reference from here on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use siren_proto::{Code, Geocoder, Point, RoutePlanner, TriageOutcome, TriageProvider, TriageSource};

use crate::adjuster::RouteAdjuster;
use crate::config::SirenConfig;
use crate::error::{Result, ServiceError};
use crate::greenwave::{GreenWave, GreenWaveCoordinator, IntersectionCatalog, IntersectionStatus, WaveResource};
use crate::model::{CalculatedRoute, Incident, IncidentId};
use crate::parking::{EmergencyParking, ParkingPlanSet};
use crate::planner::{DispatchPlanner, PlanSummary};
use crate::store::{OpsSummary, ResolutionSummary, Store};
use crate::tracking::{ResourceSnapshot, TrackingEngine};
use crate::triage::TriageEngine;

/// Operator-submitted incident payload.
#[derive(Debug, Clone, Default)]
pub struct NewIncident {
    pub description: String,
    pub address: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// Everything a planning call produced.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PlanReport {
    pub triage: TriageOutcome,
    pub summary: PlanSummary,
    /// Waves activated automatically for red-code incidents.
    pub green_waves: Vec<GreenWave>,
}

pub struct DispatchService {
    store: Arc<Store>,
    triage: TriageEngine,
    planner: DispatchPlanner,
    adjuster: RouteAdjuster,
    greenwave: GreenWaveCoordinator,
    tracking: TrackingEngine,
    parking: EmergencyParking,
    router: Arc<dyn RoutePlanner>,
    geocoder: Option<Arc<dyn Geocoder>>,
    locks: Mutex<HashMap<IncidentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl DispatchService {
    pub fn new(
        config: &SirenConfig,
        catalog: IntersectionCatalog,
        store: Arc<Store>,
        router: Arc<dyn RoutePlanner>,
        triage_provider: Option<Arc<dyn TriageProvider>>,
        geocoder: Option<Arc<dyn Geocoder>>,
    ) -> Result<Self> {
        let triage = TriageEngine::new(&config.triage, triage_provider)?;
        Ok(Self {
            triage,
            planner: DispatchPlanner::new(Arc::clone(&store), &config.routing),
            adjuster: RouteAdjuster::new(Arc::clone(&store)),
            greenwave: GreenWaveCoordinator::new(catalog),
            tracking: TrackingEngine::new(Arc::clone(&store), &config.tracking),
            parking: EmergencyParking::new(Arc::clone(&store)),
            store,
            router,
            geocoder,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Registers an incident. Coordinates win over the address; an address
    /// alone goes through the geocoder; having neither fails ingress.
    pub async fn ingress(&self, new: NewIncident, now: DateTime<Utc>) -> Result<Incident> {
        if new.description.trim().is_empty() {
            return Err(ServiceError::Validation(
                "incident description must not be empty".to_string(),
            ));
        }

        let location = match (new.lat, new.lon) {
            (Some(lat), Some(lon)) => Some(Point::new(lat, lon)),
            _ => match new.address.as_deref().filter(|a| !a.trim().is_empty()) {
                Some(address) => {
                    let resolved = match &self.geocoder {
                        Some(geocoder) => geocoder.resolve(address).await,
                        None => None,
                    };
                    match resolved {
                        Some(point) => Some(point),
                        None => {
                            return Err(ServiceError::GeocodingFailed(address.to_string()));
                        }
                    }
                }
                None => {
                    return Err(ServiceError::GeocodingFailed(
                        "no coordinates and no address given".to_string(),
                    ));
                }
            },
        };

        let incident = self
            .store
            .create_incident(&new.description, new.address, location, now)?;
        info!(incident = %incident.id, "incident registered");
        Ok(incident)
    }

    /// Runs the full pipeline for an incident: triage, multi-force plan,
    /// route persistence, and green-wave activation for red codes.
    pub async fn plan_incident(&self, id: IncidentId, now: DateTime<Utc>) -> Result<PlanReport> {
        let _guard = self.incident_lock(id).await?;

        let incident = self.store.incident(id)?;
        let outcome = self.triage.classify(&incident.description).await;

        if incident.is_resolved() {
            // Frozen: report the stored state, never recompute.
            let summary = self
                .planner
                .plan(&incident, &outcome, self.router.as_ref(), &self.adjuster, now, Vec::new())
                .await?;
            return Ok(PlanReport {
                triage: outcome,
                summary,
                green_waves: Vec::new(),
            });
        }

        let mut degradations = Vec::new();
        if outcome.source == TriageSource::Fallback {
            degradations.push("triage fell back to rules".to_string());
        }

        let incident =
            self.store
                .record_classification(id, outcome.code, &outcome.narrative, "")?;

        let summary = self
            .planner
            .plan(&incident, &outcome, self.router.as_ref(), &self.adjuster, now, degradations)
            .await?;

        let green_waves = if summary.incident.code == Some(Code::Red) {
            self.activate_waves(&summary.incident, now)?
        } else {
            Vec::new()
        };

        self.store.append_note(id, &plan_report_note(&summary, &outcome, now))?;

        Ok(PlanReport {
            triage: outcome,
            summary,
            green_waves,
        })
    }

    /// Stored routes for the incident, active set first, planner ordering.
    pub fn routes(&self, id: IncidentId) -> Result<Vec<CalculatedRoute>> {
        let incident = self.store.incident(id)?;
        self.planner.stored_routes(&incident)
    }

    /// Snapshots for every resource currently en route or on scene.
    pub fn tracking_live(&self, now: DateTime<Utc>) -> Result<Vec<ResourceSnapshot>> {
        self.tracking.live(now)
    }

    /// Snapshots for one incident, frozen once it is resolved.
    pub fn incident_tracking(
        &self,
        id: IncidentId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResourceSnapshot>> {
        self.tracking.incident_snapshots(id, now)
    }

    /// Explicit green-wave activation for a red-code incident.
    pub async fn activate_green_wave(
        &self,
        id: IncidentId,
        now: DateTime<Utc>,
    ) -> Result<Vec<GreenWave>> {
        let _guard = self.incident_lock(id).await?;
        let incident = self.store.incident(id)?;
        self.activate_waves(&incident, now)
    }

    fn activate_waves(&self, incident: &Incident, now: DateTime<Utc>) -> Result<Vec<GreenWave>> {
        let snapshots = self.tracking.incident_snapshots(incident.id, now)?;
        let mut resources = Vec::new();
        for dispatch in self.store.dispatches_for_incident(incident.id)? {
            if let Some(vehicle_id) = dispatch.vehicle {
                let vehicle = self.store.vehicle(vehicle_id)?;
                if let Some(location) = vehicle.current_location {
                    let speed = snapshots
                        .iter()
                        .find(|s| s.resource_id == vehicle.resource_id())
                        .map(|s| s.speed_kmh);
                    resources.push(WaveResource {
                        resource_id: vehicle.resource_id(),
                        location,
                        speed_kmh: speed,
                    });
                }
            }
            if let Some(agent_id) = dispatch.agent {
                let agent = self.store.agent(agent_id)?;
                if let Some(location) = agent.current_location {
                    let speed = snapshots
                        .iter()
                        .find(|s| s.resource_id == agent.resource_id())
                        .map(|s| s.speed_kmh);
                    resources.push(WaveResource {
                        resource_id: agent.resource_id(),
                        location,
                        speed_kmh: speed,
                    });
                }
            }
        }
        if resources.is_empty() {
            warn!(incident = %incident.id, "green wave requested with no located resources");
            return Ok(Vec::new());
        }
        self.greenwave.activate(incident, &resources, now)
    }

    /// All live waves.
    pub fn active_green_waves(&self, now: DateTime<Utc>) -> Result<Vec<GreenWave>> {
        self.greenwave.active_waves(now)
    }

    /// Signal state for one intersection.
    pub fn intersection_status(
        &self,
        intersection_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IntersectionStatus> {
        self.greenwave.intersection_status(intersection_id, now)
    }

    /// Resolution transaction plus green-wave teardown.
    pub async fn resolve(
        &self,
        id: IncidentId,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolutionSummary> {
        let _guard = self.incident_lock(id).await?;
        let summary = self.store.resolve_incident(id, notes, now)?;
        self.greenwave.deactivate(id)?;
        info!(incident = %id, "incident resolved and resources released");
        Ok(summary)
    }

    /// Fleet/bed/dispatch counters.
    pub fn ops_summary(&self) -> Result<OpsSummary> {
        self.store.ops_summary()
    }

    /// Parking plan for a vehicle attending an incident scene.
    pub async fn parking_plan(
        &self,
        vehicle: Point,
        scene: Point,
        max_parking_distance_m: f64,
    ) -> Result<ParkingPlanSet> {
        self.parking
            .plan(vehicle, scene, self.router.as_ref(), max_parking_distance_m)
            .await
    }

    /// One serialization token per incident; plans and resolutions for the
    /// same incident run strictly one at a time.
    async fn incident_lock(
        &self,
        id: IncidentId,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self
                .locks
                .lock()
                .map_err(|_| ServiceError::Unavailable("incident lock map poisoned".to_string()))?;
            Arc::clone(
                map.entry(id)
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        Ok(lock.lock_owned().await)
    }
}

/// Plain-text report written into `resolution_notes` after a plan, in the
/// operator's report format.
fn plan_report_note(summary: &PlanSummary, outcome: &TriageOutcome, now: DateTime<Utc>) -> String {
    let incident = &summary.incident;
    let mut lines = Vec::new();
    lines.push(format!("[ {} ] Dispatch report", now.format("%d/%m/%Y %H:%M:%S")));
    lines.push(String::new());
    lines.push("Classification".to_string());
    lines.push(format!("- Type: {}", outcome.kind.label()));
    lines.push(format!(
        "- Code: {}",
        incident.code.map_or("pending".to_string(), |c| format!("{c:?}").to_lowercase())
    ));
    lines.push(format!("- Score: {}", outcome.score));
    for reason in &outcome.reasons {
        lines.push(format!("  - {reason}"));
    }
    lines.push(String::new());
    lines.push("Intervention".to_string());
    lines.push(format!(
        "- Force: {}",
        incident.assigned_force.map_or("n/a", |f| f.label())
    ));
    lines.push(format!(
        "- Dispatches: {}",
        summary
            .dispatches
            .iter()
            .map(|d| d.force.label())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    lines.push(String::new());
    lines.push("Mobility".to_string());
    if let Some(best) = summary.routes.first() {
        lines.push(format!("- Best route: {:.2} km", best.distance_km));
        lines.push(format!("- ETA: {:.1} min", best.estimated_time_minutes));
    } else {
        lines.push("- No routes available".to_string());
    }
    lines.push(format!(
        "- Green wave: {}",
        if incident.green_wave { "ACTIVE" } else { "no" }
    ));
    lines.join("\n")
}
