//! Live progress tracking for dispatched resources.
//!
//! Snapshots are pull-based and fully derived: elapsed time against the
//! route's `calculated_at`, scaled by a deterministic simulated traffic
//! factor, interpolated along the stored geometry. The same resource,
//! incident and instant always produce the same snapshot, which is what
//! makes the simulation testable.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

use siren_proto::{Code, ForceKind, Point, interpolate_line};

use crate::config::TrackingConfig;
use crate::error::Result;
use crate::model::{
    CalculatedRoute, Dispatch, DispatchId, DispatchStatus, Incident, IncidentId, ResourceRef,
};
use crate::store::Store;

/// Simulated factor bounds.
const FACTOR_MIN: f64 = 0.45;
const FACTOR_MAX: f64 = 1.75;

/// One telemetry frame for a dispatched resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub resource_id: String,
    pub incident: IncidentId,
    pub dispatch: DispatchId,
    pub force: ForceKind,
    pub status: DispatchStatus,
    /// Fraction of the route covered, in [0, 1].
    pub progress: f64,
    pub current_position: Option<Point>,
    pub distance_km: f64,
    pub remaining_km: f64,
    pub speed_kmh: f64,
    pub eta_remaining_min: f64,
    pub traffic_factor: f64,
    /// `libre`, `moderado` or `congestionado`.
    pub traffic_level: String,
}

/// Deterministic PRNG for a resource/incident pair. The seed string is
/// `"{resource_id}-{incident_id}"`; draws must happen in a fixed order.
pub fn traffic_rng(resource_id: &str, incident: IncidentId) -> ChaCha8Rng {
    let seed = xxh64(format!("{resource_id}-{incident}").as_bytes(), 0);
    ChaCha8Rng::seed_from_u64(seed)
}

/// Simulated traffic factor for one resource of one incident.
///
/// Base draw in [0.85, 1.35); multiplied by a peak draw in [1.05, 1.25)
/// during the 07-10 and 17-20 local windows; red-code incidents run faster
/// (0.6 with signal preemption, 0.85 without). Clamped to [0.45, 1.75].
pub fn determine_traffic_factor(
    resource_id: &str,
    incident: IncidentId,
    code: Option<Code>,
    green_wave: bool,
    local_hour: u32,
) -> f64 {
    let mut rng = traffic_rng(resource_id, incident);
    let mut factor: f64 = rng.gen_range(0.85..1.35);
    if (7..10).contains(&local_hour) || (17..20).contains(&local_hour) {
        factor *= rng.gen_range(1.05..1.25);
    }
    if code == Some(Code::Red) {
        factor *= if green_wave { 0.6 } else { 0.85 };
    }
    factor.clamp(FACTOR_MIN, FACTOR_MAX)
}

/// Congestion band label shown to operators.
pub fn traffic_level(factor: f64) -> &'static str {
    if factor <= 0.7 {
        "libre"
    } else if factor <= 1.0 {
        "moderado"
    } else {
        "congestionado"
    }
}

pub struct TrackingEngine {
    store: Arc<Store>,
    offset: FixedOffset,
}

impl TrackingEngine {
    pub fn new(store: Arc<Store>, config: &TrackingConfig) -> Self {
        let offset =
            FixedOffset::east_opt(config.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
        Self { store, offset }
    }

    /// Snapshots for every resource of every dispatch currently en route or
    /// on scene.
    pub fn live(&self, now: DateTime<Utc>) -> Result<Vec<ResourceSnapshot>> {
        let mut snapshots = Vec::new();
        for dispatch in self.store.active_dispatches()? {
            if !matches!(dispatch.status, DispatchStatus::EnRoute | DispatchStatus::OnScene) {
                continue;
            }
            let incident = self.store.incident(dispatch.incident)?;
            snapshots.extend(self.dispatch_snapshots(&dispatch, &incident, now)?);
        }
        Ok(snapshots)
    }

    /// Snapshots for one incident, resolved ones frozen at completion.
    pub fn incident_snapshots(
        &self,
        incident_id: IncidentId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResourceSnapshot>> {
        let incident = self.store.incident(incident_id)?;
        let mut snapshots = Vec::new();
        for dispatch in self.store.dispatches_for_incident(incident_id)? {
            snapshots.extend(self.dispatch_snapshots(&dispatch, &incident, now)?);
        }
        Ok(snapshots)
    }

    fn dispatch_snapshots(
        &self,
        dispatch: &Dispatch,
        incident: &Incident,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResourceSnapshot>> {
        let mut snapshots = Vec::new();
        if let Some(vehicle_id) = dispatch.vehicle {
            let vehicle = self.store.vehicle(vehicle_id)?;
            let resource = ResourceRef::Vehicle(vehicle_id);
            snapshots.push(self.snapshot(
                dispatch,
                incident,
                &resource.resource_id(),
                vehicle.current_location,
                now,
            )?);
        }
        if let Some(agent_id) = dispatch.agent {
            let agent = self.store.agent(agent_id)?;
            let resource = ResourceRef::Agent(agent_id);
            snapshots.push(self.snapshot(
                dispatch,
                incident,
                &resource.resource_id(),
                agent.current_location,
                now,
            )?);
        }
        Ok(snapshots)
    }

    fn snapshot(
        &self,
        dispatch: &Dispatch,
        incident: &Incident,
        resource_id: &str,
        own_position: Option<Point>,
        now: DateTime<Utc>,
    ) -> Result<ResourceSnapshot> {
        let route = self.store.route_for_resource(incident.id, resource_id)?;
        let local_hour = now.with_timezone(&self.offset).hour();
        let factor = determine_traffic_factor(
            resource_id,
            incident.id,
            incident.code,
            incident.green_wave,
            local_hour,
        );

        let Some(route) = route else {
            // No stored geometry: the resource reports in place.
            return Ok(ResourceSnapshot {
                resource_id: resource_id.to_string(),
                incident: incident.id,
                dispatch: dispatch.id,
                force: dispatch.force,
                status: dispatch.status,
                progress: 0.0,
                current_position: own_position,
                distance_km: 0.0,
                remaining_km: 0.0,
                speed_kmh: 0.0,
                eta_remaining_min: 0.0,
                traffic_factor: factor,
                traffic_level: traffic_level(factor).to_string(),
            });
        };

        if incident.is_resolved() {
            return Ok(self.frozen_snapshot(dispatch, incident, &route, factor));
        }

        let adjusted_total_s = (route.estimated_time_minutes * 60.0).max(60.0) * factor;
        let elapsed_s = (now - route.calculated_at).num_milliseconds() as f64 / 1000.0;
        let elapsed_s = elapsed_s.max(0.0);
        let progress = (elapsed_s / adjusted_total_s).clamp(0.0, 1.0);

        let current_position =
            interpolate_line(route.geometry.coords(), progress).or(own_position);
        let remaining_km = route.distance_km * (1.0 - progress);
        let speed_kmh =
            (route.distance_km / (route.estimated_time_minutes / 60.0).max(0.1)) / factor.max(0.1);
        let eta_remaining_min = ((adjusted_total_s - elapsed_s).max(0.0)) / 60.0;

        debug!(resource = resource_id, progress, factor, "tracking snapshot");
        Ok(ResourceSnapshot {
            resource_id: resource_id.to_string(),
            incident: incident.id,
            dispatch: dispatch.id,
            force: dispatch.force,
            status: dispatch.status,
            progress,
            current_position,
            distance_km: route.distance_km,
            remaining_km,
            speed_kmh,
            eta_remaining_min,
            traffic_factor: factor,
            traffic_level: traffic_level(factor).to_string(),
        })
    }

    fn frozen_snapshot(
        &self,
        dispatch: &Dispatch,
        incident: &Incident,
        route: &CalculatedRoute,
        factor: f64,
    ) -> ResourceSnapshot {
        ResourceSnapshot {
            resource_id: route.resource_id.clone(),
            incident: incident.id,
            dispatch: dispatch.id,
            force: dispatch.force,
            status: dispatch.status,
            progress: 1.0,
            current_position: interpolate_line(route.geometry.coords(), 1.0),
            distance_km: route.distance_km,
            remaining_km: 0.0,
            speed_kmh: 0.0,
            eta_remaining_min: 0.0,
            traffic_factor: factor,
            traffic_level: traffic_level(factor).to_string(),
        }
    }
}
