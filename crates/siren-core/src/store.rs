//! In-process store with relational shape.
//!
//! One map per table plus explicitly maintained secondary indexes:
//! `(force, status)` for vehicles and agents, `(incident, status)` for
//! calculated routes, the active set for street closures, and the
//! `(incident, force)` uniqueness index for dispatches.
//!
//! All state sits behind a single `RwLock`. The two transactional
//! boundaries of the pipeline, the full re-plan commit and the resolution,
//! are each one write-lock mutation that validates every precondition
//! before touching anything, so a failed commit leaves no partial write
//! behind. Reads never mutate.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use siren_proto::{Code, ForceKind, Geometry, Point, haversine_m};

use crate::error::{Result, ServiceError};
use crate::model::{
    Agent, AgentId, AgentStatus, CalculatedRoute, ClosureId, CountKind, Dispatch, DispatchId,
    DispatchStatus, Facility, FacilityId, FacilityKind, Hospital, HospitalId, Incident,
    IncidentId, IncidentStatus, ParkingSpot, ParkingSpotId, RouteId, RouteStatus, StreetClosure,
    TrafficCount, TrafficCountId, Vehicle, VehicleId, VehicleStatus,
};

/// Row content for a street closure insert.
#[derive(Debug, Clone)]
pub struct ClosureSeed {
    pub name: String,
    pub closure_type: String,
    pub point_location: Option<Point>,
    pub geometry: Option<Geometry>,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Row content for a traffic count insert.
#[derive(Debug, Clone)]
pub struct TrafficCountSeed {
    pub location: Point,
    pub count_type: CountKind,
    pub count_value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub period_minutes: u32,
}

/// Row content for a parking spot insert.
#[derive(Debug, Clone)]
pub struct ParkingSeed {
    pub name: String,
    pub location: Point,
    pub total_spaces: u32,
    pub available_spaces: u32,
    pub spot_type: String,
    pub is_paid: bool,
    pub max_duration_hours: Option<u32>,
}

/// A dispatch row to create inside a plan commit.
#[derive(Debug, Clone)]
pub struct NewDispatch {
    pub force: ForceKind,
    pub vehicle: Option<VehicleId>,
    pub agent: Option<AgentId>,
    pub status: DispatchStatus,
}

/// A route row to insert inside a plan commit.
#[derive(Debug, Clone)]
pub struct NewRoute {
    pub resource_id: String,
    pub resource_label: String,
    pub distance_km: f64,
    pub estimated_time_minutes: f64,
    pub priority_score: f64,
    pub geometry: Geometry,
}

/// Everything a full re-plan writes, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct PlanCommit {
    pub new_dispatches: Vec<NewDispatch>,
    /// Vehicles to move `available -> en_route` toward a target.
    pub dispatch_vehicles: Vec<(VehicleId, Point)>,
    /// Agents to move `available -> en_route` toward a target.
    pub dispatch_agents: Vec<(AgentId, Point)>,
    pub routes: Vec<NewRoute>,
    pub assigned_force: Option<ForceKind>,
    pub assigned_vehicle: Option<VehicleId>,
    /// Move the incident `pending -> assigned`.
    pub mark_assigned: bool,
    /// Free-form line appended to `resolution_notes`.
    pub note: Option<String>,
}

/// What a resolution released, for logging and the caller's summary.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ResolutionSummary {
    pub dispatches_finished: usize,
    pub routes_completed: usize,
    pub vehicles_released: usize,
    pub agents_released: usize,
}

/// Fleet and capacity counts for the operations summary.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OpsSummary {
    pub vehicles_total: usize,
    pub vehicles_available: usize,
    pub vehicles_engaged: usize,
    pub beds_total: u32,
    pub beds_occupied: u32,
    pub beds_available: u32,
    pub dispatches_active: usize,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    incidents: HashMap<IncidentId, Incident>,
    vehicles: HashMap<VehicleId, Vehicle>,
    agents: HashMap<AgentId, Agent>,
    dispatches: HashMap<DispatchId, Dispatch>,
    routes: HashMap<RouteId, CalculatedRoute>,
    facilities: HashMap<FacilityId, Facility>,
    hospitals: HashMap<HospitalId, Hospital>,
    closures: HashMap<ClosureId, StreetClosure>,
    traffic_counts: HashMap<TrafficCountId, TrafficCount>,
    parking: HashMap<ParkingSpotId, ParkingSpot>,

    vehicles_by_force_status: HashMap<(ForceKind, VehicleStatus), BTreeSet<VehicleId>>,
    agents_by_force_status: HashMap<(ForceKind, AgentStatus), BTreeSet<AgentId>>,
    routes_by_incident_status: HashMap<(IncidentId, RouteStatus), BTreeSet<RouteId>>,
    dispatch_by_incident_force: HashMap<(IncidentId, ForceKind), DispatchId>,
    active_closures: BTreeSet<ClosureId>,
}

impl Inner {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn index_vehicle(&mut self, vehicle: &Vehicle) {
        self.vehicles_by_force_status
            .entry((vehicle.force, vehicle.status))
            .or_default()
            .insert(vehicle.id);
    }

    fn unindex_vehicle(&mut self, vehicle: &Vehicle) {
        if let Some(set) = self
            .vehicles_by_force_status
            .get_mut(&(vehicle.force, vehicle.status))
        {
            set.remove(&vehicle.id);
        }
    }

    fn index_agent(&mut self, agent: &Agent) {
        self.agents_by_force_status
            .entry((agent.force, agent.status))
            .or_default()
            .insert(agent.id);
    }

    fn unindex_agent(&mut self, agent: &Agent) {
        if let Some(set) = self
            .agents_by_force_status
            .get_mut(&(agent.force, agent.status))
        {
            set.remove(&agent.id);
        }
    }

    fn index_route(&mut self, route: &CalculatedRoute) {
        self.routes_by_incident_status
            .entry((route.incident, route.status))
            .or_default()
            .insert(route.id);
    }

    fn unindex_route(&mut self, route: &CalculatedRoute) {
        if let Some(set) = self
            .routes_by_incident_status
            .get_mut(&(route.incident, route.status))
        {
            set.remove(&route.id);
        }
    }

    fn set_vehicle_status(&mut self, id: VehicleId, status: VehicleStatus, target: Option<Point>) {
        if let Some(mut vehicle) = self.vehicles.remove(&id) {
            self.unindex_vehicle(&vehicle);
            vehicle.status = status;
            vehicle.target_location = target;
            self.index_vehicle(&vehicle);
            self.vehicles.insert(id, vehicle);
        }
    }

    fn set_agent_status(&mut self, id: AgentId, status: AgentStatus, target: Option<Point>) {
        if let Some(mut agent) = self.agents.remove(&id) {
            self.unindex_agent(&agent);
            agent.status = status;
            agent.target_location = target;
            self.index_agent(&agent);
            self.agents.insert(id, agent);
        }
    }
}

/// The process-wide store. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| ServiceError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| ServiceError::Unavailable("store lock poisoned".to_string()))
    }

    // ---- seeding -------------------------------------------------------

    pub fn add_vehicle(
        &self,
        force: ForceKind,
        kind: &str,
        location: Option<Point>,
    ) -> Result<VehicleId> {
        let mut inner = self.write()?;
        let id = VehicleId(inner.next());
        let vehicle = Vehicle {
            id,
            force,
            kind: kind.to_string(),
            status: VehicleStatus::Available,
            current_location: location,
            target_location: None,
            home_facility: None,
        };
        inner.index_vehicle(&vehicle);
        inner.vehicles.insert(id, vehicle);
        Ok(id)
    }

    pub fn add_agent(
        &self,
        force: ForceKind,
        name: &str,
        role: &str,
        location: Option<Point>,
    ) -> Result<AgentId> {
        let mut inner = self.write()?;
        let id = AgentId(inner.next());
        let agent = Agent {
            id,
            force,
            name: name.to_string(),
            role: role.to_string(),
            status: AgentStatus::Available,
            current_location: location,
            target_location: None,
            assigned_vehicle: None,
            home_facility: None,
        };
        inner.index_agent(&agent);
        inner.agents.insert(id, agent);
        Ok(id)
    }

    pub fn add_facility(
        &self,
        name: &str,
        kind: FacilityKind,
        force: Option<ForceKind>,
        location: Option<Point>,
    ) -> Result<FacilityId> {
        let mut inner = self.write()?;
        let id = FacilityId(inner.next());
        inner.facilities.insert(
            id,
            Facility {
                id,
                name: name.to_string(),
                kind,
                force,
                location,
            },
        );
        Ok(id)
    }

    pub fn add_hospital(
        &self,
        name: &str,
        location: Option<Point>,
        total_beds: u32,
        occupied_beds: u32,
    ) -> Result<HospitalId> {
        let mut inner = self.write()?;
        let id = HospitalId(inner.next());
        inner.hospitals.insert(
            id,
            Hospital {
                id,
                name: name.to_string(),
                location,
                total_beds,
                occupied_beds: occupied_beds.min(total_beds),
            },
        );
        Ok(id)
    }

    pub fn add_closure(&self, seed: ClosureSeed) -> Result<ClosureId> {
        let mut inner = self.write()?;
        let id = ClosureId(inner.next());
        if seed.is_active {
            inner.active_closures.insert(id);
        }
        inner.closures.insert(
            id,
            StreetClosure {
                id,
                name: seed.name,
                closure_type: seed.closure_type,
                point_location: seed.point_location,
                geometry: seed.geometry,
                start_at: seed.start_at,
                end_at: seed.end_at,
                is_active: seed.is_active,
            },
        );
        Ok(id)
    }

    pub fn add_traffic_count(&self, seed: TrafficCountSeed) -> Result<TrafficCountId> {
        let mut inner = self.write()?;
        let id = TrafficCountId(inner.next());
        inner.traffic_counts.insert(
            id,
            TrafficCount {
                id,
                location: seed.location,
                count_type: seed.count_type,
                count_value: seed.count_value,
                unit: seed.unit,
                timestamp: seed.timestamp,
                period_minutes: seed.period_minutes,
            },
        );
        Ok(id)
    }

    pub fn add_parking(&self, seed: ParkingSeed) -> Result<ParkingSpotId> {
        let mut inner = self.write()?;
        let id = ParkingSpotId(inner.next());
        inner.parking.insert(
            id,
            ParkingSpot {
                id,
                name: seed.name,
                location: seed.location,
                total_spaces: seed.total_spaces,
                available_spaces: seed.available_spaces.min(seed.total_spaces),
                spot_type: seed.spot_type,
                is_paid: seed.is_paid,
                max_duration_hours: seed.max_duration_hours,
                is_active: true,
            },
        );
        Ok(id)
    }

    /// Deleting a facility detaches its vehicles instead of cascading.
    pub fn delete_facility(&self, id: FacilityId) -> Result<usize> {
        let mut inner = self.write()?;
        if inner.facilities.remove(&id).is_none() {
            return Err(ServiceError::NotFound(format!("facility {id}")));
        }
        let mut detached = 0;
        for vehicle in inner.vehicles.values_mut() {
            if vehicle.home_facility == Some(id) {
                vehicle.home_facility = None;
                detached += 1;
            }
        }
        for agent in inner.agents.values_mut() {
            if agent.home_facility == Some(id) {
                agent.home_facility = None;
            }
        }
        debug!(facility = %id, detached, "facility removed, fleet detached");
        Ok(detached)
    }

    // ---- incidents -----------------------------------------------------

    pub fn create_incident(
        &self,
        description: &str,
        address: Option<String>,
        location: Option<Point>,
        now: DateTime<Utc>,
    ) -> Result<Incident> {
        let mut inner = self.write()?;
        let id = IncidentId(inner.next());
        let incident = Incident {
            id,
            description: description.to_string(),
            address,
            location,
            code: None,
            priority: 0,
            status: IncidentStatus::Pending,
            green_wave: false,
            assigned_force: None,
            assigned_vehicle: None,
            reported_at: now,
            resolved_at: None,
            resolution_notes: String::new(),
            ai_response: String::new(),
        };
        inner.incidents.insert(id, incident.clone());
        Ok(incident)
    }

    pub fn incident(&self, id: IncidentId) -> Result<Incident> {
        self.read()?
            .incidents
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("incident {id}")))
    }

    pub fn incidents(&self) -> Result<Vec<Incident>> {
        let inner = self.read()?;
        let mut all: Vec<Incident> = inner.incidents.values().cloned().collect();
        all.sort_by_key(|i| i.id);
        Ok(all)
    }

    /// Records the triage outcome on the incident, enforcing the code
    /// invariants. Rejected once the incident is resolved.
    pub fn record_classification(
        &self,
        id: IncidentId,
        code: Code,
        narrative: &str,
        note: &str,
    ) -> Result<Incident> {
        let mut inner = self.write()?;
        let incident = inner
            .incidents
            .get_mut(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("incident {id}")))?;
        if incident.is_resolved() {
            return Err(ServiceError::Conflict(format!(
                "incident {id} is resolved; classification is frozen"
            )));
        }
        incident.apply_code(code);
        incident.ai_response = narrative.to_string();
        if !note.is_empty() {
            if !incident.resolution_notes.is_empty() {
                incident.resolution_notes.push('\n');
            }
            incident.resolution_notes.push_str(note);
        }
        Ok(incident.clone())
    }

    /// Appends a free-form line to the incident's resolution notes.
    pub fn append_note(&self, id: IncidentId, note: &str) -> Result<()> {
        if note.is_empty() {
            return Ok(());
        }
        let mut inner = self.write()?;
        let incident = inner
            .incidents
            .get_mut(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("incident {id}")))?;
        if !incident.resolution_notes.is_empty() {
            incident.resolution_notes.push('\n');
        }
        incident.resolution_notes.push_str(note);
        Ok(())
    }

    // ---- fleet queries -------------------------------------------------

    pub fn vehicle(&self, id: VehicleId) -> Result<Vehicle> {
        self.read()?
            .vehicles
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("vehicle {id}")))
    }

    pub fn agent(&self, id: AgentId) -> Result<Agent> {
        self.read()?
            .agents
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("agent {id}")))
    }

    /// Vehicles of a force in any of the given statuses, via the
    /// `(force, status)` index.
    pub fn vehicles_by_force(
        &self,
        force: ForceKind,
        statuses: &[VehicleStatus],
    ) -> Result<Vec<Vehicle>> {
        let inner = self.read()?;
        let mut out = Vec::new();
        for status in statuses {
            if let Some(ids) = inner.vehicles_by_force_status.get(&(force, *status)) {
                for id in ids {
                    if let Some(vehicle) = inner.vehicles.get(id) {
                        out.push(vehicle.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn agents_by_force(
        &self,
        force: ForceKind,
        statuses: &[AgentStatus],
    ) -> Result<Vec<Agent>> {
        let inner = self.read()?;
        let mut out = Vec::new();
        for status in statuses {
            if let Some(ids) = inner.agents_by_force_status.get(&(force, *status)) {
                for id in ids {
                    if let Some(agent) = inner.agents.get(id) {
                        out.push(agent.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    // ---- dispatches and routes ----------------------------------------

    pub fn dispatches_for_incident(&self, incident: IncidentId) -> Result<Vec<Dispatch>> {
        let inner = self.read()?;
        let mut out: Vec<Dispatch> = inner
            .dispatches
            .values()
            .filter(|d| d.incident == incident)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.id);
        Ok(out)
    }

    /// Dispatches whose work is not finished, across all incidents.
    pub fn active_dispatches(&self) -> Result<Vec<Dispatch>> {
        let inner = self.read()?;
        let mut out: Vec<Dispatch> = inner
            .dispatches
            .values()
            .filter(|d| d.status != DispatchStatus::Finished)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.id);
        Ok(out)
    }

    /// Stored routes for an incident, optionally filtered by status,
    /// ordered by `(priority_score, distance_km)`.
    pub fn routes_for_incident(
        &self,
        incident: IncidentId,
        status: Option<RouteStatus>,
    ) -> Result<Vec<CalculatedRoute>> {
        let inner = self.read()?;
        let statuses = match status {
            Some(s) => vec![s],
            None => vec![RouteStatus::Active, RouteStatus::Completed, RouteStatus::Cancelled],
        };
        let mut out = Vec::new();
        for s in statuses {
            if let Some(ids) = inner.routes_by_incident_status.get(&(incident, s)) {
                for id in ids {
                    if let Some(route) = inner.routes.get(id) {
                        out.push(route.clone());
                    }
                }
            }
        }
        out.sort_by(|a, b| {
            (a.priority_score, a.distance_km)
                .partial_cmp(&(b.priority_score, b.distance_km))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(out)
    }

    /// The route a resource is currently driving for an incident: the
    /// active row if any, otherwise the latest completed one.
    pub fn route_for_resource(
        &self,
        incident: IncidentId,
        resource_id: &str,
    ) -> Result<Option<CalculatedRoute>> {
        let inner = self.read()?;
        for status in [RouteStatus::Active, RouteStatus::Completed] {
            let mut candidates: Vec<&CalculatedRoute> = inner
                .routes_by_incident_status
                .get(&(incident, status))
                .into_iter()
                .flatten()
                .filter_map(|id| inner.routes.get(id))
                .filter(|r| r.resource_id == resource_id)
                .collect();
            candidates.sort_by_key(|r| std::cmp::Reverse(r.calculated_at));
            if let Some(route) = candidates.first() {
                return Ok(Some((*route).clone()));
            }
        }
        Ok(None)
    }

    // ---- transactional boundaries -------------------------------------

    /// Applies a full re-plan in one transaction: active routes are
    /// replaced as a set, dispatches created, fleet statuses moved, and the
    /// incident summary updated. Every precondition is checked before the
    /// first mutation so a `Conflict` leaves the store untouched.
    pub fn commit_plan(
        &self,
        incident_id: IncidentId,
        commit: PlanCommit,
        now: DateTime<Utc>,
    ) -> Result<Vec<CalculatedRoute>> {
        let mut inner = self.write()?;

        let incident = inner
            .incidents
            .get(&incident_id)
            .ok_or_else(|| ServiceError::NotFound(format!("incident {incident_id}")))?;
        if incident.is_resolved() {
            return Err(ServiceError::Conflict(format!(
                "incident {incident_id} is resolved; plans are frozen"
            )));
        }

        // Dispatch uniqueness per (incident, force).
        let mut seen = BTreeSet::new();
        for d in &commit.new_dispatches {
            if inner
                .dispatch_by_incident_force
                .contains_key(&(incident_id, d.force))
                || !seen.insert(d.force)
            {
                return Err(ServiceError::Conflict(format!(
                    "dispatch for incident {incident_id} and force {} already exists",
                    d.force.label()
                )));
            }
        }

        // A vehicle already en route must never be dispatched again.
        for (id, _) in &commit.dispatch_vehicles {
            let vehicle = inner
                .vehicles
                .get(id)
                .ok_or_else(|| ServiceError::NotFound(format!("vehicle {id}")))?;
            if vehicle.status != VehicleStatus::Available {
                return Err(ServiceError::Conflict(format!(
                    "vehicle {id} is not available"
                )));
            }
        }
        for (id, _) in &commit.dispatch_agents {
            let agent = inner
                .agents
                .get(id)
                .ok_or_else(|| ServiceError::NotFound(format!("agent {id}")))?;
            if agent.status != AgentStatus::Available {
                return Err(ServiceError::Conflict(format!("agent {id} is not available")));
            }
        }

        for route in &commit.routes {
            if !route.geometry.is_line() || route.geometry.coords().len() < 2 {
                return Err(ServiceError::Conflict(format!(
                    "route for {} has a degenerate geometry",
                    route.resource_id
                )));
            }
        }

        // All checks passed; mutate.

        // Rewrite the active route set.
        let stale: Vec<RouteId> = inner
            .routes_by_incident_status
            .get(&(incident_id, RouteStatus::Active))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        for id in stale {
            if let Some(route) = inner.routes.remove(&id) {
                inner.unindex_route(&route);
            }
        }

        let mut inserted = Vec::with_capacity(commit.routes.len());
        for new_route in commit.routes {
            let id = RouteId(inner.next());
            let route = CalculatedRoute {
                id,
                incident: incident_id,
                resource_id: new_route.resource_id,
                resource_label: new_route.resource_label,
                distance_km: new_route.distance_km,
                estimated_time_minutes: new_route.estimated_time_minutes,
                priority_score: new_route.priority_score,
                geometry: new_route.geometry,
                status: RouteStatus::Active,
                calculated_at: now,
                completed_at: None,
            };
            inner.index_route(&route);
            inner.routes.insert(id, route.clone());
            inserted.push(route);
        }

        for d in commit.new_dispatches {
            let id = DispatchId(inner.next());
            inner
                .dispatch_by_incident_force
                .insert((incident_id, d.force), id);
            inner.dispatches.insert(
                id,
                Dispatch {
                    id,
                    incident: incident_id,
                    force: d.force,
                    vehicle: d.vehicle,
                    agent: d.agent,
                    status: d.status,
                    created_at: now,
                },
            );
        }

        for (id, target) in commit.dispatch_vehicles {
            inner.set_vehicle_status(id, VehicleStatus::EnRoute, Some(target));
        }
        for (id, target) in commit.dispatch_agents {
            inner.set_agent_status(id, AgentStatus::EnRoute, Some(target));
        }

        let incident = inner
            .incidents
            .get_mut(&incident_id)
            .ok_or_else(|| ServiceError::NotFound(format!("incident {incident_id}")))?;
        if let Some(force) = commit.assigned_force {
            incident.assigned_force = Some(force);
        }
        if let Some(vehicle) = commit.assigned_vehicle {
            incident.assigned_vehicle = Some(vehicle);
        }
        if commit.mark_assigned && incident.status == IncidentStatus::Pending {
            incident.status = IncidentStatus::Assigned;
        }
        if let Some(note) = commit.note {
            if !incident.resolution_notes.is_empty() {
                incident.resolution_notes.push('\n');
            }
            incident.resolution_notes.push_str(&note);
        }

        inserted.sort_by(|a, b| {
            (a.priority_score, a.distance_km)
                .partial_cmp(&(b.priority_score, b.distance_km))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(inserted)
    }

    /// Resolution transaction: incident terminal state, every dispatch
    /// finished, every resource released, every active route completed at
    /// the resolve instant.
    pub fn resolve_incident(
        &self,
        incident_id: IncidentId,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolutionSummary> {
        let mut inner = self.write()?;

        let incident = inner
            .incidents
            .get_mut(&incident_id)
            .ok_or_else(|| ServiceError::NotFound(format!("incident {incident_id}")))?;
        if incident.is_resolved() {
            return Err(ServiceError::Conflict(format!(
                "incident {incident_id} is already resolved"
            )));
        }
        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(now);
        if !notes.is_empty() {
            if !incident.resolution_notes.is_empty() {
                incident.resolution_notes.push('\n');
            }
            incident.resolution_notes.push_str(&format!("Resolution: {notes}"));
        }

        let mut summary = ResolutionSummary::default();

        let dispatch_ids: Vec<DispatchId> = inner
            .dispatches
            .values()
            .filter(|d| d.incident == incident_id)
            .map(|d| d.id)
            .collect();
        let mut release_vehicles = Vec::new();
        let mut release_agents = Vec::new();
        for id in dispatch_ids {
            if let Some(dispatch) = inner.dispatches.get_mut(&id) {
                if dispatch.status != DispatchStatus::Finished {
                    dispatch.status = DispatchStatus::Finished;
                    summary.dispatches_finished += 1;
                }
                if let Some(v) = dispatch.vehicle {
                    release_vehicles.push(v);
                }
                if let Some(a) = dispatch.agent {
                    release_agents.push(a);
                }
            }
        }
        for id in release_vehicles {
            if inner.vehicles.get(&id).is_some_and(|v| v.status != VehicleStatus::Available) {
                inner.set_vehicle_status(id, VehicleStatus::Available, None);
                summary.vehicles_released += 1;
            }
        }
        for id in release_agents {
            if inner.agents.get(&id).is_some_and(|a| a.status != AgentStatus::Available) {
                inner.set_agent_status(id, AgentStatus::Available, None);
                summary.agents_released += 1;
            }
        }

        let active: Vec<RouteId> = inner
            .routes_by_incident_status
            .get(&(incident_id, RouteStatus::Active))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        for id in active {
            if let Some(mut route) = inner.routes.remove(&id) {
                inner.unindex_route(&route);
                route.status = RouteStatus::Completed;
                route.completed_at = Some(now);
                inner.index_route(&route);
                inner.routes.insert(id, route);
                summary.routes_completed += 1;
            }
        }

        debug!(
            incident = %incident_id,
            dispatches = summary.dispatches_finished,
            routes = summary.routes_completed,
            "incident resolved"
        );
        Ok(summary)
    }

    // ---- environment queries ------------------------------------------

    /// Closures that are currently in force.
    pub fn active_closures(&self, now: DateTime<Utc>) -> Result<Vec<StreetClosure>> {
        let inner = self.read()?;
        let mut out = Vec::new();
        for id in &inner.active_closures {
            if let Some(closure) = inner.closures.get(id) {
                if closure.is_current(now) {
                    out.push(closure.clone());
                }
            }
        }
        Ok(out)
    }

    /// Nearest recent traffic counts around a sample point, with their
    /// distance in metres. At most five rows, nearest first.
    pub fn traffic_counts_near(
        &self,
        point: Point,
        radius_m: f64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<(TrafficCount, f64)>> {
        let inner = self.read()?;
        let since = now - window;
        let mut rows: Vec<(TrafficCount, f64)> = inner
            .traffic_counts
            .values()
            .filter(|c| c.timestamp >= since && c.timestamp <= now)
            .filter_map(|c| {
                let d = haversine_m(point, c.location);
                (d <= radius_m).then(|| (c.clone(), d))
            })
            .collect();
        rows.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        rows.truncate(5);
        Ok(rows)
    }

    /// Active parking spots with enough free spaces inside the radius,
    /// nearest first, capped at ten options.
    pub fn parking_near(
        &self,
        point: Point,
        radius_m: f64,
        min_spaces: u32,
    ) -> Result<Vec<(ParkingSpot, f64)>> {
        let inner = self.read()?;
        let mut rows: Vec<(ParkingSpot, f64)> = inner
            .parking
            .values()
            .filter(|p| p.is_active && p.available_spaces >= min_spaces)
            .filter_map(|p| {
                let d = haversine_m(point, p.location);
                (d <= radius_m).then(|| (p.clone(), d))
            })
            .collect();
        rows.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        rows.truncate(10);
        Ok(rows)
    }

    pub fn hospitals(&self) -> Result<Vec<Hospital>> {
        let inner = self.read()?;
        let mut all: Vec<Hospital> = inner.hospitals.values().cloned().collect();
        all.sort_by_key(|h| h.id);
        Ok(all)
    }

    pub fn facility_vehicles(&self, facility: FacilityId) -> Result<Vec<Vehicle>> {
        let inner = self.read()?;
        let mut out: Vec<Vehicle> = inner
            .vehicles
            .values()
            .filter(|v| v.home_facility == Some(facility))
            .cloned()
            .collect();
        out.sort_by_key(|v| v.id);
        Ok(out)
    }

    /// Vehicle counts per fleet type for one facility.
    pub fn facility_vehicle_counts(&self, facility: FacilityId) -> Result<Vec<(String, usize)>> {
        let inner = self.read()?;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for vehicle in inner.vehicles.values() {
            if vehicle.home_facility == Some(facility) {
                *counts.entry(vehicle.kind.clone()).or_default() += 1;
            }
        }
        let mut out: Vec<(String, usize)> = counts.into_iter().collect();
        out.sort();
        Ok(out)
    }

    /// Fleet and bed counters for the operations dashboard.
    pub fn ops_summary(&self) -> Result<OpsSummary> {
        let inner = self.read()?;
        let mut summary = OpsSummary {
            vehicles_total: inner.vehicles.len(),
            ..OpsSummary::default()
        };
        for vehicle in inner.vehicles.values() {
            match vehicle.status {
                VehicleStatus::Available => summary.vehicles_available += 1,
                VehicleStatus::EnRoute | VehicleStatus::Busy => summary.vehicles_engaged += 1,
            }
        }
        for hospital in inner.hospitals.values() {
            summary.beds_total += hospital.total_beds;
            summary.beds_occupied += hospital.occupied_beds.min(hospital.total_beds);
        }
        summary.beds_available = summary.beds_total.saturating_sub(summary.beds_occupied);
        summary.dispatches_active = inner
            .dispatches
            .values()
            .filter(|d| d.status != DispatchStatus::Finished)
            .count();
        Ok(summary)
    }
}
