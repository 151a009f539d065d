//! Domain entities.
//!
//! All IDs are opaque table-scoped integers wrapped in newtypes so they
//! cannot be mixed up. Status transitions happen only through the store's
//! transactional operations; nothing here mutates on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use siren_proto::{Code, ForceKind, Geometry, Point};

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(IncidentId);
entity_id!(VehicleId);
entity_id!(AgentId);
entity_id!(DispatchId);
entity_id!(RouteId);
entity_id!(FacilityId);
entity_id!(HospitalId);
entity_id!(ClosureId);
entity_id!(TrafficCountId);
entity_id!(ParkingSpotId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    EnRoute,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Available,
    EnRoute,
    OnScene,
    Busy,
    OffDuty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Pending,
    Assigned,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Dispatched,
    EnRoute,
    OnScene,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilityKind {
    PoliceStation,
    FireStation,
    TrafficBase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountKind {
    Vehicle,
    Speed,
    Occupancy,
}

/// Either side of the fleet: a vehicle or a field agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceRef {
    Vehicle(VehicleId),
    Agent(AgentId),
}

impl ResourceRef {
    /// Stable string form used by `CalculatedRoute.resource_id` and the
    /// tracking seed (`vehicle_3`, `agent_7`).
    pub fn resource_id(self) -> String {
        match self {
            ResourceRef::Vehicle(id) => format!("vehicle_{id}"),
            ResourceRef::Agent(id) => format!("agent_{id}"),
        }
    }
}

/// Base station owning vehicles. Deleting one detaches its fleet instead of
/// cascading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Facility {
    pub id: FacilityId,
    pub name: String,
    pub kind: FacilityKind,
    pub force: Option<ForceKind>,
    pub location: Option<Point>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hospital {
    pub id: HospitalId,
    pub name: String,
    pub location: Option<Point>,
    pub total_beds: u32,
    pub occupied_beds: u32,
}

impl Hospital {
    /// Free beds, clamped at zero when occupancy exceeds capacity.
    pub fn available_beds(&self) -> u32 {
        self.total_beds.saturating_sub(self.occupied_beds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub force: ForceKind,
    /// Fleet type label (`patrol`, `ambulance`, `fire_engine`, ...).
    pub kind: String,
    pub status: VehicleStatus,
    pub current_location: Option<Point>,
    pub target_location: Option<Point>,
    pub home_facility: Option<FacilityId>,
}

impl Vehicle {
    pub fn resource_id(&self) -> String {
        ResourceRef::Vehicle(self.id).resource_id()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub force: ForceKind,
    pub name: String,
    pub role: String,
    pub status: AgentStatus,
    pub current_location: Option<Point>,
    pub target_location: Option<Point>,
    pub assigned_vehicle: Option<VehicleId>,
    pub home_facility: Option<FacilityId>,
}

impl Agent {
    pub fn resource_id(&self) -> String {
        ResourceRef::Agent(self.id).resource_id()
    }
}

/// A reported emergency moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub description: String,
    pub address: Option<String>,
    pub location: Option<Point>,
    /// Absent until triage has run.
    pub code: Option<Code>,
    pub priority: u8,
    pub status: IncidentStatus,
    /// Signal preemption eligibility; forced true for red code.
    pub green_wave: bool,
    pub assigned_force: Option<ForceKind>,
    pub assigned_vehicle: Option<VehicleId>,
    pub reported_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: String,
    pub ai_response: String,
}

impl Incident {
    /// Applies the code-bound invariants: red forces priority 10 and the
    /// green wave, yellow priority 5, green priority 1.
    pub fn apply_code(&mut self, code: Code) {
        self.code = Some(code);
        self.priority = code.priority();
        if code == Code::Red {
            self.green_wave = true;
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == IncidentStatus::Resolved
    }
}

/// One per (incident, force); ties the incident to at most one vehicle and
/// one agent of that force.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: DispatchId,
    pub incident: IncidentId,
    pub force: ForceKind,
    pub vehicle: Option<VehicleId>,
    pub agent: Option<AgentId>,
    pub status: DispatchStatus,
    pub created_at: DateTime<Utc>,
}

impl Dispatch {
    pub fn has_resource(&self) -> bool {
        self.vehicle.is_some() || self.agent.is_some()
    }
}

/// A stored route for one resource toward one incident. Rewritten as a set
/// on every re-plan; only the status fields mutate afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatedRoute {
    pub id: RouteId,
    pub incident: IncidentId,
    /// `vehicle_{id}` or `agent_{id}`.
    pub resource_id: String,
    /// Display label (`patrol - police`).
    pub resource_label: String,
    pub distance_km: f64,
    pub estimated_time_minutes: f64,
    pub priority_score: f64,
    /// LineString with at least 2 coordinate pairs.
    pub geometry: Geometry,
    pub status: RouteStatus,
    pub calculated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreetClosure {
    pub id: ClosureId,
    pub name: String,
    pub closure_type: String,
    pub point_location: Option<Point>,
    pub geometry: Option<Geometry>,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl StreetClosure {
    /// Active flag plus the validity window.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_at <= now && self.end_at.map_or(true, |end| end >= now)
    }
}

/// Read-only traffic telemetry used for the congestion factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficCount {
    pub id: TrafficCountId,
    pub location: Point,
    pub count_type: CountKind,
    pub count_value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub period_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkingSpot {
    pub id: ParkingSpotId,
    pub name: String,
    pub location: Point,
    pub total_spaces: u32,
    pub available_spaces: u32,
    pub spot_type: String,
    pub is_paid: bool,
    pub max_duration_hours: Option<u32>,
    pub is_active: bool,
}

impl ParkingSpot {
    /// Occupied fraction as a percentage of total capacity.
    pub fn occupancy_rate(&self) -> f64 {
        if self.total_spaces == 0 {
            return 0.0;
        }
        let occupied = self.total_spaces.saturating_sub(self.available_spaces);
        f64::from(occupied) / f64::from(self.total_spaces) * 100.0
    }
}
