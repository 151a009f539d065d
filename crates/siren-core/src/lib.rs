//! # siren-core
//!
//! Core pipeline of the Siren dispatch backbone.
//!
//! This crate provides:
//! - Triage classification of free-form incident descriptions
//! - Multi-force dispatch planning with route-aware resource selection
//! - Closure and congestion adjustment of computed routes
//! - Green-wave signal coordination for red-code dispatches
//! - Deterministic tracking snapshots for dispatched resources
//! - The indexed in-process store with the plan/resolve transactions

pub mod adjuster;
pub mod config;
pub mod error;
pub mod greenwave;
pub mod model;
pub mod parking;
pub mod planner;
pub mod selector;
pub mod service;
pub mod store;
pub mod tracking;
pub mod triage;

pub use adjuster::RouteAdjuster;
pub use config::{
    ConfigError, GeocoderConfig, GreenWaveConfig, RoutingConfig, SirenConfig, TrackingConfig,
    TriageBackend, TriageConfig,
};
pub use error::{Result, ServiceError};
pub use greenwave::{
    GreenWave, GreenWaveCoordinator, GreenWindow, Intersection, IntersectionCatalog,
    IntersectionKind, IntersectionStatus, WaveResource,
};
pub use model::{
    Agent, AgentId, AgentStatus, CalculatedRoute, ClosureId, CountKind, Dispatch, DispatchId,
    DispatchStatus, Facility, FacilityId, FacilityKind, Hospital, HospitalId, Incident,
    IncidentId, IncidentStatus, ParkingSpot, ParkingSpotId, ResourceRef, RouteId, RouteStatus,
    StreetClosure, TrafficCount, TrafficCountId, Vehicle, VehicleId, VehicleStatus,
};
pub use parking::{EmergencyParking, ParkingOption, ParkingPlan, ParkingPlanSet};
pub use planner::{DispatchPlanner, PlanSummary};
pub use selector::{RankedCandidate, RankedSelection, ResourceSelector};
pub use service::{DispatchService, NewIncident, PlanReport};
pub use store::{
    ClosureSeed, NewDispatch, NewRoute, OpsSummary, ParkingSeed, PlanCommit, ResolutionSummary,
    Store, TrafficCountSeed,
};
pub use tracking::{
    ResourceSnapshot, TrackingEngine, determine_traffic_factor, traffic_level, traffic_rng,
};
pub use triage::{TriageEngine, code_for_score};
