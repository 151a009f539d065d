//! # siren-proto
//!
//! Shared contracts for the Siren dispatch backbone.
//!
//! This crate holds the plain geo types, the normalized routing result, and
//! the triage wire contract, plus the async traits implemented by the
//! outbound adapters. It deliberately knows nothing about entities or
//! storage so the routing side never has to import the domain model.

pub mod geo;
pub mod route;
pub mod triage;

pub use geo::{
    Geocoder, Geometry, Point, detour_grid_path, grid_path, haversine_m, interpolate_line,
    path_to_line, point_segment_distance_m, sample_points,
};
pub use route::{RoutePlanner, RouteStep, RouteSummary};
pub use triage::{
    Code, ForceKind, RecommendedResource, TriageOutcome, TriageProvider, TriageSource,
    TriageWire, WireResource,
};
