//! Normalized routing contract.
//!
//! Every provider backend, whatever its wire format, is reduced to a
//! `RouteSummary` before the rest of the system sees it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::geo::{Geometry, Point};

/// One navigation instruction of a route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteStep {
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub distance_m: f64,
    #[serde(default)]
    pub duration_s: f64,
}

/// A computed route, normalized across providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSummary {
    /// Which backend produced the route (`mapbox`, `openroute`, `osrm`,
    /// `graphhopper`, `fallback`, `detour`).
    pub provider: String,
    pub geometry: Geometry,
    pub distance_m: f64,
    pub duration_s: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<RouteStep>,
    /// Duration before the congestion multiplier was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_duration_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub congestion_factor: Option<f64>,
    #[serde(default)]
    pub traffic_adjusted: bool,
    /// Set when no closure-free alternative could be found.
    #[serde(default)]
    pub intersects_closures: bool,
    /// Names of the active closures the route crosses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub closures_warning: Vec<String>,
}

impl RouteSummary {
    pub fn new(provider: impl Into<String>, geometry: Geometry, distance_m: f64, duration_s: f64) -> Self {
        Self {
            provider: provider.into(),
            geometry,
            distance_m,
            duration_s,
            steps: Vec::new(),
            original_duration_s: None,
            congestion_factor: None,
            traffic_adjusted: false,
            intersects_closures: false,
            closures_warning: Vec::new(),
        }
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_m / 1000.0
    }

    pub fn eta_minutes(&self) -> f64 {
        self.duration_s / 60.0
    }
}

/// Route computation seam.
///
/// Implementations must always return a usable route: when every external
/// backend fails, the deterministic grid fallback is the answer, never an
/// error.
#[async_trait]
pub trait RoutePlanner: Send + Sync {
    async fn best_route(&self, start: Point, end: Point) -> RouteSummary;

    /// Candidate routes from backends other than `exclude_provider`, used
    /// when the best route crosses a street closure. May be empty.
    async fn alternatives(&self, start: Point, end: Point, exclude_provider: &str) -> Vec<RouteSummary>;
}
