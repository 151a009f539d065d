//! Route adjustment against street closures and live traffic.
//!
//! Both checks degrade gracefully: when closure or traffic data cannot be
//! read the route passes through unchanged, logged only.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use siren_proto::{
    Geometry, Point, RoutePlanner, RouteSummary, detour_grid_path, haversine_m, path_to_line,
    sample_points,
};

use crate::model::{CountKind, StreetClosure, TrafficCount};
use crate::store::Store;

/// Proximity at which a route vertex counts as touching a closure.
const CLOSURE_RADIUS_M: f64 = 50.0;
/// Distance between congestion sample points along a route.
const SAMPLE_INTERVAL_M: f64 = 500.0;
/// Search radius around each sample for traffic counts.
const COUNT_RADIUS_M: f64 = 200.0;
/// Detour paths assume a conservative urban speed.
const DETOUR_SPEED_KMH: f64 = 20.0;

pub struct RouteAdjuster {
    store: Arc<Store>,
}

impl RouteAdjuster {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Full adjustment pass: closure avoidance, then congestion scaling.
    pub async fn apply(
        &self,
        route: RouteSummary,
        start: Point,
        end: Point,
        router: &dyn RoutePlanner,
        now: DateTime<Utc>,
    ) -> RouteSummary {
        let route = self.avoid_closures(route, start, end, router, now).await;
        self.apply_traffic(route, now)
    }

    /// Replaces a route that crosses a currently active closure with the
    /// first closure-free alternative (other providers, then a widened
    /// detour grid). When nothing avoids the closures the original route
    /// comes back annotated with `intersects_closures` and the closure
    /// names.
    pub async fn avoid_closures(
        &self,
        route: RouteSummary,
        start: Point,
        end: Point,
        router: &dyn RoutePlanner,
        now: DateTime<Utc>,
    ) -> RouteSummary {
        let closures = match self.store.active_closures(now) {
            Ok(closures) => closures,
            Err(e) => {
                warn!("closure data unavailable, skipping adjustment: {e}");
                return route;
            }
        };
        if closures.is_empty() {
            return route;
        }

        let blocking: Vec<&StreetClosure> = closures
            .iter()
            .filter(|c| route_intersects_closure(&route.geometry, c))
            .collect();
        if blocking.is_empty() {
            return route;
        }
        warn!(
            provider = %route.provider,
            closures = blocking.len(),
            "route crosses active street closures, searching alternatives"
        );

        let mut candidates = router.alternatives(start, end, &route.provider).await;
        candidates.push(detour_route(start, end));

        for candidate in candidates {
            let blocked = blocking
                .iter()
                .any(|c| route_intersects_closure(&candidate.geometry, c));
            if !blocked {
                info!(
                    provider = %candidate.provider,
                    avoided = blocking.len(),
                    "closure-free alternative found"
                );
                return candidate;
            }
        }

        let mut route = route;
        route.intersects_closures = true;
        route.closures_warning = blocking.iter().map(|c| c.name.clone()).collect();
        warn!("no closure-free alternative, keeping original route with warning");
        route
    }

    /// Scales the route duration by the congestion factor when traffic
    /// counts indicate a slowdown. The unscaled duration is preserved.
    pub fn apply_traffic(&self, mut route: RouteSummary, now: DateTime<Utc>) -> RouteSummary {
        let factor = self.congestion_factor(&route.geometry, now);
        if factor > 1.0 {
            info!(factor, "adjusting duration for congestion");
            route.original_duration_s = Some(route.duration_s);
            route.duration_s *= factor;
            route.congestion_factor = Some(factor);
            route.traffic_adjusted = true;
        }
        route
    }

    /// Worst congestion multiplier along the route: samples every 500 m,
    /// weights nearby counts by inverse distance, and takes the max across
    /// samples. 1.0 means free flow or no data.
    pub fn congestion_factor(&self, geometry: &Geometry, now: DateTime<Utc>) -> f64 {
        if !geometry.is_line() || geometry.coords().len() < 2 {
            return 1.0;
        }

        let mut worst: f64 = 1.0;
        for sample in sample_points(geometry.coords(), SAMPLE_INTERVAL_M) {
            let rows = match self.store.traffic_counts_near(
                sample,
                COUNT_RADIUS_M,
                Duration::hours(2),
                now,
            ) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("traffic data unavailable, skipping congestion factor: {e}");
                    return 1.0;
                }
            };

            let mut weighted = 0.0;
            let mut total_weight = 0.0;
            for (count, distance_m) in rows {
                let factor = count_congestion_factor(&count);
                if factor > 1.0 {
                    let weight = (1.0 / (1.0 + distance_m / 100.0)).max(0.1);
                    weighted += factor * weight;
                    total_weight += weight;
                }
            }
            if total_weight > 0.0 {
                worst = worst.max(weighted / total_weight);
            }
        }

        if worst > 1.0 {
            debug!(factor = worst, "congestion detected along route");
        }
        worst
    }
}

/// A route touches a closure when any of its vertices sits within 50 m of
/// the closure point, or, for closure line geometries, within 50 m of any
/// closure vertex.
fn route_intersects_closure(geometry: &Geometry, closure: &StreetClosure) -> bool {
    if !geometry.is_line() {
        return false;
    }
    let route_coords = geometry.coords();

    if let Some(closure_geom) = &closure.geometry {
        for route_pair in route_coords {
            let route_point = Point::from_lon_lat(*route_pair);
            for closure_pair in closure_geom.coords() {
                let closure_point = Point::from_lon_lat(*closure_pair);
                if haversine_m(route_point, closure_point) <= CLOSURE_RADIUS_M {
                    return true;
                }
            }
        }
        return false;
    }

    let Some(center) = closure.point_location else {
        return false;
    };
    route_coords
        .iter()
        .any(|pair| haversine_m(Point::from_lon_lat(*pair), center) <= CLOSURE_RADIUS_M)
}

/// Widened grid path candidate used when every provider route is blocked.
fn detour_route(start: Point, end: Point) -> RouteSummary {
    let path = detour_grid_path(start, end);
    let distance_m = haversine_m(start, end);
    let duration_s = (distance_m / 1000.0) / DETOUR_SPEED_KMH * 3600.0;
    RouteSummary::new("detour", path_to_line(&path), distance_m, duration_s)
}

fn count_congestion_factor(count: &TrafficCount) -> f64 {
    match count.count_type {
        CountKind::Vehicle => {
            if count.unit == "vehicles" && count.count_value > 1000.0 {
                if count.count_value > 2000.0 {
                    1.8
                } else if count.count_value > 1500.0 {
                    1.5
                } else {
                    1.2
                }
            } else {
                1.0
            }
        }
        CountKind::Speed => {
            if count.unit == "km/h" || count.unit == "kph" {
                if count.count_value < 10.0 {
                    2.0
                } else if count.count_value < 20.0 {
                    1.6
                } else if count.count_value < 30.0 {
                    1.3
                } else if count.count_value < 40.0 {
                    1.1
                } else {
                    1.0
                }
            } else {
                1.0
            }
        }
        CountKind::Occupancy => {
            if count.unit == "percentage" || count.unit.contains('%') {
                if count.count_value > 90.0 {
                    2.0
                } else if count.count_value > 70.0 {
                    1.5
                } else if count.count_value > 50.0 {
                    1.2
                } else {
                    1.0
                }
            } else {
                1.0
            }
        }
    }
}
