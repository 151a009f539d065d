//! Emergency parking search around an incident scene.
//!
//! Finds active spots with free spaces near the scene and scores a
//! drive-then-walk plan for each: total ETA in seconds plus a distance
//! penalty, lower is better.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use siren_proto::{Point, RoutePlanner, RouteSummary, haversine_m};

use crate::error::Result;
use crate::model::ParkingSpot;
use crate::store::Store;

/// Pedestrian pace used for the walk leg.
const WALKING_SPEED_KMH: f64 = 5.0;

/// A reachable spot with the walk leg precomputed.
#[derive(Debug, Clone, Serialize)]
pub struct ParkingOption {
    pub spot: ParkingSpot,
    pub distance_m: f64,
    pub walking_time_minutes: f64,
}

/// A full drive-and-walk plan for one spot.
#[derive(Debug, Clone, Serialize)]
pub struct ParkingPlan {
    pub option: ParkingOption,
    pub driving_route: RouteSummary,
    pub walking_time_seconds: f64,
    pub total_eta_seconds: f64,
    /// `total_eta_seconds + distance_m / 100`; lower is better.
    pub score: f64,
}

/// Every evaluated plan plus the recommendation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParkingPlanSet {
    pub options: Vec<ParkingPlan>,
    pub recommended: Option<ParkingPlan>,
}

pub struct EmergencyParking {
    store: Arc<Store>,
}

impl EmergencyParking {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Spots with at least `min_spaces` free within `max_distance_m` of the
    /// location, nearest first.
    pub fn find(
        &self,
        location: Point,
        max_distance_m: f64,
        min_spaces: u32,
    ) -> Result<Vec<ParkingOption>> {
        let options: Vec<ParkingOption> = self
            .store
            .parking_near(location, max_distance_m, min_spaces)?
            .into_iter()
            .map(|(spot, distance_m)| ParkingOption {
                spot,
                distance_m,
                walking_time_minutes: distance_m / 1000.0 / WALKING_SPEED_KMH * 60.0,
            })
            .collect();
        info!(
            found = options.len(),
            radius_m = max_distance_m,
            "emergency parking search"
        );
        Ok(options)
    }

    /// Evaluates a drive-to-spot plus walk-to-scene plan for every nearby
    /// spot and recommends the cheapest.
    pub async fn plan(
        &self,
        vehicle: Point,
        scene: Point,
        router: &dyn RoutePlanner,
        max_parking_distance_m: f64,
    ) -> Result<ParkingPlanSet> {
        let options = self.find(scene, max_parking_distance_m, 1)?;
        if options.is_empty() {
            return Ok(ParkingPlanSet::default());
        }

        let mut plans = Vec::with_capacity(options.len());
        for option in options {
            let driving_route = router.best_route(vehicle, option.spot.location).await;
            let walking_distance_m = haversine_m(option.spot.location, scene);
            let walking_time_seconds =
                walking_distance_m / 1000.0 / WALKING_SPEED_KMH * 3600.0;
            let total_eta_seconds = driving_route.duration_s + walking_time_seconds;
            let score = total_eta_seconds + option.distance_m / 100.0;
            plans.push(ParkingPlan {
                option,
                driving_route,
                walking_time_seconds,
                total_eta_seconds,
                score,
            });
        }
        plans.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));

        let recommended = plans.first().cloned();
        Ok(ParkingPlanSet {
            options: plans,
            recommended,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ParkingSeed;
    use async_trait::async_trait;
    use siren_proto::Geometry;

    struct StubPlanner;

    #[async_trait]
    impl RoutePlanner for StubPlanner {
        async fn best_route(&self, start: Point, end: Point) -> RouteSummary {
            let d = haversine_m(start, end);
            RouteSummary::new(
                "stub",
                Geometry::line(vec![start.to_lon_lat(), end.to_lon_lat()]),
                d,
                d / 1000.0 / 30.0 * 3600.0,
            )
        }

        async fn alternatives(&self, _: Point, _: Point, _: &str) -> Vec<RouteSummary> {
            Vec::new()
        }
    }

    fn seed(store: &Store, name: &str, location: Point, available: u32) {
        store
            .add_parking(ParkingSeed {
                name: name.to_string(),
                location,
                total_spaces: 50,
                available_spaces: available,
                spot_type: "street".to_string(),
                is_paid: false,
                max_duration_hours: Some(2),
            })
            .unwrap();
    }

    #[test]
    fn test_find_orders_nearest_first() {
        let store = Arc::new(Store::new());
        seed(&store, "centro", Point::new(-34.6037, -58.3816), 25);
        seed(&store, "tribunales", Point::new(-34.6018, -58.3851), 5);
        let parking = EmergencyParking::new(Arc::clone(&store));

        let options = parking.find(Point::new(-34.6030, -58.3820), 1000.0, 1).unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].spot.name, "centro");
        assert!(options[0].walking_time_minutes > 0.0);
    }

    #[test]
    fn test_full_spots_excluded() {
        let store = Arc::new(Store::new());
        seed(&store, "lleno", Point::new(-34.6037, -58.3816), 0);
        let parking = EmergencyParking::new(Arc::clone(&store));
        let options = parking.find(Point::new(-34.6030, -58.3820), 1000.0, 1).unwrap();
        assert!(options.is_empty());
    }

    #[tokio::test]
    async fn test_plan_recommends_lowest_score() {
        let store = Arc::new(Store::new());
        let scene = Point::new(-34.6030, -58.3820);
        seed(&store, "cerca", Point::new(-34.6032, -58.3821), 10);
        seed(&store, "lejos", Point::new(-34.6018, -58.3851), 10);
        let parking = EmergencyParking::new(Arc::clone(&store));

        let set = parking
            .plan(Point::new(-34.6100, -58.3770), scene, &StubPlanner, 1000.0)
            .await
            .unwrap();
        assert_eq!(set.options.len(), 2);
        let best = set.recommended.unwrap();
        assert_eq!(best.option.spot.name, "cerca");
        assert!(best.score <= set.options[1].score);
    }

    #[tokio::test]
    async fn test_plan_with_no_spots_is_empty() {
        let store = Arc::new(Store::new());
        let parking = EmergencyParking::new(Arc::clone(&store));
        let set = parking
            .plan(
                Point::new(-34.6100, -58.3770),
                Point::new(-34.6030, -58.3820),
                &StubPlanner,
                300.0,
            )
            .await
            .unwrap();
        assert!(set.options.is_empty());
        assert!(set.recommended.is_none());
    }
}
