//! Resource selection: ranks a force's vehicles and agents for an incident
//! by route-aware ETA.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use siren_proto::{ForceKind, Point, RoutePlanner, RouteSummary, haversine_m};

use crate::adjuster::RouteAdjuster;
use crate::config::RoutingConfig;
use crate::error::Result;
use crate::model::{AgentStatus, Incident, ResourceRef, VehicleStatus};
use crate::store::Store;

/// Score multiplier for candidates of the dispatch's target force.
const TARGET_FORCE_MULTIPLIER: f64 = 4.0;
/// Extra penalty once a candidate sits more than 20 km out.
const FAR_DISTANCE_KM: f64 = 20.0;

/// One ranked vehicle or agent with its computed route.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub resource: ResourceRef,
    /// Display label (`patrol - police`, `Juan Perez - police`).
    pub label: String,
    pub location: Point,
    pub route: RouteSummary,
    pub distance_km: f64,
    pub eta_minutes: f64,
    /// Lower is better; `(priority_score, distance_km)` is the persisted
    /// ordering key.
    pub score: f64,
    /// Candidate belongs to the incident's assigned force.
    pub is_primary: bool,
    /// Only available resources may actually be dispatched.
    pub available: bool,
}

/// Ranked vehicles and agents for one (incident, force) pair.
#[derive(Debug, Clone, Default)]
pub struct RankedSelection {
    pub vehicles: Vec<RankedCandidate>,
    pub agents: Vec<RankedCandidate>,
}

impl RankedSelection {
    /// First dispatchable vehicle, closest-ranked first.
    pub fn top_available_vehicle(&self) -> Option<&RankedCandidate> {
        self.vehicles.iter().find(|c| c.available)
    }

    pub fn top_available_agent(&self) -> Option<&RankedCandidate> {
        self.agents.iter().find(|c| c.available)
    }
}

pub struct ResourceSelector {
    store: Arc<Store>,
    vehicle_cap: usize,
    agent_cap: usize,
}

impl ResourceSelector {
    pub fn new(store: Arc<Store>, config: &RoutingConfig) -> Self {
        Self {
            store,
            vehicle_cap: config.vehicle_candidates,
            agent_cap: config.agent_candidates,
        }
    }

    /// Ranks the force's fleet for the incident.
    ///
    /// Candidates are routed through the planner and adjusted for closures
    /// and congestion, then scored `duration x type_weight x distance_penalty`.
    /// `primary_force` is the incident's lead force; the planner resolves
    /// it before the first dispatch is committed, so the closest-first
    /// distance override applies on the very first plan too. Within that
    /// force the score is the plain distance; other forces divide by the
    /// target-force multiplier. Police queries also surface en-route and
    /// busy units to reflect fleet pressure (they rank but cannot be
    /// dispatched).
    pub async fn rank(
        &self,
        incident: &Incident,
        force: ForceKind,
        primary_force: Option<ForceKind>,
        router: &dyn RoutePlanner,
        adjuster: &RouteAdjuster,
        now: DateTime<Utc>,
    ) -> Result<RankedSelection> {
        let Some(target) = incident.location else {
            return Ok(RankedSelection::default());
        };
        let is_primary = primary_force == Some(force);

        let vehicle_statuses: &[VehicleStatus] = if force == ForceKind::Police {
            &[VehicleStatus::Available, VehicleStatus::EnRoute, VehicleStatus::Busy]
        } else {
            &[VehicleStatus::Available]
        };

        let mut vehicles: Vec<_> = self
            .store
            .vehicles_by_force(force, vehicle_statuses)?
            .into_iter()
            .filter(|v| v.current_location.is_some())
            .collect();
        // Nearest-first pre-cut keeps the provider call count bounded.
        vehicles.sort_by(|a, b| {
            let da = haversine_m(a.current_location.unwrap_or(target), target);
            let db = haversine_m(b.current_location.unwrap_or(target), target);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
        vehicles.truncate(self.vehicle_cap);

        let mut ranked_vehicles = Vec::with_capacity(vehicles.len());
        for vehicle in vehicles {
            let location = match vehicle.current_location {
                Some(p) => p,
                None => continue,
            };
            let route = router.best_route(location, target).await;
            let route = adjuster.apply(route, location, target, router, now).await;
            let distance_km = route.distance_km();
            let score = candidate_score(
                route.duration_s,
                type_weight(&vehicle.kind),
                distance_km,
                is_primary,
            );
            ranked_vehicles.push(RankedCandidate {
                resource: ResourceRef::Vehicle(vehicle.id),
                label: format!("{} - {}", vehicle.kind, vehicle.force.label()),
                location,
                eta_minutes: route.eta_minutes(),
                route,
                distance_km,
                score,
                is_primary,
                available: vehicle.status == VehicleStatus::Available,
            });
        }

        let mut agents: Vec<_> = self
            .store
            .agents_by_force(force, &[AgentStatus::Available])?
            .into_iter()
            .filter(|a| a.current_location.is_some())
            .collect();
        agents.sort_by(|a, b| {
            let da = haversine_m(a.current_location.unwrap_or(target), target);
            let db = haversine_m(b.current_location.unwrap_or(target), target);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
        agents.truncate(self.agent_cap);

        let mut ranked_agents = Vec::with_capacity(agents.len());
        for agent in agents {
            let location = match agent.current_location {
                Some(p) => p,
                None => continue,
            };
            let route = router.best_route(location, target).await;
            let route = adjuster.apply(route, location, target, router, now).await;
            let distance_km = route.distance_km();
            let score = candidate_score(route.duration_s, 1.0, distance_km, is_primary);
            ranked_agents.push(RankedCandidate {
                resource: ResourceRef::Agent(agent.id),
                label: format!("{} - {}", agent.name, agent.force.label()),
                location,
                eta_minutes: route.eta_minutes(),
                route,
                distance_km,
                score,
                is_primary,
                available: agent.status == AgentStatus::Available,
            });
        }

        sort_ranked(&mut ranked_vehicles);
        sort_ranked(&mut ranked_agents);
        ranked_vehicles.truncate(self.vehicle_cap);
        ranked_agents.truncate(self.agent_cap);

        debug!(
            force = force.label(),
            vehicles = ranked_vehicles.len(),
            agents = ranked_agents.len(),
            "candidates ranked"
        );
        Ok(RankedSelection {
            vehicles: ranked_vehicles,
            agents: ranked_agents,
        })
    }
}

fn sort_ranked(candidates: &mut [RankedCandidate]) {
    candidates.sort_by(|a, b| {
        (!a.is_primary, a.score)
            .partial_cmp(&(!b.is_primary, b.score))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn candidate_score(duration_s: f64, type_weight: f64, distance_km: f64, is_primary: bool) -> f64 {
    if is_primary {
        // Closest-first within the lead force.
        return distance_km;
    }
    let distance_penalty = if distance_km > FAR_DISTANCE_KM { 1.5 } else { 1.0 };
    duration_s * type_weight * distance_penalty / TARGET_FORCE_MULTIPLIER.max(0.1)
}

fn type_weight(kind: &str) -> f64 {
    match kind {
        "ambulance" => 0.8,
        "fire_engine" => 0.9,
        "patrol" => 1.0,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use siren_proto::{Geometry, path_to_line};

    struct StraightLinePlanner;

    #[async_trait]
    impl RoutePlanner for StraightLinePlanner {
        async fn best_route(&self, start: Point, end: Point) -> RouteSummary {
            let distance_m = haversine_m(start, end);
            // 30 km/h urban speed.
            let duration_s = distance_m / 1000.0 / 30.0 * 3600.0;
            RouteSummary::new(
                "stub",
                Geometry::line(vec![start.to_lon_lat(), end.to_lon_lat()]),
                distance_m,
                duration_s,
            )
        }

        async fn alternatives(&self, start: Point, end: Point, _exclude: &str) -> Vec<RouteSummary> {
            vec![RouteSummary::new(
                "detour",
                path_to_line(&siren_proto::detour_grid_path(start, end)),
                haversine_m(start, end),
                600.0,
            )]
        }
    }

    // Fresh incidents carry no assigned force; the planner resolves the
    // lead force and hands it to rank() separately.
    fn incident_at(location: Point) -> Incident {
        Incident {
            id: crate::model::IncidentId(99),
            description: "robo".to_string(),
            address: None,
            location: Some(location),
            code: None,
            priority: 0,
            status: crate::model::IncidentStatus::Pending,
            green_wave: false,
            assigned_force: None,
            assigned_vehicle: None,
            reported_at: Utc::now(),
            resolved_at: None,
            resolution_notes: String::new(),
            ai_response: String::new(),
        }
    }

    #[tokio::test]
    async fn test_primary_force_ranks_closest_first() {
        let store = Arc::new(Store::new());
        let near = store
            .add_vehicle(ForceKind::Police, "patrol", Some(Point::new(-34.6037, -58.3816)))
            .unwrap();
        let second = store
            .add_vehicle(ForceKind::Police, "patrol", Some(Point::new(-34.6050, -58.3790)))
            .unwrap();
        let far = store
            .add_vehicle(ForceKind::Police, "patrol", Some(Point::new(-34.70, -58.50)))
            .unwrap();

        let selector = ResourceSelector::new(Arc::clone(&store), &RoutingConfig::default());
        let adjuster = RouteAdjuster::new(Arc::clone(&store));
        let incident = incident_at(Point::new(-34.6083, -58.3712));

        let ranked = selector
            .rank(
                &incident,
                ForceKind::Police,
                Some(ForceKind::Police),
                &StraightLinePlanner,
                &adjuster,
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(ranked.vehicles.len(), 3);
        let order: Vec<ResourceRef> = ranked.vehicles.iter().map(|c| c.resource).collect();
        assert!(order[0] == ResourceRef::Vehicle(second) || order[0] == ResourceRef::Vehicle(near));
        assert_eq!(order[2], ResourceRef::Vehicle(far));
        // Primary force scores are plain distances.
        for candidate in &ranked.vehicles {
            assert!((candidate.score - candidate.distance_km).abs() < 1e-9);
        }
        assert!(ranked.vehicles[0].score < ranked.vehicles[2].score);
    }

    #[tokio::test]
    async fn test_other_forces_not_considered() {
        let store = Arc::new(Store::new());
        store
            .add_vehicle(ForceKind::Medical, "ambulance", Some(Point::new(-34.70, -58.50)))
            .unwrap();
        let selector = ResourceSelector::new(Arc::clone(&store), &RoutingConfig::default());
        let adjuster = RouteAdjuster::new(Arc::clone(&store));
        let incident = incident_at(Point::new(-34.6083, -58.3712));

        let ranked = selector
            .rank(
                &incident,
                ForceKind::Police,
                Some(ForceKind::Police),
                &StraightLinePlanner,
                &adjuster,
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(ranked.vehicles.is_empty());
    }

    #[tokio::test]
    async fn test_police_pressure_units_rank_but_are_not_dispatchable() {
        let store = Arc::new(Store::new());
        let scene = Point::new(-34.6083, -58.3712);
        let engaged = store
            .add_vehicle(ForceKind::Police, "patrol", Some(Point::new(-34.6037, -58.3816)))
            .unwrap();
        store
            .add_vehicle(ForceKind::Police, "patrol", Some(Point::new(-34.6050, -58.3790)))
            .unwrap();

        // Tie the first patrol to another incident.
        let now = Utc::now();
        let other = store.create_incident("otro robo", None, Some(scene), now).unwrap();
        let commit = crate::store::PlanCommit {
            dispatch_vehicles: vec![(engaged, scene)],
            ..crate::store::PlanCommit::default()
        };
        store.commit_plan(other.id, commit, now).unwrap();

        let selector = ResourceSelector::new(Arc::clone(&store), &RoutingConfig::default());
        let adjuster = RouteAdjuster::new(Arc::clone(&store));
        let incident = incident_at(scene);
        let ranked = selector
            .rank(
                &incident,
                ForceKind::Police,
                Some(ForceKind::Police),
                &StraightLinePlanner,
                &adjuster,
                now,
            )
            .await
            .unwrap();

        assert_eq!(ranked.vehicles.len(), 2);
        let top = ranked.top_available_vehicle().unwrap();
        assert_ne!(top.resource, ResourceRef::Vehicle(engaged));
    }

    #[tokio::test]
    async fn test_agent_cap_respected() {
        let store = Arc::new(Store::new());
        for i in 0..6 {
            store
                .add_agent(
                    ForceKind::Police,
                    &format!("Agente {i}"),
                    "officer",
                    Some(Point::new(-34.60 - f64::from(i) * 0.001, -58.38)),
                )
                .unwrap();
        }
        let selector = ResourceSelector::new(Arc::clone(&store), &RoutingConfig::default());
        let adjuster = RouteAdjuster::new(Arc::clone(&store));
        let incident = incident_at(Point::new(-34.6083, -58.3712));

        let ranked = selector
            .rank(
                &incident,
                ForceKind::Police,
                Some(ForceKind::Police),
                &StraightLinePlanner,
                &adjuster,
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(ranked.agents.len(), 4);
    }

    #[tokio::test]
    async fn test_secondary_force_scores_by_eta_not_distance() {
        let store = Arc::new(Store::new());
        store
            .add_vehicle(ForceKind::Medical, "ambulance", Some(Point::new(-34.6092, -58.3850)))
            .unwrap();
        let selector = ResourceSelector::new(Arc::clone(&store), &RoutingConfig::default());
        let adjuster = RouteAdjuster::new(Arc::clone(&store));
        let incident = incident_at(Point::new(-34.6083, -58.3712));

        // Fire leads this incident; medical ranks as a secondary force.
        let ranked = selector
            .rank(
                &incident,
                ForceKind::Medical,
                Some(ForceKind::Fire),
                &StraightLinePlanner,
                &adjuster,
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(ranked.vehicles.len(), 1);
        let candidate = &ranked.vehicles[0];
        assert!(!candidate.is_primary);
        let expected =
            candidate.route.duration_s * 0.8 / TARGET_FORCE_MULTIPLIER;
        assert!((candidate.score - expected).abs() < 1e-9);
        assert!((candidate.score - candidate.distance_km).abs() > 1e-6);
    }

    #[test]
    fn test_score_shapes() {
        // Primary force: plain distance.
        assert_eq!(candidate_score(600.0, 1.0, 2.5, true), 2.5);
        // Secondary: ETA scaled by type weight and the force multiplier.
        let ambulance = candidate_score(600.0, 0.8, 2.5, false);
        let patrol = candidate_score(600.0, 1.0, 2.5, false);
        assert!(ambulance < patrol);
        // Far candidates pick up the 1.5x penalty.
        let far = candidate_score(600.0, 1.0, 25.0, false);
        assert_eq!(far, 600.0 * 1.5 / 4.0);
    }
}
