//! End-to-end pipeline scenarios over the offline routing stack.
//!
//! Everything here runs without network access: the routing stack is
//! forced offline, so every route is the deterministic grid fallback.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use siren_adapters::RoutingStack;
use siren_core::{
    AgentStatus, DispatchService, DispatchStatus, IncidentStatus, Intersection,
    IntersectionCatalog, IntersectionKind, NewIncident, RouteStatus, ServiceError, SirenConfig,
    Store, VehicleStatus,
};
use siren_proto::{Code, ForceKind, Geocoder, Point, RoutePlanner};

fn offline_config() -> SirenConfig {
    let mut config = SirenConfig::default();
    config.routing.offline = true;
    config
}

fn service_with(store: Arc<Store>, catalog: IntersectionCatalog) -> DispatchService {
    let config = offline_config();
    let router: Arc<dyn RoutePlanner> = Arc::new(RoutingStack::new(config.routing.clone()));
    DispatchService::new(&config, catalog, store, router, None, None).unwrap()
}

fn microcentro_catalog() -> IntersectionCatalog {
    IntersectionCatalog::new(vec![
        Intersection {
            id: "9julio_corrientes".to_string(),
            name: "9 de Julio y Corrientes".to_string(),
            lat: -34.6037,
            lon: -58.3816,
            kind: IntersectionKind::Major,
        },
        Intersection {
            id: "9julio_rivadavia".to_string(),
            name: "9 de Julio y Rivadavia".to_string(),
            lat: -34.6092,
            lon: -58.3816,
            kind: IntersectionKind::Major,
        },
        Intersection {
            id: "florida_corrientes".to_string(),
            name: "Florida y Corrientes".to_string(),
            lat: -34.6020,
            lon: -58.3748,
            kind: IntersectionKind::Secondary,
        },
    ])
    .unwrap()
}

#[tokio::test]
async fn test_armed_robbery_assigns_nearest_patrol() {
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
    let ambulance = store
        .add_vehicle(ForceKind::Medical, "ambulance", Some(Point::new(-34.70, -58.50)))
        .unwrap();

    let service = service_with(Arc::clone(&store), IntersectionCatalog::empty());
    let now = Utc::now();
    let incident = service
        .ingress(
            NewIncident {
                description: "Robo violento con arma blanca en el microcentro".to_string(),
                address: None,
                lat: Some(-34.6083),
                lon: Some(-58.3712),
            },
            now,
        )
        .await
        .unwrap();

    let report = service.plan_incident(incident.id, now).await.unwrap();
    assert_eq!(report.triage.kind, ForceKind::Police);

    let incident = store.incident(incident.id).unwrap();
    assert_eq!(incident.status, IncidentStatus::Assigned);
    assert_eq!(incident.assigned_force, Some(ForceKind::Police));
    let chosen = incident.assigned_vehicle.unwrap();
    assert!(chosen == near || chosen == second, "far patrol was chosen");

    assert_eq!(store.vehicle(chosen).unwrap().status, VehicleStatus::EnRoute);
    assert_eq!(store.vehicle(far).unwrap().status, VehicleStatus::Available);
    assert_eq!(store.vehicle(ambulance).unwrap().status, VehicleStatus::Available);

    // Only the police force was required.
    let dispatches = store.dispatches_for_incident(incident.id).unwrap();
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].force, ForceKind::Police);

    let routes = store
        .routes_for_incident(incident.id, Some(RouteStatus::Active))
        .unwrap();
    assert!(routes.iter().any(|r| r.resource_id == format!("vehicle_{chosen}")));
    // Offline mode means every geometry is the grid fallback.
    assert!(routes.iter().all(|r| r.geometry.coords().len() >= 2));
    // Police is the lead force, so even on the very first plan its scores
    // are plain distances, not duration-based.
    for route in &routes {
        assert!(
            (route.priority_score - route.distance_km).abs() < 1e-9,
            "route {} scored {} for {} km",
            route.resource_id,
            route.priority_score,
            route.distance_km
        );
    }
    assert!(incident.resolution_notes.contains("routing used fallback geometry"));
}

#[tokio::test]
async fn test_building_fire_dispatches_fire_and_medical() {
    let store = Arc::new(Store::new());
    store
        .add_vehicle(ForceKind::Fire, "fire_engine", Some(Point::new(-34.6178, -58.3730)))
        .unwrap();
    store
        .add_vehicle(ForceKind::Medical, "ambulance", Some(Point::new(-34.6092, -58.3850)))
        .unwrap();

    let service = service_with(Arc::clone(&store), IntersectionCatalog::empty());
    let now = Utc::now();
    let incident = service
        .ingress(
            NewIncident {
                description: "Incendio en edificio con personas atrapadas".to_string(),
                address: None,
                lat: Some(-34.6083),
                lon: Some(-58.3712),
            },
            now,
        )
        .await
        .unwrap();

    service.plan_incident(incident.id, now).await.unwrap();

    let incident = store.incident(incident.id).unwrap();
    assert_eq!(incident.code, Some(Code::Red));
    assert!(incident.green_wave);
    assert_eq!(incident.priority, 10);

    let forces: Vec<ForceKind> = store
        .dispatches_for_incident(incident.id)
        .unwrap()
        .iter()
        .map(|d| d.force)
        .collect();
    assert!(forces.contains(&ForceKind::Fire));
    assert!(forces.contains(&ForceKind::Medical));
    // Fire leads the summary precedence.
    assert_eq!(incident.assigned_force, Some(ForceKind::Fire));
}

#[tokio::test]
async fn test_first_plan_scores_primary_force_by_distance() {
    let store = Arc::new(Store::new());
    let fire_engine = store
        .add_vehicle(ForceKind::Fire, "fire_engine", Some(Point::new(-34.6178, -58.3730)))
        .unwrap();
    let ambulance = store
        .add_vehicle(ForceKind::Medical, "ambulance", Some(Point::new(-34.6092, -58.3850)))
        .unwrap();

    let service = service_with(Arc::clone(&store), IntersectionCatalog::empty());
    let now = Utc::now();
    let incident = service
        .ingress(
            NewIncident {
                description: "Incendio en edificio con personas atrapadas".to_string(),
                address: None,
                lat: Some(-34.6083),
                lon: Some(-58.3712),
            },
            now,
        )
        .await
        .unwrap();

    // Brand-new incident: assigned_force is empty until this first plan
    // commits, yet the lead force must already rank closest-first.
    assert!(store.incident(incident.id).unwrap().assigned_force.is_none());
    service.plan_incident(incident.id, now).await.unwrap();

    let incident = store.incident(incident.id).unwrap();
    assert_eq!(incident.assigned_force, Some(ForceKind::Fire));

    let routes = store
        .routes_for_incident(incident.id, Some(RouteStatus::Active))
        .unwrap();
    let fire_route = routes
        .iter()
        .find(|r| r.resource_id == format!("vehicle_{fire_engine}"))
        .unwrap();
    let medical_route = routes
        .iter()
        .find(|r| r.resource_id == format!("vehicle_{ambulance}"))
        .unwrap();

    // Lead force: plain distance on the very first plan.
    assert!(
        (fire_route.priority_score - fire_route.distance_km).abs() < 1e-9,
        "fire route scored {} for {} km",
        fire_route.priority_score,
        fire_route.distance_km
    );
    // Secondary force keeps the duration-based score.
    assert!((medical_route.priority_score - medical_route.distance_km).abs() > 1e-6);
}

#[tokio::test]
async fn test_replanning_rewrites_routes_without_duplicates() {
    let store = Arc::new(Store::new());
    store
        .add_vehicle(ForceKind::Police, "patrol", Some(Point::new(-34.6037, -58.3816)))
        .unwrap();
    store
        .add_vehicle(ForceKind::Police, "patrol", Some(Point::new(-34.6050, -58.3790)))
        .unwrap();

    let service = service_with(Arc::clone(&store), IntersectionCatalog::empty());
    let now = Utc::now();
    let incident = service
        .ingress(
            NewIncident {
                description: "Robo en la estación".to_string(),
                address: None,
                lat: Some(-34.6083),
                lon: Some(-58.3712),
            },
            now,
        )
        .await
        .unwrap();

    let first = service.plan_incident(incident.id, now).await.unwrap();
    let second = service
        .plan_incident(incident.id, now + Duration::minutes(1))
        .await
        .unwrap();
    assert!(!second.summary.frozen);

    // Dispatch uniqueness per (incident, force) held across the re-plan.
    let dispatches = store.dispatches_for_incident(incident.id).unwrap();
    assert_eq!(dispatches.len(), 1);

    // The active route set equals the second planner output exactly.
    let active = store
        .routes_for_incident(incident.id, Some(RouteStatus::Active))
        .unwrap();
    assert_eq!(active.len(), second.summary.routes.len());
    for route in &active {
        assert!(route.calculated_at > first.summary.routes[0].calculated_at);
    }
}

#[tokio::test]
async fn test_green_wave_windows_and_idempotent_activation() {
    let store = Arc::new(Store::new());
    store
        .add_vehicle(ForceKind::Police, "patrol", Some(Point::new(-34.6037, -58.3816)))
        .unwrap();

    let service = service_with(Arc::clone(&store), microcentro_catalog());
    let now = Utc::now();
    let incident = service
        .ingress(
            NewIncident {
                // Red-code armed incident.
                description: "Tiroteo con rehenes en el microcentro".to_string(),
                address: None,
                lat: Some(-34.6100),
                lon: Some(-58.3770),
            },
            now,
        )
        .await
        .unwrap();

    let report = service.plan_incident(incident.id, now).await.unwrap();
    assert_eq!(report.summary.incident.code, Some(Code::Red));
    assert!(!report.green_waves.is_empty());
    let windows = &report.green_waves[0].windows;
    assert!(!windows.is_empty());
    for window in windows {
        let hold = (window.green_end - window.arrival).num_seconds();
        assert!(hold == 45 || hold == 30);
    }

    // Explicit re-activation does not duplicate the wave.
    service
        .activate_green_wave(incident.id, now + Duration::seconds(10))
        .await
        .unwrap();
    let active = service
        .active_green_waves(now + Duration::seconds(11))
        .unwrap();
    assert_eq!(active.len(), 1);

    let status = service
        .intersection_status("9julio_corrientes", now + Duration::seconds(1))
        .unwrap();
    assert!(status.has_emergency);
}

#[tokio::test]
async fn test_resolution_releases_and_freezes() {
    let store = Arc::new(Store::new());
    let vehicle = store
        .add_vehicle(ForceKind::Police, "patrol", Some(Point::new(-34.6037, -58.3816)))
        .unwrap();
    let agent = store
        .add_agent(ForceKind::Police, "Juan Perez", "officer", Some(Point::new(-34.6040, -58.3810)))
        .unwrap();

    let service = service_with(Arc::clone(&store), IntersectionCatalog::empty());
    let now = Utc::now();
    let incident = service
        .ingress(
            NewIncident {
                description: "Robo con arma en comercio".to_string(),
                address: None,
                lat: Some(-34.6083),
                lon: Some(-58.3712),
            },
            now,
        )
        .await
        .unwrap();
    service.plan_incident(incident.id, now).await.unwrap();

    assert_eq!(store.vehicle(vehicle).unwrap().status, VehicleStatus::EnRoute);
    assert_eq!(store.agent(agent).unwrap().status, AgentStatus::EnRoute);

    let resolved_at = now + Duration::minutes(5);
    let summary = service.resolve(incident.id, "suspect detained", resolved_at).await.unwrap();
    assert!(summary.dispatches_finished >= 1);

    let incident_row = store.incident(incident.id).unwrap();
    assert_eq!(incident_row.status, IncidentStatus::Resolved);
    assert_eq!(incident_row.resolved_at, Some(resolved_at));

    assert_eq!(store.vehicle(vehicle).unwrap().status, VehicleStatus::Available);
    assert_eq!(store.agent(agent).unwrap().status, AgentStatus::Available);
    for dispatch in store.dispatches_for_incident(incident.id).unwrap() {
        assert_eq!(dispatch.status, DispatchStatus::Finished);
    }
    for route in store.routes_for_incident(incident.id, None).unwrap() {
        assert_eq!(route.status, RouteStatus::Completed);
        assert_eq!(route.completed_at, Some(resolved_at));
    }

    // Frozen snapshots: progress pinned to 1, nothing left to drive.
    let snapshots = service
        .incident_tracking(incident.id, resolved_at + Duration::minutes(1))
        .unwrap();
    assert!(!snapshots.is_empty());
    for snap in snapshots {
        assert_eq!(snap.progress, 1.0);
        assert_eq!(snap.eta_remaining_min, 0.0);
    }

    // A later plan returns the frozen state instead of recomputing.
    let frozen = service
        .plan_incident(incident.id, resolved_at + Duration::minutes(2))
        .await
        .unwrap();
    assert!(frozen.summary.frozen);
    assert!(frozen
        .summary
        .routes
        .iter()
        .all(|r| r.status == RouteStatus::Completed));

    // Resolving twice is a conflict.
    let err = service
        .resolve(incident.id, "", resolved_at + Duration::minutes(3))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn test_dispatch_without_resources_stays_pending() {
    let store = Arc::new(Store::new());
    let service = service_with(Arc::clone(&store), IntersectionCatalog::empty());
    let now = Utc::now();
    let incident = service
        .ingress(
            NewIncident {
                description: "Robo en la zona sur".to_string(),
                address: None,
                lat: Some(-34.6500),
                lon: Some(-58.4000),
            },
            now,
        )
        .await
        .unwrap();

    service.plan_incident(incident.id, now).await.unwrap();

    // The dispatch row exists without a resource; the incident does not
    // count as assigned yet.
    let dispatches = store.dispatches_for_incident(incident.id).unwrap();
    assert_eq!(dispatches.len(), 1);
    assert!(dispatches[0].vehicle.is_none());
    assert!(dispatches[0].agent.is_none());
    assert_eq!(
        store.incident(incident.id).unwrap().status,
        IncidentStatus::Pending
    );
}

#[tokio::test]
async fn test_ingress_validation() {
    let store = Arc::new(Store::new());
    let service = service_with(Arc::clone(&store), IntersectionCatalog::empty());
    let now = Utc::now();

    let err = service
        .ingress(
            NewIncident {
                description: "   ".to_string(),
                address: None,
                lat: Some(-34.6),
                lon: Some(-58.4),
            },
            now,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let err = service
        .ingress(
            NewIncident {
                description: "incendio".to_string(),
                address: None,
                lat: None,
                lon: None,
            },
            now,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::GeocodingFailed(_)));
}

struct FixedGeocoder(Point);

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn resolve(&self, _address: &str) -> Option<Point> {
        Some(self.0)
    }
}

#[tokio::test]
async fn test_ingress_geocodes_address() {
    let store = Arc::new(Store::new());
    let config = offline_config();
    let router: Arc<dyn RoutePlanner> = Arc::new(RoutingStack::new(config.routing.clone()));
    let service = DispatchService::new(
        &config,
        IntersectionCatalog::empty(),
        Arc::clone(&store),
        router,
        None,
        Some(Arc::new(FixedGeocoder(Point::new(-34.6037, -58.3816)))),
    )
    .unwrap();

    let incident = service
        .ingress(
            NewIncident {
                description: "incendio en local".to_string(),
                address: Some("Av. Corrientes 1234".to_string()),
                lat: None,
                lon: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(incident.location, Some(Point::new(-34.6037, -58.3816)));
}

#[tokio::test]
async fn test_offline_routes_use_grid_fallback() {
    let store = Arc::new(Store::new());
    store
        .add_vehicle(ForceKind::Police, "patrol", Some(Point::new(-34.6037, -58.3816)))
        .unwrap();
    let service = service_with(Arc::clone(&store), IntersectionCatalog::empty());
    let now = Utc::now();
    let incident = service
        .ingress(
            NewIncident {
                description: "Robo a mano armada".to_string(),
                address: None,
                lat: Some(-34.70),
                lon: Some(-58.50),
            },
            now,
        )
        .await
        .unwrap();

    service.plan_incident(incident.id, now).await.unwrap();
    let routes = service.routes(incident.id).unwrap();
    assert!(!routes.is_empty());
    // Grid fallback geometry carries the full zig-zag, never a straight
    // two-point line.
    assert!(routes[0].geometry.coords().len() >= 6);
}
