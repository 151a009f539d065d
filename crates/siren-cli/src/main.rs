//! Operator command line for the Siren dispatch backbone.
//!
//! The store is process-local, so `run` drives the whole pipeline in one
//! invocation over a seeded demo fleet: ingress, triage, multi-force plan,
//! tracking snapshots and optional resolution. `triage` and `route`
//! exercise single stages.
//!
//! Exit codes: 0 success, 2 configuration error, 3 ingress validation
//! error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use siren_adapters::{NominatimGeocoder, OllamaTriageProvider, RoutingStack};
use siren_core::{
    DispatchService, IntersectionCatalog, NewIncident, ServiceError, SirenConfig, Store,
};
use siren_proto::{ForceKind, Point, RoutePlanner};

const EXIT_CONFIG: u8 = 2;
const EXIT_VALIDATION: u8 = 3;

#[derive(Parser)]
#[command(name = "siren", about = "Emergency dispatch and routing backbone", version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a description without dispatching anything.
    Triage {
        #[arg(long)]
        description: String,
    },
    /// Compute the best route between two points.
    Route {
        #[arg(long)]
        from_lat: f64,
        #[arg(long)]
        from_lon: f64,
        #[arg(long)]
        to_lat: f64,
        #[arg(long)]
        to_lon: f64,
    },
    /// Run the full pipeline for one incident over a seeded demo fleet.
    Run {
        #[arg(long)]
        description: String,
        #[arg(long)]
        lat: Option<f64>,
        #[arg(long)]
        lon: Option<f64>,
        #[arg(long)]
        address: Option<String>,
        /// Resolve the incident at the end and show the frozen snapshots.
        #[arg(long)]
        resolve: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match SirenConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let catalog = match &config.greenwave.catalog_path {
        Some(path) => match IntersectionCatalog::load(Path::new(path)) {
            Ok(catalog) => catalog,
            Err(e) => {
                error!("configuration error: {e}");
                return ExitCode::from(EXIT_CONFIG);
            }
        },
        None => IntersectionCatalog::empty(),
    };

    let store = Arc::new(Store::new());
    let router: Arc<dyn RoutePlanner> = Arc::new(RoutingStack::new(config.routing.clone()));
    let triage_provider = OllamaTriageProvider::from_config(&config.triage)
        .map(|p| Arc::new(p) as Arc<dyn siren_proto::TriageProvider>);
    let geocoder = Arc::new(NominatimGeocoder::new(&config.geocoder))
        as Arc<dyn siren_proto::Geocoder>;

    let service = match DispatchService::new(
        &config,
        catalog,
        Arc::clone(&store),
        Arc::clone(&router),
        triage_provider,
        Some(geocoder),
    ) {
        Ok(service) => service,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let result = match cli.command {
        Command::Triage { description } => triage_command(&config, &description),
        Command::Route { from_lat, from_lon, to_lat, to_lon } => {
            route_command(router.as_ref(), from_lat, from_lon, to_lat, to_lon).await
        }
        Command::Run { description, lat, lon, address, resolve } => {
            run_command(&service, description, lat, lon, address, resolve).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            match e {
                ServiceError::Validation(_) | ServiceError::GeocodingFailed(_) => {
                    ExitCode::from(EXIT_VALIDATION)
                }
                ServiceError::MisconfiguredProvider(_) => ExitCode::from(EXIT_CONFIG),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn triage_command(config: &SirenConfig, description: &str) -> Result<(), ServiceError> {
    // Rules layer only; the cloud provider is exercised through `run`.
    let rules_config = siren_core::TriageConfig {
        provider: siren_core::TriageBackend::Rules,
        ..config.triage.clone()
    };
    let engine = siren_core::TriageEngine::new(&rules_config, None)?;
    let outcome = engine.classify_rules(description);
    print_json(&outcome);
    Ok(())
}

async fn route_command(
    router: &dyn RoutePlanner,
    from_lat: f64,
    from_lon: f64,
    to_lat: f64,
    to_lon: f64,
) -> Result<(), ServiceError> {
    let route = router
        .best_route(Point::new(from_lat, from_lon), Point::new(to_lat, to_lon))
        .await;
    print_json(&route);
    Ok(())
}

async fn run_command(
    service: &DispatchService,
    description: String,
    lat: Option<f64>,
    lon: Option<f64>,
    address: Option<String>,
    resolve: bool,
) -> Result<(), ServiceError> {
    seed_demo_fleet(service.store())?;
    let now = Utc::now();

    let incident = service
        .ingress(NewIncident { description, address, lat, lon }, now)
        .await?;
    let report = service.plan_incident(incident.id, now).await?;
    print_json(&report);

    let snapshots = service.incident_tracking(incident.id, Utc::now())?;
    print_json(&snapshots);

    if resolve {
        let summary = service.resolve(incident.id, "resolved from CLI", Utc::now()).await?;
        print_json(&summary);
        let frozen = service.incident_tracking(incident.id, Utc::now())?;
        print_json(&frozen);
    }

    print_json(&service.ops_summary()?);
    Ok(())
}

/// A small CABA fleet so `run` has something to dispatch.
fn seed_demo_fleet(store: &Arc<Store>) -> Result<(), ServiceError> {
    let units: [(ForceKind, &str, f64, f64); 6] = [
        (ForceKind::Police, "patrol", -34.6037, -58.3816),
        (ForceKind::Police, "patrol", -34.6050, -58.3790),
        (ForceKind::Medical, "ambulance", -34.6092, -58.3850),
        (ForceKind::Medical, "ambulance", -34.5990, -58.3920),
        (ForceKind::Fire, "fire_engine", -34.6178, -58.3730),
        (ForceKind::Traffic, "traffic_unit", -34.6020, -58.3748),
    ];
    for (force, kind, lat, lon) in units {
        store.add_vehicle(force, kind, Some(Point::new(lat, lon)))?;
    }

    let agents: [(ForceKind, &str, &str, f64, f64); 3] = [
        (ForceKind::Police, "Juan Perez", "officer", -34.6040, -58.3810),
        (ForceKind::Medical, "Maria Garcia", "paramedic", -34.6090, -58.3855),
        (ForceKind::Fire, "Carlos Lopez", "firefighter", -34.6175, -58.3735),
    ];
    for (force, name, role, lat, lon) in agents {
        store.add_agent(force, name, role, Some(Point::new(lat, lon)))?;
    }

    store.add_hospital("Hospital Argerich", Some(Point::new(-34.6286, -58.3630)), 120, 80)?;
    store.add_hospital("Hospital Ramos Mejia", Some(Point::new(-34.6103, -58.4047)), 200, 150)?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("cannot serialize output: {e}"),
    }
}
