//! Individual routing backend clients.
//!
//! Each client normalizes its wire format into a `RouteSummary` and reports
//! rate limiting separately so the stack can open a backoff window.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use siren_proto::{Geometry, Point, RouteStep, RouteSummary};

/// What one provider attempt produced.
pub(crate) enum FetchOutcome {
    Route(RouteSummary),
    /// HTTP 429; the stack opens a backoff window for this provider.
    RateLimited,
    /// Timeout, transport error, bad payload. Try the next provider.
    Unavailable,
}

// ---- Mapbox ------------------------------------------------------------

#[derive(Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Deserialize)]
struct DirectionsRoute {
    geometry: Option<Geometry>,
    distance: Option<f64>,
    duration: Option<f64>,
    #[serde(default)]
    legs: Vec<DirectionsLeg>,
}

#[derive(Deserialize)]
struct DirectionsLeg {
    #[serde(default)]
    steps: Vec<DirectionsStep>,
}

#[derive(Deserialize)]
struct DirectionsStep {
    #[serde(default)]
    name: String,
    #[serde(default)]
    distance: f64,
    #[serde(default)]
    duration: f64,
}

impl DirectionsRoute {
    fn into_summary(self, provider: &str) -> Option<RouteSummary> {
        let geometry = self.geometry?;
        if !geometry.is_line() || geometry.coords().len() < 2 {
            return None;
        }
        let mut summary = RouteSummary::new(
            provider,
            geometry,
            self.distance.unwrap_or(0.0),
            self.duration.unwrap_or(0.0),
        );
        summary.steps = self
            .legs
            .into_iter()
            .flat_map(|leg| leg.steps)
            .map(|s| RouteStep {
                instruction: s.name,
                distance_m: s.distance,
                duration_s: s.duration,
            })
            .collect();
        Some(summary)
    }
}

pub(crate) async fn fetch_mapbox(
    http: &Client,
    key: &str,
    start: Point,
    end: Point,
    timeout: Duration,
) -> FetchOutcome {
    let url = format!(
        "https://api.mapbox.com/directions/v5/mapbox/driving/{},{};{},{}",
        start.lon, start.lat, end.lon, end.lat
    );
    let request = http
        .get(&url)
        .query(&[
            ("access_token", key),
            ("geometries", "geojson"),
            ("steps", "true"),
            ("overview", "full"),
        ])
        .timeout(timeout);

    match request.send().await {
        Ok(response) if response.status().as_u16() == 429 => {
            warn!("mapbox rate limited (HTTP 429)");
            FetchOutcome::RateLimited
        }
        Ok(response) if response.status().is_success() => {
            match response.json::<DirectionsResponse>().await {
                Ok(body) => body
                    .routes
                    .into_iter()
                    .next()
                    .and_then(|r| r.into_summary("mapbox"))
                    .map_or(FetchOutcome::Unavailable, FetchOutcome::Route),
                Err(e) => {
                    warn!("mapbox payload error: {e}");
                    FetchOutcome::Unavailable
                }
            }
        }
        Ok(response) => {
            warn!("mapbox HTTP {}", response.status());
            FetchOutcome::Unavailable
        }
        Err(e) => {
            debug!("mapbox request error: {e}");
            FetchOutcome::Unavailable
        }
    }
}

// ---- OpenRouteService --------------------------------------------------

#[derive(Deserialize)]
struct OpenRouteResponse {
    #[serde(default)]
    features: Vec<OpenRouteFeature>,
}

#[derive(Deserialize)]
struct OpenRouteFeature {
    geometry: Option<Geometry>,
    properties: Option<OpenRouteProperties>,
}

#[derive(Deserialize)]
struct OpenRouteProperties {
    #[serde(default)]
    segments: Vec<OpenRouteSegment>,
}

#[derive(Deserialize)]
struct OpenRouteSegment {
    #[serde(default)]
    distance: f64,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    steps: Vec<OpenRouteStep>,
}

#[derive(Deserialize)]
struct OpenRouteStep {
    #[serde(default)]
    instruction: String,
    #[serde(default)]
    distance: f64,
    #[serde(default)]
    duration: f64,
}

pub(crate) async fn fetch_openroute(
    http: &Client,
    key: &str,
    start: Point,
    end: Point,
    timeout: Duration,
) -> FetchOutcome {
    let body = serde_json::json!({
        "coordinates": [[start.lon, start.lat], [end.lon, end.lat]],
        "format": "geojson",
        "instructions": true,
        "units": "m",
    });
    let request = http
        .post("https://api.openrouteservice.org/v2/directions/driving-car")
        .header("Authorization", key)
        .json(&body)
        .timeout(timeout);

    match request.send().await {
        Ok(response) if response.status().as_u16() == 429 => {
            warn!("openrouteservice rate limited (HTTP 429)");
            FetchOutcome::RateLimited
        }
        Ok(response) if response.status().is_success() => {
            match response.json::<OpenRouteResponse>().await {
                Ok(body) => {
                    let Some(feature) = body.features.into_iter().next() else {
                        return FetchOutcome::Unavailable;
                    };
                    let Some(geometry) = feature.geometry else {
                        return FetchOutcome::Unavailable;
                    };
                    if !geometry.is_line() || geometry.coords().len() < 2 {
                        return FetchOutcome::Unavailable;
                    }
                    let Some(segment) = feature
                        .properties
                        .and_then(|p| p.segments.into_iter().next())
                    else {
                        return FetchOutcome::Unavailable;
                    };
                    let mut summary = RouteSummary::new(
                        "openroute",
                        geometry,
                        segment.distance,
                        segment.duration,
                    );
                    summary.steps = segment
                        .steps
                        .into_iter()
                        .map(|s| RouteStep {
                            instruction: s.instruction,
                            distance_m: s.distance,
                            duration_s: s.duration,
                        })
                        .collect();
                    FetchOutcome::Route(summary)
                }
                Err(e) => {
                    warn!("openrouteservice payload error: {e}");
                    FetchOutcome::Unavailable
                }
            }
        }
        Ok(response) => {
            warn!("openrouteservice HTTP {}", response.status());
            FetchOutcome::Unavailable
        }
        Err(e) => {
            debug!("openrouteservice request error: {e}");
            FetchOutcome::Unavailable
        }
    }
}

// ---- OSRM (public hosts) -----------------------------------------------

/// Tries each configured OSRM host and returns the first non-trivial route.
/// Public demo servers occasionally answer with a two-point geometry, which
/// is filtered out.
pub(crate) async fn fetch_osrm(
    http: &Client,
    hosts: &[String],
    start: Point,
    end: Point,
    timeout: Duration,
) -> FetchOutcome {
    for host in hosts {
        let url = format!(
            "{}/{},{};{},{}",
            host.trim_end_matches('/'),
            start.lon,
            start.lat,
            end.lon,
            end.lat
        );
        let request = http
            .get(&url)
            .query(&[
                ("overview", "full"),
                ("geometries", "geojson"),
                ("steps", "true"),
            ])
            .timeout(timeout);

        match request.send().await {
            Ok(response) if response.status().as_u16() == 429 => {
                warn!("osrm host {host} rate limited (HTTP 429)");
                return FetchOutcome::RateLimited;
            }
            Ok(response) if response.status().is_success() => {
                match response.json::<DirectionsResponse>().await {
                    Ok(body) => {
                        let Some(route) = body.routes.into_iter().next() else {
                            continue;
                        };
                        // Trivial geometries go to the next host.
                        if route
                            .geometry
                            .as_ref()
                            .is_some_and(|g| g.is_line() && g.coords().len() >= 3)
                        {
                            if let Some(summary) = route.into_summary("osrm") {
                                return FetchOutcome::Route(summary);
                            }
                        }
                        debug!("osrm host {host} returned a trivial geometry, trying next");
                    }
                    Err(e) => {
                        debug!("osrm host {host} payload error: {e}");
                    }
                }
            }
            Ok(response) => {
                debug!("osrm host {host} HTTP {}", response.status());
            }
            Err(e) => {
                debug!("osrm host {host} request error: {e}");
            }
        }
    }
    FetchOutcome::Unavailable
}

// ---- GraphHopper -------------------------------------------------------

#[derive(Deserialize)]
struct GraphHopperResponse {
    #[serde(default)]
    paths: Vec<GraphHopperPath>,
}

#[derive(Deserialize)]
struct GraphHopperPath {
    points: Option<Geometry>,
    #[serde(default)]
    distance: f64,
    /// Milliseconds.
    #[serde(default)]
    time: f64,
    #[serde(default)]
    instructions: Vec<GraphHopperInstruction>,
}

#[derive(Deserialize)]
struct GraphHopperInstruction {
    #[serde(default)]
    text: String,
    #[serde(default)]
    distance: f64,
    /// Milliseconds.
    #[serde(default)]
    time: f64,
}

pub(crate) async fn fetch_graphhopper(
    http: &Client,
    key: &str,
    start: Point,
    end: Point,
    timeout: Duration,
) -> FetchOutcome {
    let start_point = format!("{},{}", start.lat, start.lon);
    let end_point = format!("{},{}", end.lat, end.lon);
    let request = http
        .get("https://graphhopper.com/api/1/route")
        .query(&[
            ("point", start_point.as_str()),
            ("point", end_point.as_str()),
            ("profile", "car"),
            ("points_encoded", "false"),
            ("locale", "es"),
            ("instructions", "true"),
            ("calc_points", "true"),
            ("key", key),
        ])
        .timeout(timeout);

    match request.send().await {
        Ok(response) if response.status().as_u16() == 429 => {
            warn!("graphhopper rate limited (HTTP 429)");
            FetchOutcome::RateLimited
        }
        Ok(response) if response.status().is_success() => {
            match response.json::<GraphHopperResponse>().await {
                Ok(body) => {
                    let Some(path) = body.paths.into_iter().next() else {
                        return FetchOutcome::Unavailable;
                    };
                    let Some(geometry) = path.points else {
                        return FetchOutcome::Unavailable;
                    };
                    if !geometry.is_line() || geometry.coords().len() < 3 {
                        return FetchOutcome::Unavailable;
                    }
                    let mut summary = RouteSummary::new(
                        "graphhopper",
                        geometry,
                        path.distance,
                        path.time / 1000.0,
                    );
                    summary.steps = path
                        .instructions
                        .into_iter()
                        .map(|i| RouteStep {
                            instruction: i.text,
                            distance_m: i.distance,
                            duration_s: i.time / 1000.0,
                        })
                        .collect();
                    FetchOutcome::Route(summary)
                }
                Err(e) => {
                    warn!("graphhopper payload error: {e}");
                    FetchOutcome::Unavailable
                }
            }
        }
        Ok(response) => {
            warn!("graphhopper HTTP {}", response.status());
            FetchOutcome::Unavailable
        }
        Err(e) => {
            debug!("graphhopper request error: {e}");
            FetchOutcome::Unavailable
        }
    }
}
