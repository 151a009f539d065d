//! The routing provider stack.
//!
//! Fixed preference order (Mapbox, OpenRouteService, OSRM multi-host,
//! GraphHopper), each with its own timeout and 429 backoff window, a
//! bounded LRU over rounded coordinate pairs, and a deterministic grid
//! fallback that guarantees a route is always returned. Offline mode skips
//! every external attempt; the test suite runs that way.

mod providers;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use siren_core::RoutingConfig;
use siren_proto::{Point, RoutePlanner, RouteSummary, grid_path, haversine_m, path_to_line};

use providers::FetchOutcome;

/// Fallback routes assume a conservative urban speed.
const FALLBACK_SPEED_KMH: f64 = 22.0;

const PROVIDER_ORDER: [&str; 4] = ["mapbox", "openroute", "osrm", "graphhopper"];

/// Bounded LRU keyed by rounded coordinates. Values are cloned on both
/// store and load so callers can never alias a cached entry.
struct RouteCache {
    capacity: usize,
    stamp: u64,
    entries: HashMap<String, (u64, RouteSummary)>,
}

impl RouteCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            stamp: 0,
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<RouteSummary> {
        self.stamp += 1;
        let stamp = self.stamp;
        self.entries.get_mut(key).map(|entry| {
            entry.0 = stamp;
            entry.1.clone()
        })
    }

    fn put(&mut self, key: String, value: RouteSummary) {
        if self.capacity == 0 {
            return;
        }
        self.stamp += 1;
        self.entries.insert(key, (self.stamp, value));
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (stamp, _))| *stamp)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct RoutingStack {
    config: RoutingConfig,
    http: Client,
    cache: Mutex<RouteCache>,
    /// Per-provider instant until which the provider is skipped.
    backoff: Mutex<HashMap<&'static str, Instant>>,
}

impl RoutingStack {
    pub fn new(config: RoutingConfig) -> Self {
        if config.offline {
            info!("routing offline mode enabled, external providers skipped");
        }
        Self {
            cache: Mutex::new(RouteCache::new(config.cache_size)),
            backoff: Mutex::new(HashMap::new()),
            http: Client::new(),
            config,
        }
    }

    /// Deterministic street-grid route between two points, used when every
    /// external provider fails or offline mode is on.
    pub fn fallback_route(start: Point, end: Point) -> RouteSummary {
        let mut path = grid_path(start, end);
        if path.len() < 2 {
            // Degenerate endpoints still need a valid line string.
            path.push(end);
        }
        let distance_m = haversine_m(start, end);
        let duration_s = distance_m / 1000.0 / FALLBACK_SPEED_KMH * 3600.0;
        RouteSummary::new("fallback", path_to_line(&path), distance_m, duration_s)
    }

    fn cache_key(start: Point, end: Point) -> String {
        format!(
            "{:.5}:{:.5}->{:.5}:{:.5}",
            start.lat, start.lon, end.lat, end.lon
        )
    }

    fn cached(&self, key: &str) -> Option<RouteSummary> {
        match self.cache.lock() {
            Ok(mut cache) => cache.get(key),
            Err(_) => None,
        }
    }

    fn store_cache(&self, key: String, value: &RouteSummary) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, value.clone());
        }
    }

    fn backoff_active(&self, provider: &'static str) -> bool {
        match self.backoff.lock() {
            Ok(map) => map.get(provider).is_some_and(|until| *until > Instant::now()),
            Err(_) => false,
        }
    }

    fn trip_backoff(&self, provider: &'static str) {
        let window = Duration::from_secs(self.config.backoff_seconds);
        if let Ok(mut map) = self.backoff.lock() {
            map.insert(provider, Instant::now() + window);
        }
        warn!(
            provider,
            seconds = self.config.backoff_seconds,
            "provider rate limited, backoff window opened"
        );
    }

    fn provider_timeout(&self, provider: &str) -> Duration {
        match provider {
            "osrm" => Duration::from_secs(self.config.osrm_timeout_secs),
            _ => Duration::from_secs(self.config.provider_timeout_secs),
        }
    }

    /// One attempt against one provider, honouring keys and backoff.
    async fn try_provider(
        &self,
        provider: &'static str,
        start: Point,
        end: Point,
    ) -> Option<RouteSummary> {
        if self.backoff_active(provider) {
            debug!(provider, "provider in backoff window, skipped");
            return None;
        }
        let timeout = self.provider_timeout(provider);
        let outcome = match provider {
            "mapbox" => {
                let key = self.config.mapbox_key.as_deref()?;
                providers::fetch_mapbox(&self.http, key, start, end, timeout).await
            }
            "openroute" => {
                let key = self.config.openroute_key.as_deref()?;
                providers::fetch_openroute(&self.http, key, start, end, timeout).await
            }
            "osrm" => {
                providers::fetch_osrm(&self.http, &self.config.osrm_hosts, start, end, timeout)
                    .await
            }
            "graphhopper" => {
                let key = self.config.graphhopper_key.as_deref()?;
                providers::fetch_graphhopper(&self.http, key, start, end, timeout).await
            }
            _ => FetchOutcome::Unavailable,
        };
        match outcome {
            FetchOutcome::Route(summary) => Some(summary),
            FetchOutcome::RateLimited => {
                self.trip_backoff(provider);
                None
            }
            FetchOutcome::Unavailable => None,
        }
    }

    #[cfg(test)]
    fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RoutePlanner for RoutingStack {
    async fn best_route(&self, start: Point, end: Point) -> RouteSummary {
        let key = Self::cache_key(start, end);
        if let Some(hit) = self.cached(&key) {
            debug!(%key, "route cache hit");
            return hit;
        }

        if !self.config.offline {
            for provider in PROVIDER_ORDER {
                if let Some(route) = self.try_provider(provider, start, end).await {
                    info!(provider, "route obtained");
                    self.store_cache(key, &route);
                    return route;
                }
            }
        }

        let fallback = Self::fallback_route(start, end);
        debug!(
            points = fallback.geometry.coords().len(),
            km = fallback.distance_km(),
            "grid fallback route used"
        );
        self.store_cache(key, &fallback);
        fallback
    }

    async fn alternatives(
        &self,
        start: Point,
        end: Point,
        exclude_provider: &str,
    ) -> Vec<RouteSummary> {
        if self.config.offline {
            return Vec::new();
        }
        let mut routes = Vec::new();
        for provider in PROVIDER_ORDER {
            if provider == exclude_provider {
                continue;
            }
            if let Some(route) = self.try_provider(provider, start, end).await {
                routes.push(route);
            }
        }
        routes
    }
}
