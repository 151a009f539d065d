//! Configuration loading.
//!
//! Values come from an optional YAML file, then environment variables
//! override individual fields. Everything has a default so the system can
//! start with no file at all (offline tests rely on this).

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {var}: {value}")]
    BadEnvValue { var: String, value: String },
    #[error("triage provider 'cloud' selected but triage.base_url is empty")]
    MissingTriageCredentials,
    #[error("cannot read intersection catalog {path}: {source}")]
    CatalogIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse intersection catalog {path}: {source}")]
    CatalogParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid intersection catalog: {0}")]
    CatalogInvalid(String),
}

/// Which triage layer handles classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageBackend {
    /// Weighted rules engine only.
    #[default]
    Rules,
    /// External LLM first, rules as silent fallback.
    Cloud,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Skip every external provider and answer with the grid fallback.
    pub offline: bool,
    /// Route LRU capacity.
    pub cache_size: usize,
    /// Ranked assignments returned by a plan.
    pub max_results: usize,
    pub vehicle_candidates: usize,
    pub agent_candidates: usize,
    /// Cool-off after an HTTP 429, in seconds.
    pub backoff_seconds: u64,
    pub mapbox_key: Option<String>,
    pub openroute_key: Option<String>,
    pub graphhopper_key: Option<String>,
    pub osrm_hosts: Vec<String>,
    /// Per-request timeout for Mapbox/OpenRouteService/GraphHopper, seconds.
    pub provider_timeout_secs: u64,
    /// OSRM public hosts get a shorter leash.
    pub osrm_timeout_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            offline: false,
            cache_size: 128,
            max_results: 6,
            vehicle_candidates: 6,
            agent_candidates: 4,
            backoff_seconds: 120,
            mapbox_key: None,
            openroute_key: None,
            graphhopper_key: None,
            osrm_hosts: vec![
                "https://router.project-osrm.org/route/v1/driving".to_string(),
                "https://routing.openstreetmap.de/routed-car/route/v1/driving".to_string(),
            ],
            provider_timeout_secs: 10,
            osrm_timeout_secs: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub provider: TriageBackend,
    /// Base URL of the LLM endpoint; required when `provider = cloud`.
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            provider: TriageBackend::Rules,
            base_url: None,
            model: "gemma:4b".to_string(),
            timeout_secs: 20,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Fixed offset of the deployment's wall clock, hours east of UTC.
    pub utc_offset_hours: i32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { utc_offset_hours: -3 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GreenWaveConfig {
    /// Path to the JSON intersection catalog. When absent the coordinator
    /// starts with an empty catalog and every activation yields no windows.
    pub catalog_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    pub base_url: String,
    /// Appended to free-form addresses to anchor the search area.
    pub region_suffix: String,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org/search".to_string(),
            region_suffix: "CABA, Argentina".to_string(),
        }
    }
}

/// Top-level configuration for the whole backbone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SirenConfig {
    pub routing: RoutingConfig,
    pub triage: TriageConfig,
    pub tracking: TrackingConfig,
    pub greenwave: GreenWaveConfig,
    pub geocoder: GeocoderConfig,
}

impl SirenConfig {
    /// Loads the file (when given), applies environment overrides, then
    /// validates cross-field constraints.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|source| ConfigError::Io {
                    path: p.display().to_string(),
                    source,
                })?;
                serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: p.display().to_string(),
                    source,
                })?
            }
            None => SirenConfig::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variables override file values.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_flag("ROUTING_OFFLINE")? {
            self.routing.offline = v;
        }
        if let Some(v) = env_flag("FORCE_ROUTING_OFFLINE")? {
            self.routing.offline = self.routing.offline || v;
        }
        if let Some(v) = env_number::<usize>("ROUTING_CACHE_SIZE")? {
            self.routing.cache_size = v;
        }
        if let Some(v) = env_number::<usize>("ROUTING_MAX_RESULTS")? {
            self.routing.max_results = v;
        }
        if let Some(v) = env_number::<usize>("ROUTING_VEHICLE_CANDIDATES")? {
            self.routing.vehicle_candidates = v;
        }
        if let Some(v) = env_number::<usize>("ROUTING_AGENT_CANDIDATES")? {
            self.routing.agent_candidates = v;
        }
        if let Some(v) = env_number::<u64>("OPENROUTE_BACKOFF_SECONDS")? {
            self.routing.backoff_seconds = v;
        }
        if let Ok(v) = env::var("MAPBOX_API_KEY") {
            if !v.trim().is_empty() {
                self.routing.mapbox_key = Some(v);
            }
        }
        if let Ok(v) = env::var("OPENROUTE_API_KEY") {
            if !v.trim().is_empty() {
                self.routing.openroute_key = Some(v);
            }
        }
        if let Ok(v) = env::var("GRAPHHOPPER_API_KEY") {
            if !v.trim().is_empty() {
                self.routing.graphhopper_key = Some(v);
            }
        }
        if let Ok(v) = env::var("TRIAGE_PROVIDER") {
            match v.trim().to_lowercase().as_str() {
                "rules" => self.triage.provider = TriageBackend::Rules,
                "cloud" => self.triage.provider = TriageBackend::Cloud,
                other => {
                    return Err(ConfigError::BadEnvValue {
                        var: "TRIAGE_PROVIDER".to_string(),
                        value: other.to_string(),
                    });
                }
            }
        }
        if let Ok(v) = env::var("TRIAGE_BASE_URL") {
            if !v.trim().is_empty() {
                self.triage.base_url = Some(v);
            }
        }
        Ok(())
    }

    /// `MisconfiguredProvider` is only raised for an explicit cloud
    /// selection without credentials; rules mode never fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.triage.provider == TriageBackend::Cloud
            && self.triage.base_url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::MissingTriageCredentials);
        }
        Ok(())
    }
}

fn env_flag(var: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(var) {
        Ok(raw) => {
            let v = raw.trim().to_lowercase();
            if v.is_empty() {
                return Ok(None);
            }
            match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::BadEnvValue {
                    var: var.to_string(),
                    value: raw,
                }),
            }
        }
        Err(_) => Ok(None),
    }
}

fn env_number<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(raw) => {
            let v = raw.trim();
            if v.is_empty() {
                return Ok(None);
            }
            v.parse::<T>().map(Some).map_err(|_| ConfigError::BadEnvValue {
                var: var.to_string(),
                value: raw,
            })
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SirenConfig::default();
        assert!(!config.routing.offline);
        assert_eq!(config.routing.cache_size, 128);
        assert_eq!(config.routing.vehicle_candidates, 6);
        assert_eq!(config.routing.agent_candidates, 4);
        assert_eq!(config.routing.backoff_seconds, 120);
        assert_eq!(config.triage.provider, TriageBackend::Rules);
        assert_eq!(config.tracking.utc_offset_hours, -3);
    }

    #[test]
    fn test_cloud_without_base_url_is_rejected() {
        let config = SirenConfig {
            triage: TriageConfig {
                provider: TriageBackend::Cloud,
                base_url: None,
                ..TriageConfig::default()
            },
            ..SirenConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingTriageCredentials)
        ));
    }

    #[test]
    fn test_cloud_with_base_url_is_accepted() {
        let config = SirenConfig {
            triage: TriageConfig {
                provider: TriageBackend::Cloud,
                base_url: Some("http://localhost:11434".to_string()),
                ..TriageConfig::default()
            },
            ..SirenConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "routing:\n  offline: true\n  cache_size: 16\ntriage:\n  model: llama3"
        )
        .unwrap();
        let config = SirenConfig::load(Some(file.path())).unwrap();
        assert!(config.routing.offline);
        assert_eq!(config.routing.cache_size, 16);
        assert_eq!(config.triage.model, "llama3");
        // Untouched sections keep their defaults.
        assert_eq!(config.routing.max_results, 6);
    }
}
