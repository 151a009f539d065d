//! Triage engine: rules layer plus optional cloud layer.
//!
//! The rules layer is always available and fully deterministic for a given
//! input. The cloud layer, when configured, is tried first; any failure
//! (timeout, malformed payload, unknown enum values) falls back to the
//! rules layer with no user-visible difference beyond the `source` field.

mod rules;

use std::sync::Arc;

use tracing::{debug, info, warn};

use siren_proto::{Code, ForceKind, RecommendedResource, TriageOutcome, TriageProvider, TriageSource};

use crate::config::{TriageBackend, TriageConfig};
use crate::error::{Result, ServiceError};

pub use rules::normalize;

/// Threshold mapping from the clamped score to the severity band.
pub fn code_for_score(score: u32) -> Code {
    if score >= 60 {
        Code::Red
    } else if score >= 25 {
        Code::Yellow
    } else {
        Code::Green
    }
}

pub struct TriageEngine {
    patterns: rules::TypePatterns,
    backend: TriageBackend,
    provider: Option<Arc<dyn TriageProvider>>,
}

impl TriageEngine {
    /// Builds the engine, compiling the type patterns once.
    ///
    /// Selecting the cloud backend without wiring a provider is the only
    /// configuration this refuses.
    pub fn new(
        config: &TriageConfig,
        provider: Option<Arc<dyn TriageProvider>>,
    ) -> Result<Self> {
        if config.provider == TriageBackend::Cloud && provider.is_none() {
            return Err(ServiceError::MisconfiguredProvider(
                "triage provider 'cloud' selected but no provider is configured".to_string(),
            ));
        }
        let patterns = rules::TypePatterns::compile()
            .map_err(|e| ServiceError::Unavailable(format!("triage pattern compilation: {e}")))?;
        Ok(Self {
            patterns,
            backend: config.provider,
            provider,
        })
    }

    /// Classifies a description, cloud layer first when configured.
    pub async fn classify(&self, description: &str) -> TriageOutcome {
        if self.backend == TriageBackend::Cloud {
            if let Some(provider) = &self.provider {
                if let Some(wire) = provider.classify(description).await {
                    if wire.is_valid() {
                        return self.outcome_from_wire(&wire);
                    }
                    warn!("cloud triage returned an invalid payload, using rules layer");
                } else {
                    warn!("cloud triage unavailable, using rules layer");
                }
                let mut outcome = self.classify_rules(description);
                outcome.source = TriageSource::Fallback;
                return outcome;
            }
        }
        self.classify_rules(description)
    }

    /// Pure rules classification. Identical input yields an identical
    /// `(code, score, kind)`.
    pub fn classify_rules(&self, description: &str) -> TriageOutcome {
        let (score, mut reasons) = analyze_description(description);
        let text = normalize(description);
        let mut kind = self.patterns.classify(&text);

        // A traffic call scoring this high is a major collision; fire crews
        // handle extrication.
        if kind == ForceKind::Traffic && score > 40 {
            kind = ForceKind::Fire;
            reasons.push("major collision profile: escalated to fire response".to_string());
        }

        let code = code_for_score(score);
        let resources = recommended_resources(kind, code);
        let narrative = narrative(kind, code, score);
        debug!(score, ?code, kind = kind.label(), "rules triage");

        TriageOutcome {
            code,
            score,
            kind,
            reasons,
            narrative,
            resources,
            source: TriageSource::Local,
        }
    }

    fn outcome_from_wire(&self, wire: &siren_proto::TriageWire) -> TriageOutcome {
        // Caller has checked is_valid(); the defaults are unreachable.
        let code = wire.code().unwrap_or(Code::Yellow);
        let kind = wire.kind().unwrap_or(ForceKind::Police);
        let score = wire
            .score
            .map(|s| (s.round() as i64).clamp(1, 100) as u32)
            .unwrap_or(match code {
                Code::Red => 60,
                Code::Yellow => 30,
                Code::Green => 5,
            });
        let resources = if wire.recursos.is_empty() {
            recommended_resources(kind, code)
        } else {
            wire.recursos
                .iter()
                .map(|r| RecommendedResource {
                    kind: r.tipo.clone(),
                    count: r.cantidad,
                    detail: r.detalle.clone(),
                })
                .collect()
        };
        info!(?code, kind = kind.label(), "cloud triage accepted");
        TriageOutcome {
            code,
            score,
            kind,
            reasons: wire.razones.clone(),
            narrative: wire
                .respuesta_ia
                .clone()
                .unwrap_or_else(|| narrative(kind, code, score)),
            resources,
            source: TriageSource::Cloud,
        }
    }
}

/// Sums weighted hits across the six phrase tables and clamps to [1, 100].
fn analyze_description(description: &str) -> (u32, Vec<String>) {
    if description.trim().is_empty() {
        return (1, vec!["no description provided".to_string()]);
    }

    let text = normalize(description);
    let mut score: u32 = 0;
    let mut reasons = Vec::new();

    let tables: [(&[(&str, u32)], &str); 6] = [
        (rules::SEVERE, "high severity"),
        (rules::MODERATE, "moderate severity"),
        (rules::MINOR, "minor"),
        (rules::VULNERABLE, "vulnerable population"),
        (rules::MULTIPLE, "multiple victims"),
        (rules::SENSITIVE_PLACES, "sensitive location"),
    ];
    for (table, label) in tables {
        for (phrase, weight) in table {
            if text.contains(phrase) {
                score += weight;
                reasons.push(format!("{label}: '{phrase}' (+{weight})"));
            }
        }
    }

    let score = score.clamp(1, 100);
    if reasons.is_empty() {
        reasons.push("no relevant findings, defaulting to low acuity".to_string());
    }
    (score, reasons)
}

fn recommended_resources(kind: ForceKind, code: Code) -> Vec<RecommendedResource> {
    let heavy = code == Code::Red;
    let units = if heavy { 2 } else { 1 };
    match kind {
        ForceKind::Medical => vec![RecommendedResource {
            kind: "ambulance".to_string(),
            count: units,
            detail: heavy.then(|| "advanced life support".to_string()),
        }],
        ForceKind::Fire => vec![
            RecommendedResource {
                kind: "fire_engine".to_string(),
                count: units,
                detail: None,
            },
            RecommendedResource {
                kind: "ambulance".to_string(),
                count: 1,
                detail: Some("standby for victims".to_string()),
            },
        ],
        ForceKind::Police => vec![RecommendedResource {
            kind: "patrol".to_string(),
            count: units,
            detail: heavy.then(|| "armed incident protocol".to_string()),
        }],
        ForceKind::Traffic => vec![RecommendedResource {
            kind: "traffic_unit".to_string(),
            count: units,
            detail: Some("perimeter and diversion".to_string()),
        }],
    }
}

fn narrative(kind: ForceKind, code: Code, score: u32) -> String {
    let lead = match kind {
        ForceKind::Medical => "Medical emergency",
        ForceKind::Fire => "Fire service emergency",
        ForceKind::Police => "Police intervention",
        ForceKind::Traffic => "Traffic incident",
    };
    let urgency = match code {
        Code::Red => "critical, immediate response with signal preemption",
        Code::Yellow => "urgent, dispatch the nearest available unit",
        Code::Green => "low acuity, routine handling",
    };
    format!("{lead} (score {score}): {urgency}.")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TriageEngine {
        TriageEngine::new(&TriageConfig::default(), None).unwrap()
    }

    #[test]
    fn test_threshold_boundaries() {
        assert_eq!(code_for_score(24), Code::Green);
        assert_eq!(code_for_score(25), Code::Yellow);
        assert_eq!(code_for_score(59), Code::Yellow);
        assert_eq!(code_for_score(60), Code::Red);
    }

    #[test]
    fn test_empty_description_defaults() {
        let outcome = engine().classify_rules("");
        assert_eq!(outcome.code, Code::Green);
        assert_eq!(outcome.score, 1);
        assert_eq!(outcome.kind, ForceKind::Police);
        assert_eq!(outcome.source, TriageSource::Local);
    }

    #[test]
    fn test_armed_robbery_is_red_police() {
        let outcome = engine().classify_rules("Robo violento con arma blanca en el microcentro");
        assert_eq!(outcome.kind, ForceKind::Police);
        // 'arma blanca' (+50) and 'robo' (+40).
        assert_eq!(outcome.score, 90);
        assert_eq!(outcome.code, Code::Red);
    }

    #[test]
    fn test_building_fire_with_trapped_people_is_red_fire() {
        let outcome = engine().classify_rules("Incendio en edificio con personas atrapadas");
        assert_eq!(outcome.code, Code::Red);
        assert_eq!(outcome.kind, ForceKind::Fire);
    }

    #[test]
    fn test_minor_collision_stays_traffic() {
        let outcome = engine().classify_rules("Choque leve en la avenida");
        assert_eq!(outcome.kind, ForceKind::Traffic);
        assert_eq!(outcome.code, Code::Yellow);
    }

    #[test]
    fn test_major_collision_reclassified_as_fire() {
        let outcome = engine().classify_rules("Choque múltiple con varios heridos en autopista");
        assert!(outcome.score > 40);
        assert_eq!(outcome.kind, ForceKind::Fire);
        assert!(outcome
            .reasons
            .iter()
            .any(|r| r.contains("escalated to fire response")));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let eng = engine();
        let a = eng.classify_rules("Persona inconsciente en la estación");
        let b = eng.classify_rules("Persona inconsciente en la estación");
        assert_eq!(a.code, b.code);
        assert_eq!(a.score, b.score);
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.reasons, b.reasons);
    }

    #[test]
    fn test_score_clamped_to_100() {
        let outcome = engine().classify_rules(
            "Explosión con derrumbe, incendio masivo, tiroteo y hemorragia masiva con varios heridos",
        );
        assert_eq!(outcome.score, 100);
        assert_eq!(outcome.code, Code::Red);
    }

    #[test]
    fn test_cloud_without_provider_is_misconfigured() {
        let config = TriageConfig {
            provider: TriageBackend::Cloud,
            ..TriageConfig::default()
        };
        assert!(matches!(
            TriageEngine::new(&config, None),
            Err(ServiceError::MisconfiguredProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_cloud_failure_falls_back_to_rules() {
        struct DownProvider;
        #[async_trait::async_trait]
        impl TriageProvider for DownProvider {
            async fn classify(&self, _description: &str) -> Option<siren_proto::TriageWire> {
                None
            }
        }

        let config = TriageConfig {
            provider: TriageBackend::Cloud,
            base_url: Some("http://localhost:1".to_string()),
            ..TriageConfig::default()
        };
        let engine = TriageEngine::new(&config, Some(Arc::new(DownProvider))).unwrap();
        let outcome = engine.classify("Robo con arma blanca").await;
        assert_eq!(outcome.source, TriageSource::Fallback);
        assert_eq!(outcome.kind, ForceKind::Police);
    }

    #[tokio::test]
    async fn test_cloud_success_is_used() {
        struct UpProvider;
        #[async_trait::async_trait]
        impl TriageProvider for UpProvider {
            async fn classify(&self, _description: &str) -> Option<siren_proto::TriageWire> {
                serde_json::from_str(
                    r#"{"tipo":"medico","codigo":"rojo","score":85,"razones":["paro cardiaco"]}"#,
                )
                .ok()
            }
        }

        let config = TriageConfig {
            provider: TriageBackend::Cloud,
            base_url: Some("http://localhost:11434".to_string()),
            ..TriageConfig::default()
        };
        let engine = TriageEngine::new(&config, Some(Arc::new(UpProvider))).unwrap();
        let outcome = engine.classify("paro cardiaco en via publica").await;
        assert_eq!(outcome.source, TriageSource::Cloud);
        assert_eq!(outcome.code, Code::Red);
        assert_eq!(outcome.kind, ForceKind::Medical);
        assert_eq!(outcome.score, 85);
    }
}
