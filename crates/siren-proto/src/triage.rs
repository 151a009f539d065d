//! Triage contracts: severity codes, force catalog, and the cloud wire
//! format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Severity band assigned by triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Code {
    Red,
    Yellow,
    Green,
}

impl Code {
    /// Dispatch priority bound to the code.
    pub fn priority(self) -> u8 {
        match self {
            Code::Red => 10,
            Code::Yellow => 5,
            Code::Green => 1,
        }
    }

    /// Red-code incidents get signal preemption.
    pub fn green_wave(self) -> bool {
        matches!(self, Code::Red)
    }
}

/// The four responding forces. Static catalog; never deleted while
/// referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceKind {
    Police,
    Medical,
    Fire,
    Traffic,
}

impl ForceKind {
    pub fn all() -> [ForceKind; 4] {
        [ForceKind::Police, ForceKind::Medical, ForceKind::Fire, ForceKind::Traffic]
    }

    pub fn label(self) -> &'static str {
        match self {
            ForceKind::Police => "police",
            ForceKind::Medical => "medical",
            ForceKind::Fire => "fire",
            ForceKind::Traffic => "traffic",
        }
    }
}

/// Which layer produced the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageSource {
    /// External LLM provider answered with a valid payload.
    Cloud,
    /// Weighted rules layer.
    Local,
    /// Rules layer after a cloud attempt failed.
    Fallback,
}

/// A resource the triage layer recommends sending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedResource {
    pub kind: String,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Full triage result for one incident description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageOutcome {
    pub code: Code,
    /// Severity score clamped to `[1, 100]`.
    pub score: u32,
    /// Primary responding force.
    pub kind: ForceKind,
    pub reasons: Vec<String>,
    /// Operator-facing narrative.
    pub narrative: String,
    pub resources: Vec<RecommendedResource>,
    pub source: TriageSource,
}

/// Wire payload the cloud provider must return (strict JSON, Spanish field
/// names are part of the deployed contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageWire {
    pub tipo: String,
    pub codigo: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub razones: Vec<String>,
    #[serde(default)]
    pub respuesta_ia: Option<String>,
    #[serde(default)]
    pub recursos: Vec<WireResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResource {
    pub tipo: String,
    #[serde(default = "default_count")]
    pub cantidad: u32,
    #[serde(default)]
    pub detalle: Option<String>,
}

fn default_count() -> u32 {
    1
}

impl TriageWire {
    /// Maps the wire code onto a severity band; unknown values are invalid.
    pub fn code(&self) -> Option<Code> {
        match self.codigo.trim().to_lowercase().as_str() {
            "rojo" => Some(Code::Red),
            "amarillo" => Some(Code::Yellow),
            "verde" => Some(Code::Green),
            _ => None,
        }
    }

    /// Maps the wire intervention type onto a force.
    pub fn kind(&self) -> Option<ForceKind> {
        match self.tipo.trim().to_lowercase().as_str() {
            "policial" => Some(ForceKind::Police),
            "medico" => Some(ForceKind::Medical),
            "bomberos" => Some(ForceKind::Fire),
            _ => None,
        }
    }

    /// A payload is usable only when both required fields map cleanly.
    pub fn is_valid(&self) -> bool {
        self.code().is_some() && self.kind().is_some()
    }
}

/// Cloud triage seam. Failures of any kind surface as `None`; the engine
/// falls back to the rules layer.
#[async_trait]
pub trait TriageProvider: Send + Sync {
    async fn classify(&self, description: &str) -> Option<TriageWire>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_round_trip() {
        let raw = r#"{"tipo":"medico","codigo":"rojo","score":80,"razones":["paro cardiaco"],"respuesta_ia":"Emergencia critica","recursos":[{"tipo":"ambulancia","cantidad":2}]}"#;
        let wire: TriageWire = serde_json::from_str(raw).unwrap();
        assert_eq!(wire.code(), Some(Code::Red));
        assert_eq!(wire.kind(), Some(ForceKind::Medical));
        assert_eq!(wire.recursos.len(), 1);
        assert_eq!(wire.recursos[0].cantidad, 2);
        assert!(wire.is_valid());
    }

    #[test]
    fn test_wire_minimal_payload() {
        let wire: TriageWire = serde_json::from_str(r#"{"tipo":"policial","codigo":"verde"}"#).unwrap();
        assert!(wire.is_valid());
        assert!(wire.razones.is_empty());
        assert!(wire.score.is_none());
    }

    #[test]
    fn test_wire_rejects_unknown_values() {
        let wire: TriageWire =
            serde_json::from_str(r#"{"tipo":"naval","codigo":"violeta"}"#).unwrap();
        assert!(wire.code().is_none());
        assert!(wire.kind().is_none());
        assert!(!wire.is_valid());
    }

    #[test]
    fn test_code_invariants() {
        assert_eq!(Code::Red.priority(), 10);
        assert_eq!(Code::Yellow.priority(), 5);
        assert_eq!(Code::Green.priority(), 1);
        assert!(Code::Red.green_wave());
        assert!(!Code::Yellow.green_wave());
    }

    #[test]
    fn test_code_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Code::Red).unwrap(), "\"red\"");
        assert_eq!(serde_json::to_string(&ForceKind::Fire).unwrap(), "\"fire\"");
    }
}
