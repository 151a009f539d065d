//! Weighted phrase tables and type patterns for the rules triage layer.
//!
//! The tables are data: Spanish emergency-call vocabulary with severity
//! weights. Matching is plain substring containment over normalized text,
//! so multi-word phrases and word stems (`atrapad` covers atrapado/a/os)
//! both work. Regexes are compiled once at engine construction.

use regex::Regex;
use siren_proto::ForceKind;

/// Critical findings. Weights 45-60.
pub const SEVERE: &[(&str, u32)] = &[
    ("paro cardiaco", 60),
    ("paro cardiorrespiratorio", 60),
    ("pcr", 60),
    ("infarto", 55),
    ("inconsciente", 50),
    ("convulsion", 45),
    ("convulsión", 45),
    ("asfixia", 55),
    ("ahogo", 45),
    ("hemorragia masiva", 60),
    ("hemorragia", 50),
    ("quemaduras graves", 55),
    ("explosion", 60),
    ("explosión", 60),
    ("derrumbe", 60),
    ("incendio masivo", 60),
    ("tiroteo", 60),
    ("arma de fuego", 55),
    ("apuñalado", 55),
    ("arma blanca", 50),
    ("se esta quemando", 60),
    ("se está quemando", 60),
    ("se quema", 60),
    ("en llamas", 60),
    ("fuego", 50),
    ("atrapad", 45),
    ("asalto", 55),
    ("atraco", 55),
];

/// Urgent but not immediately life-threatening findings. Weights 20-40.
pub const MODERATE: &[(&str, u32)] = &[
    ("accidente", 30),
    ("choque", 30),
    ("herido", 30),
    ("fractura", 35),
    ("luxacion", 25),
    ("luxación", 25),
    ("quemadura", 25),
    ("incendio", 40),
    ("caida", 20),
    ("caída", 20),
    ("intoxicacion", 30),
    ("intoxicación", 30),
    ("agresion", 30),
    ("agresión", 30),
    ("robo con violencia", 40),
    ("humo", 25),
    ("robo", 40),
    ("robando", 40),
    ("roban", 40),
    ("transito", 30),
    ("tránsito", 30),
    ("trafico", 30),
    ("tráfico", 30),
    ("bloqueo", 30),
    ("corte", 30),
    ("manifestacion", 30),
    ("manifestación", 30),
    ("obstruccion", 30),
    ("obstrucción", 30),
    ("disturbio", 35),
];

/// Low-acuity findings. Weights 5-15.
pub const MINOR: &[(&str, u32)] = &[
    ("dolor de cabeza", 5),
    ("fiebre", 5),
    ("resfriado", 5),
    ("gripe", 5),
    ("mareo", 10),
];

/// Vulnerable population modifiers. Weights 10-15.
pub const VULNERABLE: &[(&str, u32)] = &[
    ("bebé", 15),
    ("bebe", 15),
    ("niño", 10),
    ("nino", 10),
    ("embarazada", 15),
    ("anciano", 10),
    ("adulto mayor", 10),
];

/// Multiple-victim modifiers. Weights 15-20.
pub const MULTIPLE: &[(&str, u32)] = &[
    ("múltiples", 15),
    ("multiples", 15),
    ("varios heridos", 20),
    ("masivo", 20),
];

/// Sensitive location modifiers. Weights 10-20.
pub const SENSITIVE_PLACES: &[(&str, u32)] = &[
    ("escuela", 15),
    ("jardin", 15),
    ("jardín", 15),
    ("hospital", 10),
    ("estacion", 10),
    ("estación", 10),
    ("banco central", 20),
    ("banco", 10),
];

/// Compiled regex groups that decide the primary responding force.
#[derive(Debug)]
pub struct TypePatterns {
    fire: Regex,
    traffic: Regex,
    medical: Regex,
    police: Regex,
}

impl TypePatterns {
    pub fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            fire: Regex::new(
                r"incendio|fuego|llamas|humo|quema|explosi[oó]n|derrumbe|escape de gas",
            )?,
            traffic: Regex::new(
                r"choque|accidente|colisi[oó]n|tr[aá]nsito|tr[aá]fico|atropell|bloqueo|obstrucci[oó]n|sem[aá]foro",
            )?,
            medical: Regex::new(
                r"herido|infarto|paro card|pcr|inconsciente|convulsi[oó]n|asfixia|ahogo|hemorragia|fractura|luxaci[oó]n|quemadur|intoxicaci[oó]n|atragant|atrapad|dolor|fiebre|mareo|embarazada",
            )?,
            police: Regex::new(
                r"robo|roban|asalto|atraco|tiroteo|arma|apu[nñ]alad|disturbio|manifestaci[oó]n|reh[eé]n|violen|crimen|pelea|agresi[oó]n",
            )?,
        })
    }

    /// Picks the group with the most hits. Ties resolve by destructive
    /// potential: fire, then traffic, then medical, then police. No hits at
    /// all defaults to police.
    pub fn classify(&self, text: &str) -> ForceKind {
        let groups = [
            (ForceKind::Fire, &self.fire),
            (ForceKind::Traffic, &self.traffic),
            (ForceKind::Medical, &self.medical),
            (ForceKind::Police, &self.police),
        ];
        let mut best = ForceKind::Police;
        let mut best_hits = 0usize;
        for (kind, pattern) in groups {
            let hits = pattern.find_iter(text).count();
            if hits > best_hits {
                best = kind;
                best_hits = hits;
            }
        }
        best
    }
}

/// Lowercase and collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  Robo   EN\tprogreso "), "robo en progreso");
    }

    #[test]
    fn test_fire_beats_medical_on_tie() {
        let patterns = TypePatterns::compile().unwrap();
        let kind = patterns.classify("incendio en edificio con personas atrapadas");
        assert_eq!(kind, ForceKind::Fire);
    }

    #[test]
    fn test_police_wins_on_robbery() {
        let patterns = TypePatterns::compile().unwrap();
        let kind = patterns.classify("robo violento con arma blanca en microcentro");
        assert_eq!(kind, ForceKind::Police);
    }

    #[test]
    fn test_default_is_police() {
        let patterns = TypePatterns::compile().unwrap();
        assert_eq!(patterns.classify("situacion extraña en la esquina"), ForceKind::Police);
    }

    #[test]
    fn test_severe_weights_in_band() {
        for (phrase, weight) in SEVERE {
            assert!((45..=60).contains(weight), "{phrase} weight {weight}");
        }
    }

    #[test]
    fn test_moderate_weights_in_band() {
        for (phrase, weight) in MODERATE {
            assert!((20..=40).contains(weight), "{phrase} weight {weight}");
        }
    }
}
