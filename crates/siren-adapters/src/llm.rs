//! Cloud triage provider (Ollama-style chat endpoint).
//!
//! The model is instructed to answer with strict JSON; real deployments
//! still wrap answers in code fences or leak prose, so the content is
//! sanitized before parsing. Any failure at any stage yields `None` and the
//! engine's rules layer takes over.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use siren_core::TriageConfig;
use siren_proto::{TriageProvider, TriageWire};

/// System prompt of the deployed classifier; the Spanish schema is part of
/// the wire contract.
const SYSTEM_PROMPT: &str = "Eres un clasificador de eventos de emergencias para CABA. \
Tareas: 1) Determinar el tipo de intervención primaria entre ['policial','medico','bomberos']; \
2) Determinar el código de prioridad entre ['rojo','amarillo','verde'] según gravedad y riesgo vital inmediato; \
3) Explicar brevemente las razones; \
4) Generar una respuesta coherente como sistema de IA de emergencias. \
Responde SOLO en JSON estricto. Ejemplo: {\"tipo\":\"medico\",\"codigo\":\"rojo\",\"score\":80,\"razones\":[\"...\"],\"respuesta_ia\":\"Emergencia médica crítica...\"} \
No incluyas texto fuera del JSON, no uses comillas curvas, no uses bloques ``` y separa con comas.";

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: ChatMessage,
}

#[derive(Deserialize, Default)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

pub struct OllamaTriageProvider {
    http: Client,
    base_url: String,
    model: String,
    timeout: Duration,
    max_retries: u32,
    fence: Regex,
    json_block: Regex,
    adjacent_strings: Regex,
}

impl OllamaTriageProvider {
    /// Builds the provider when a base URL is configured.
    pub fn from_config(config: &TriageConfig) -> Option<Self> {
        let base_url = config.base_url.as_deref()?.trim().to_string();
        if base_url.is_empty() {
            return None;
        }
        let fence = Regex::new(r"```[a-zA-Z]*\n|```").ok()?;
        let json_block = Regex::new(r"\{[\s\S]*\}").ok()?;
        let adjacent_strings = Regex::new(r#""\s+""#).ok()?;
        Some(Self {
            http: Client::new(),
            base_url,
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries.max(1),
            fence,
            json_block,
            adjacent_strings,
        })
    }

    /// Strips code fences, extracts the first `{...}` block, and repairs
    /// missing commas between adjacent strings.
    fn sanitize(&self, content: &str) -> String {
        let content = self.fence.replace_all(content, "");
        let content = match self.json_block.find(&content) {
            Some(m) => m.as_str().to_string(),
            None => content.trim().to_string(),
        };
        self.adjacent_strings.replace_all(&content, "\", \"").to_string()
    }

    async fn chat(&self, description: &str) -> Option<String> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": description},
            ],
            "format": "json",
            "stream": false,
            "options": {"temperature": 0},
        });

        for attempt in 1..=self.max_retries {
            let result = self
                .http
                .post(&url)
                .json(&payload)
                .timeout(self.timeout)
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    match response.json::<ChatResponse>().await {
                        Ok(body) if !body.message.content.is_empty() => {
                            return Some(body.message.content);
                        }
                        Ok(_) => {
                            debug!("cloud triage returned an empty message");
                            return None;
                        }
                        Err(e) => {
                            warn!("cloud triage payload error: {e}");
                        }
                    }
                }
                Ok(response) => {
                    warn!("cloud triage HTTP {}", response.status());
                }
                Err(e) => {
                    debug!("cloud triage attempt {attempt} failed: {e}");
                }
            }
            let wait = Duration::from_secs(u64::from(2 * attempt).min(2));
            tokio::time::sleep(wait).await;
        }
        None
    }
}

#[async_trait]
impl TriageProvider for OllamaTriageProvider {
    async fn classify(&self, description: &str) -> Option<TriageWire> {
        if description.trim().is_empty() {
            return None;
        }
        let content = self.chat(description).await?;
        let sanitized = self.sanitize(&content);
        match serde_json::from_str::<TriageWire>(&sanitized) {
            Ok(wire) if wire.is_valid() => Some(wire),
            Ok(_) => {
                warn!("cloud triage answered with unknown enum values");
                None
            }
            Err(e) => {
                warn!("cloud triage answer is not valid JSON after sanitizing: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OllamaTriageProvider {
        OllamaTriageProvider::from_config(&TriageConfig {
            base_url: Some("http://localhost:11434".to_string()),
            ..TriageConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_without_base_url_there_is_no_provider() {
        assert!(OllamaTriageProvider::from_config(&TriageConfig::default()).is_none());
    }

    #[test]
    fn test_sanitize_strips_code_fences() {
        let p = provider();
        let raw = "```json\n{\"tipo\":\"policial\",\"codigo\":\"rojo\"}\n```";
        let clean = p.sanitize(raw);
        let wire: TriageWire = serde_json::from_str(&clean).unwrap();
        assert_eq!(wire.tipo, "policial");
    }

    #[test]
    fn test_sanitize_extracts_first_json_block() {
        let p = provider();
        let raw = "Claro, aqui va la clasificacion: {\"tipo\":\"medico\",\"codigo\":\"amarillo\"} espero que ayude";
        let clean = p.sanitize(raw);
        let wire: TriageWire = serde_json::from_str(&clean).unwrap();
        assert_eq!(wire.codigo, "amarillo");
    }

    #[test]
    fn test_sanitize_repairs_adjacent_strings() {
        let p = provider();
        let raw = r#"{"tipo":"policial","codigo":"rojo","razones":["arma" "violencia"]}"#;
        let clean = p.sanitize(raw);
        let wire: TriageWire = serde_json::from_str(&clean).unwrap();
        assert_eq!(wire.razones.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_none() {
        let p = OllamaTriageProvider::from_config(&TriageConfig {
            base_url: Some("http://127.0.0.1:1".to_string()),
            timeout_secs: 1,
            max_retries: 1,
            ..TriageConfig::default()
        })
        .unwrap();
        assert!(p.classify("incendio en edificio").await.is_none());
    }
}
