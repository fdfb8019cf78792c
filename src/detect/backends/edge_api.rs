use serde::Deserialize;
use std::time::Duration;

use crate::detect::backend::InferenceBackend;
use crate::detect::result::DetectionResult;
use crate::error::{from_ureq, BridgeError};
use crate::transport::http_agent;

/// Classification response: `{ "classification": { "results": [{label, value}, ...] } }`.
#[derive(Debug, Deserialize)]
pub struct ClassifyResponse {
    pub classification: Option<Classification>,
}

#[derive(Debug, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub results: Vec<LabelScore>,
}

#[derive(Debug, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub value: f64,
}

/// Score of the first label containing "person" (case-insensitive).
pub fn person_confidence(results: &[LabelScore]) -> Option<f64> {
    results
        .iter()
        .find(|item| item.label.to_lowercase().contains("person"))
        .map(|item| item.value)
}

/// Remote classification API backend.
///
/// POSTs the raw image bytes with an `x-api-key` header. A person counts as
/// detected when its score is at or above the configured threshold.
pub struct EdgeImpulseApiBackend {
    agent: ureq::Agent,
    url: String,
    api_key: String,
    threshold: f64,
}

impl EdgeImpulseApiBackend {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: http_agent(timeout),
            url: url.into(),
            api_key: api_key.into(),
            threshold: 0.7,
        }
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Interpret a response body. Missing `classification` degrades to "no person".
    pub fn interpret(&self, body: &str) -> Result<DetectionResult, BridgeError> {
        let parsed: ClassifyResponse = serde_json::from_str(body)
            .map_err(|e| BridgeError::decode("classification response", e))?;
        let Some(classification) = parsed.classification else {
            log::warn!("no classification results in response from {}", self.url);
            return Ok(DetectionResult::none());
        };
        let confidence = person_confidence(&classification.results).unwrap_or(0.0);
        Ok(DetectionResult::new(confidence >= self.threshold, confidence))
    }
}

impl InferenceBackend for EdgeImpulseApiBackend {
    fn name(&self) -> &'static str {
        "edge_impulse_api"
    }

    fn classify(&mut self, image: &[u8]) -> Result<DetectionResult, BridgeError> {
        log::debug!("sending image to {} ({} bytes)", self.url, image.len());
        let response = self
            .agent
            .post(&self.url)
            .set("x-api-key", &self.api_key)
            .set("Content-Type", "application/octet-stream")
            .send_bytes(image)
            .map_err(|e| from_ureq(&self.url, e))?;
        let body = response
            .into_string()
            .map_err(|e| BridgeError::transport(&self.url, e))?;
        self.interpret(&body)
    }
}
