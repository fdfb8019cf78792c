use serde_json::{json, Value};
use std::time::Duration;

use super::StateSink;
use crate::config::HomeAssistantSettings;
use crate::detect::DetectionResult;
use crate::error::{from_ureq, BridgeError};
use crate::transport::{http_agent, join_api_url};

/// Home Assistant REST state sink.
///
/// Two authenticated POSTs per result, to `states/<binary_sensor>` and
/// `states/<confidence_sensor>`. Without a supervisor token nothing is sent.
pub struct HomeAssistantSink {
    agent: ureq::Agent,
    binary_url: String,
    confidence_url: String,
    token: Option<String>,
}

impl HomeAssistantSink {
    pub fn new(settings: &HomeAssistantSettings, timeout: Duration) -> Result<Self, BridgeError> {
        let binary_url = join_api_url(
            &settings.api_url,
            &format!("states/{}", settings.binary_sensor_entity),
        )?;
        let confidence_url = join_api_url(
            &settings.api_url,
            &format!("states/{}", settings.confidence_sensor_entity),
        )?;
        Ok(Self {
            agent: http_agent(timeout),
            binary_url,
            confidence_url,
            token: settings.token.clone(),
        })
    }

    pub fn urls(&self) -> (&str, &str) {
        (&self.binary_url, &self.confidence_url)
    }

    fn post_state(&self, token: &str, url: &str, payload: &Value) -> Result<u16, BridgeError> {
        let response = self
            .agent
            .post(url)
            .set("Authorization", &format!("Bearer {}", token))
            .send_json(payload)
            .map_err(|e| from_ureq(url, e))?;
        Ok(response.status())
    }

    fn publish_one(&self, token: &str, url: &str, payload: &Value, what: &str) {
        match self.post_state(token, url, payload) {
            Ok(200) | Ok(201) => log::info!("updated {} at {}", what, url),
            Ok(status) => log::error!("failed to update {}: unexpected HTTP {}", what, status),
            Err(e) => log::error!("failed to update {}: {}", what, e),
        }
    }
}

impl StateSink for HomeAssistantSink {
    fn name(&self) -> &'static str {
        "home_assistant"
    }

    fn publish(&mut self, result: &DetectionResult) {
        let Some(token) = self.token.as_deref() else {
            log::warn!("cannot publish state: no supervisor token available");
            return;
        };
        self.publish_one(
            token,
            &self.binary_url,
            &binary_state_payload(result),
            "person detector state",
        );
        self.publish_one(
            token,
            &self.confidence_url,
            &confidence_state_payload(result),
            "confidence sensor",
        );
    }
}

/// Occupancy binary sensor body.
pub fn binary_state_payload(result: &DetectionResult) -> Value {
    json!({
        "state": if result.person_detected { "on" } else { "off" },
        "attributes": {
            "device_class": "occupancy",
            "friendly_name": "Person Detector",
            "confidence": result.confidence_percent(),
        }
    })
}

/// Confidence sensor body; the state is the percentage with one decimal.
pub fn confidence_state_payload(result: &DetectionResult) -> Value {
    json!({
        "state": result.confidence_percent(),
        "attributes": {
            "unit_of_measurement": "%",
            "friendly_name": "Person Detector Confidence",
            "icon": "mdi:percent",
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(token: Option<&str>) -> HomeAssistantSettings {
        HomeAssistantSettings {
            api_url: "http://127.0.0.1:9/core/api".into(),
            token: token.map(str::to_string),
            binary_sensor_entity: "binary_sensor.person_detector".into(),
            confidence_sensor_entity: "sensor.person_detector_confidence".into(),
        }
    }

    #[test]
    fn payloads_match_home_assistant_shape() {
        let result = DetectionResult::new(true, 0.82);
        let binary = binary_state_payload(&result);
        assert_eq!(binary["state"], "on");
        assert_eq!(binary["attributes"]["device_class"], "occupancy");
        assert_eq!(binary["attributes"]["confidence"], 82.0);

        let confidence = confidence_state_payload(&result);
        assert_eq!(confidence["state"], 82.0);
        assert_eq!(confidence["state"].to_string(), "82.0");
        assert_eq!(confidence["attributes"]["unit_of_measurement"], "%");

        assert_eq!(binary_state_payload(&DetectionResult::none())["state"], "off");
    }

    #[test]
    fn builds_state_urls() {
        let sink = HomeAssistantSink::new(&settings(None), Duration::from_secs(1)).unwrap();
        let (binary, confidence) = sink.urls();
        assert_eq!(
            binary,
            "http://127.0.0.1:9/core/api/states/binary_sensor.person_detector"
        );
        assert_eq!(
            confidence,
            "http://127.0.0.1:9/core/api/states/sensor.person_detector_confidence"
        );
    }

    #[test]
    fn publish_never_panics_without_token_or_server() {
        let mut sink = HomeAssistantSink::new(&settings(None), Duration::from_millis(200)).unwrap();
        sink.publish(&DetectionResult::new(true, 0.9));

        let mut sink =
            HomeAssistantSink::new(&settings(Some("token")), Duration::from_millis(200)).unwrap();
        sink.publish(&DetectionResult::new(false, 0.0));
    }
}
