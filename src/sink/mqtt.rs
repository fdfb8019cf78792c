use rumqttc::v5::{mqttbytes::QoS, Client};

use super::StateSink;
use crate::config::TopicSettings;
use crate::detect::DetectionResult;
use crate::error::BridgeError;

/// Anything that can publish a UTF-8 payload to a topic without blocking.
pub trait TopicPublisher: Send {
    fn publish_text(&self, topic: &str, payload: &str) -> Result<(), BridgeError>;
}

impl TopicPublisher for Client {
    fn publish_text(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
        self.try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| BridgeError::transport(topic, e))
    }
}

/// MQTT state sink: `ON`/`OFF` on the detection topic, `NN.N` on the
/// confidence topic.
pub struct MqttStateSink<P: TopicPublisher> {
    publisher: P,
    state_topic: String,
    confidence_topic: String,
}

impl<P: TopicPublisher> MqttStateSink<P> {
    pub fn new(publisher: P, topics: &TopicSettings) -> Self {
        Self {
            publisher,
            state_topic: topics.person_detection.clone(),
            confidence_topic: topics.confidence.clone(),
        }
    }
}

impl<P: TopicPublisher> StateSink for MqttStateSink<P> {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn publish(&mut self, result: &DetectionResult) {
        if self.deliver(result) {
            log::info!(
                "published detection results to {} and {}",
                self.state_topic,
                self.confidence_topic
            );
        }
    }
}

impl<P: TopicPublisher> MqttStateSink<P> {
    /// Send both values; true only when both were accepted.
    fn deliver(&self, result: &DetectionResult) -> bool {
        let state = self
            .publisher
            .publish_text(&self.state_topic, occupancy_payload(result));
        if let Err(e) = &state {
            log::error!("error publishing detection state: {}", e);
        }
        let confidence = self
            .publisher
            .publish_text(&self.confidence_topic, &result.confidence_label());
        if let Err(e) = &confidence {
            log::error!("error publishing detection confidence: {}", e);
        }
        state.is_ok() && confidence.is_ok()
    }
}

pub fn occupancy_payload(result: &DetectionResult) -> &'static str {
    if result.person_detected {
        "ON"
    } else {
        "OFF"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<(String, String)>>>,
        fail: bool,
        fail_topic: Option<&'static str>,
    }

    impl TopicPublisher for Recorder {
        fn publish_text(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
            if self.fail || self.fail_topic == Some(topic) {
                return Err(BridgeError::transport(topic, "request queue full"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    fn topics() -> TopicSettings {
        TopicSettings {
            image: "esp32/cam/image".into(),
            detection_switch: "switch/detection".into(),
            upload_switch: "switch/upload".into(),
            person_detection: "homeassistant/binary_sensor/person_detection/state".into(),
            confidence: "homeassistant/sensor/detection_confidence/state".into(),
        }
    }

    #[test]
    fn publishes_state_then_confidence() {
        let recorder = Recorder::default();
        let mut sink = MqttStateSink::new(recorder.clone(), &topics());
        sink.publish(&DetectionResult::new(true, 0.82));

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![
                (
                    "homeassistant/binary_sensor/person_detection/state".to_string(),
                    "ON".to_string()
                ),
                (
                    "homeassistant/sensor/detection_confidence/state".to_string(),
                    "82.0".to_string()
                ),
            ]
        );
    }

    #[test]
    fn publish_failures_are_swallowed() {
        let recorder = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let mut sink = MqttStateSink::new(recorder.clone(), &topics());
        sink.publish(&DetectionResult::none());
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn delivery_succeeds_only_when_both_publishes_do() {
        let ok = MqttStateSink::new(Recorder::default(), &topics());
        assert!(ok.deliver(&DetectionResult::new(true, 0.9)));

        let all_failing = MqttStateSink::new(
            Recorder {
                fail: true,
                ..Recorder::default()
            },
            &topics(),
        );
        assert!(!all_failing.deliver(&DetectionResult::new(true, 0.9)));

        let recorder = Recorder {
            fail_topic: Some("homeassistant/sensor/detection_confidence/state"),
            ..Recorder::default()
        };
        let half = MqttStateSink::new(recorder.clone(), &topics());
        assert!(!half.deliver(&DetectionResult::new(false, 0.1)));
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
    }
}
