//! Push-mode image ingress.
//!
//! The MQTT transport turns every inbound publish into an [`InboundMessage`]
//! and sends it over a channel to a single consumer. Image payloads stay
//! base64 until the consumer decides to classify them, so images that
//! arrive while detection is disabled are never decoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::TopicSettings;
use crate::error::BridgeError;

/// One routed publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundMessage {
    /// Base64 JPEG as received on the image topic.
    Image(Vec<u8>),
    /// New value for the detection switch.
    DetectionToggle(bool),
    /// New value for the training-data upload switch.
    UploadToggle(bool),
}

/// Maps topics to message kinds.
#[derive(Clone, Debug)]
pub struct TopicRouter {
    image: String,
    detection_switch: String,
    upload_switch: String,
}

impl TopicRouter {
    pub fn new(topics: &TopicSettings) -> Self {
        Self {
            image: topics.image.clone(),
            detection_switch: topics.detection_switch.clone(),
            upload_switch: topics.upload_switch.clone(),
        }
    }

    /// Topics the push source must subscribe to.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            self.image.clone(),
            self.detection_switch.clone(),
            self.upload_switch.clone(),
        ]
    }

    /// Route one publish. Unknown topics yield `None`.
    pub fn route(&self, topic: &str, payload: &[u8]) -> Option<InboundMessage> {
        if topic == self.detection_switch {
            return Some(InboundMessage::DetectionToggle(switch_state(payload)));
        }
        if topic == self.upload_switch {
            return Some(InboundMessage::UploadToggle(switch_state(payload)));
        }
        if topic == self.image {
            return Some(InboundMessage::Image(payload.to_vec()));
        }
        None
    }
}

/// `on` (any case, surrounding whitespace ignored) is true; anything else is false.
pub fn switch_state(payload: &[u8]) -> bool {
    String::from_utf8_lossy(payload).trim().eq_ignore_ascii_case("on")
}

/// Decode a base64 image payload into raw JPEG bytes.
///
/// ASCII whitespace anywhere in the payload is ignored, so line-wrapped
/// (MIME-style) encodings decode the same as single-line ones.
pub fn decode_image_payload(payload: &[u8]) -> Result<Vec<u8>, BridgeError> {
    let compact: Vec<u8> = payload
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(BridgeError::decode("image payload", "empty payload"));
    }
    STANDARD
        .decode(&compact)
        .map_err(|e| BridgeError::decode("image payload", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> TopicRouter {
        TopicRouter::new(&TopicSettings {
            image: "esp32/cam/image".into(),
            detection_switch: "cam/switch/person_detection/state".into(),
            upload_switch: "cam/switch/training_data_upload/state".into(),
            person_detection: "homeassistant/binary_sensor/person_detection/state".into(),
            confidence: "homeassistant/sensor/detection_confidence/state".into(),
        })
    }

    #[test]
    fn routes_switches_and_images() {
        let router = router();
        assert_eq!(
            router.route("cam/switch/person_detection/state", b"OFF"),
            Some(InboundMessage::DetectionToggle(false))
        );
        assert_eq!(
            router.route("cam/switch/training_data_upload/state", b"On"),
            Some(InboundMessage::UploadToggle(true))
        );
        assert_eq!(
            router.route("esp32/cam/image", b"/9j/4AAQ"),
            Some(InboundMessage::Image(b"/9j/4AAQ".to_vec()))
        );
        assert_eq!(router.route("some/other/topic", b"on"), None);
        assert_eq!(router.subscriptions().len(), 3);
    }

    #[test]
    fn switch_state_is_strict_about_on() {
        assert!(switch_state(b"on"));
        assert!(switch_state(b" ON\n"));
        assert!(!switch_state(b"off"));
        assert!(!switch_state(b"true"));
        assert!(!switch_state(b""));
    }

    #[test]
    fn decodes_base64_jpeg() {
        let decoded = decode_image_payload(b"/9j/4AAQ\n").unwrap();
        assert_eq!(decoded, vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]);
    }

    #[test]
    fn decodes_line_wrapped_base64() {
        let expected = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        assert_eq!(decode_image_payload(b"/9j/\n4AAQ").unwrap(), expected);
        assert_eq!(decode_image_payload(b"/9j/\r\n4A AQ\r\n").unwrap(), expected);
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let err = decode_image_payload(b"not base64 !!").unwrap_err();
        assert!(matches!(err, BridgeError::Decode { .. }));
        assert!(decode_image_payload(b"   ").is_err());
    }
}
