//! Network plumbing shared by sources, backends and sinks.
//!
//! - HTTP: one `ureq` agent per component with a bounded timeout
//! - MQTT: endpoint/TLS resolution and a session that forwards inbound
//!   publishes to a single consumer over a channel

pub mod mqtt;
mod tls;

use std::time::Duration;

use url::Url;

use crate::error::BridgeError;

pub use mqtt::{client_id, MqttSession, INBOX_CAPACITY};
pub use tls::{parse_mqtt_endpoint, MqttEndpoint};

/// HTTP agent whose every request is bounded by `timeout`.
pub fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent(concat!("person-detector/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Join a relative path onto an API base URL, keeping the base path.
pub fn join_api_url(base: &str, path: &str) -> Result<String, BridgeError> {
    let mut url = Url::parse(base.trim())
        .map_err(|e| BridgeError::Config(format!("invalid API url '{}': {}", base, e)))?;
    if !url.path().ends_with('/') {
        let with_slash = format!("{}/", url.path());
        url.set_path(&with_slash);
    }
    url.join(path)
        .map(|u| u.to_string())
        .map_err(|e| BridgeError::Config(format!("invalid API path '{}': {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_keeps_base_path() {
        assert_eq!(
            join_api_url("http://supervisor/core/api", "states/sensor.x").unwrap(),
            "http://supervisor/core/api/states/sensor.x"
        );
        assert_eq!(
            join_api_url("http://homeassistant.local:8123/api/", "states/binary_sensor.y")
                .unwrap(),
            "http://homeassistant.local:8123/api/states/binary_sensor.y"
        );
    }

    #[test]
    fn join_rejects_garbage_base() {
        assert!(join_api_url("not a url", "states/x").unwrap_err().is_fatal());
    }
}
