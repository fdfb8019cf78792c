//! MQTT endpoint parsing and TLS transport selection.
//!
//! Mirrors Home Assistant's MQTT broker options:
//! - `mqtt_broker` may be a bare host (`core-mosquitto`), `host:port`, or a
//!   URL with an `mqtt://`, `tcp://`, `mqtts://` or `ssl://` scheme
//! - TLS trusts the webpki roots unless a PEM CA file is given

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::Path;

use crate::config::MqttSettings;

/// Resolved broker address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    /// Resolve from settings. An explicit port or scheme in `broker` wins
    /// over `port` / `use_tls`.
    pub fn from_settings(settings: &MqttSettings) -> Result<Self> {
        let broker = settings.broker.trim();
        let has_scheme = broker.contains("://");
        let has_port = broker.starts_with('[') || broker.rsplit_once(':').is_some();
        if has_scheme || has_port {
            if has_scheme && !has_port_after_scheme(broker) {
                let endpoint = parse_mqtt_endpoint(
                    &format!("{}:{}", broker, settings.port),
                    settings.use_tls,
                )?;
                return Ok(endpoint);
            }
            return parse_mqtt_endpoint(broker, settings.use_tls);
        }
        if broker.is_empty() {
            return Err(anyhow!("MQTT broker host must not be empty"));
        }
        Ok(Self {
            host: broker.to_string(),
            port: settings.port,
            use_tls: settings.use_tls,
        })
    }

    /// Build the rumqttc transport for this endpoint.
    pub fn transport(&self, ca_path: Option<&Path>) -> Result<Transport> {
        if !self.use_tls {
            if ca_path.is_some() {
                return Err(anyhow!(
                    "MQTT TLS CA provided but TLS is disabled; set mqtt_use_tls or use an mqtts:// broker"
                ));
            }
            return Ok(Transport::tcp());
        }
        match ca_path {
            Some(path) => {
                let ca = std::fs::read(path)
                    .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))?;
                Ok(Transport::tls(ca, None, None))
            }
            None => Ok(Transport::tls_with_default_config()),
        }
    }
}

fn has_port_after_scheme(addr: &str) -> bool {
    addr.split_once("://")
        .map(|(_, rest)| rest.starts_with('[') || rest.contains(':'))
        .unwrap_or(false)
}

/// Parse an MQTT address with an explicit port.
///
/// Supports `host:port`, `[ipv6]:port` and the `mqtt://`, `tcp://`,
/// `mqtts://`, `ssl://` schemes.
pub fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid MQTT port in {}", addr))?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))?;
    Ok((host.to_string(), port))
}
