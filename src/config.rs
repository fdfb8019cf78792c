use anyhow::{anyhow, Context, Result};
use serde::{de, Deserialize, Deserializer};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/data/options.json";
const DEFAULT_CAMERA_ENTITY: &str = "camera.front_door";
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
const DEFAULT_SCAN_INTERVAL_SECS: u64 = 1;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CLASSIFY_URL: &str = "https://api.edgeimpulse.com/v1/classification/classify";
const DEFAULT_MODEL_PATH: &str = "model/model.eim";
const DEFAULT_RUNNER_PATH: &str = "edge-impulse-linux-runner";
const DEFAULT_HA_API_URL: &str = "http://supervisor/core/api";
const DEFAULT_BINARY_SENSOR_ENTITY: &str = "binary_sensor.person_detector";
const DEFAULT_CONFIDENCE_SENSOR_ENTITY: &str = "sensor.person_detector_confidence";
const DEFAULT_MQTT_BROKER: &str = "localhost";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_CONNECT_RETRIES: u32 = 5;
const DEFAULT_IMAGE_TOPIC: &str = "esp32/cam/image";
const DEFAULT_DETECTION_SWITCH_TOPIC: &str = "basement-ai-cam/switch/person_detection/state";
const DEFAULT_UPLOAD_SWITCH_TOPIC: &str = "basement-ai-cam/switch/training_data_upload/state";
const DEFAULT_PERSON_DETECTION_TOPIC: &str = "homeassistant/binary_sensor/person_detection/state";
const DEFAULT_CONFIDENCE_TOPIC: &str = "homeassistant/sensor/detection_confidence/state";

/// On-disk shape of the add-on options file. Every key is optional.
#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    camera_entity: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    confidence_threshold: Option<f64>,
    #[serde(default, deserialize_with = "number_or_string")]
    scan_interval: Option<u64>,
    #[serde(default, deserialize_with = "number_or_string")]
    request_timeout: Option<u64>,
    #[serde(default, deserialize_with = "number_or_string")]
    inference_timeout: Option<u64>,
    source: Option<String>,
    backend: Option<String>,
    sink: Option<String>,
    edge_impulse_api_key: Option<String>,
    classify_url: Option<String>,
    model_path: Option<PathBuf>,
    runner_path: Option<PathBuf>,
    ha_api_url: Option<String>,
    binary_sensor_entity: Option<String>,
    confidence_sensor_entity: Option<String>,
    mqtt_broker: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    mqtt_port: Option<u16>,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    mqtt_use_tls: Option<bool>,
    mqtt_tls_ca_path: Option<PathBuf>,
    #[serde(default, deserialize_with = "number_or_string")]
    mqtt_connect_retries: Option<u32>,
    image_topic: Option<String>,
    detection_switch_topic: Option<String>,
    upload_switch_topic: Option<String>,
    person_detection_topic: Option<String>,
    confidence_topic: Option<String>,
}

/// Where images come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Pull: Home Assistant camera proxy over HTTP.
    CameraProxy,
    /// Push: base64 JPEG payloads on an MQTT topic.
    Mqtt,
}

/// Which inference backend to run first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Remote API when a key is configured, simulation otherwise.
    Auto,
    EdgeImpulseApi,
    Runner,
    Simulation,
}

/// Where results are published.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkKind {
    HomeAssistant,
    Mqtt,
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "camera_proxy" | "camera" | "http" | "pull" => Ok(Self::CameraProxy),
            "mqtt" | "push" => Ok(Self::Mqtt),
            other => Err(anyhow!(
                "unknown image source '{}': expected 'camera_proxy' or 'mqtt'",
                other
            )),
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "edge_impulse_api" | "api" | "remote" => Ok(Self::EdgeImpulseApi),
            "runner" | "local" | "subprocess" => Ok(Self::Runner),
            "simulation" | "stub" => Ok(Self::Simulation),
            other => Err(anyhow!(
                "unknown inference backend '{}': expected 'auto', 'edge_impulse_api', 'runner' or 'simulation'",
                other
            )),
        }
    }
}

impl FromStr for SinkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "home_assistant" | "rest" | "ha" => Ok(Self::HomeAssistant),
            "mqtt" => Ok(Self::Mqtt),
            other => Err(anyhow!(
                "unknown state sink '{}': expected 'home_assistant' or 'mqtt'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EdgeImpulseSettings {
    pub api_key: Option<String>,
    pub classify_url: String,
    pub model_path: PathBuf,
    pub runner_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct HomeAssistantSettings {
    pub api_url: String,
    pub token: Option<String>,
    pub binary_sensor_entity: String,
    pub confidence_sensor_entity: String,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub connect_retries: u32,
}

#[derive(Debug, Clone)]
pub struct TopicSettings {
    pub image: String,
    pub detection_switch: String,
    pub upload_switch: String,
    pub person_detection: String,
    pub confidence: String,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub camera_entity: String,
    pub confidence_threshold: f64,
    pub scan_interval: Duration,
    pub request_timeout: Duration,
    pub inference_timeout: Duration,
    pub source: SourceKind,
    pub backend: BackendKind,
    pub sink: SinkKind,
    pub edge_impulse: EdgeImpulseSettings,
    pub home_assistant: HomeAssistantSettings,
    pub mqtt: MqttSettings,
    pub topics: TopicSettings,
}

impl DetectorConfig {
    /// Load from `$DETECTOR_CONFIG`, or `/data/options.json` when present,
    /// and validate.
    ///
    /// An explicitly named file that cannot be read is an error; a missing
    /// default file only means defaults are used.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::read()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::read_from(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like [`load`](Self::load) but without validation, for callers that
    /// apply overrides first.
    pub fn read() -> Result<Self> {
        match non_empty_env("DETECTOR_CONFIG") {
            Some(path) => Self::read_from(Some(Path::new(&path))),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::read_from(Some(default_path))
                } else {
                    log::warn!(
                        "no configuration file at {}, using environment and defaults",
                        DEFAULT_CONFIG_PATH
                    );
                    Self::read_from(None)
                }
            }
        }
    }

    pub fn read_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => {
                let cfg = read_config_file(path)?;
                log::info!("loaded configuration from {}", path.display());
                cfg
            }
            None => DetectorConfigFile::default(),
        };
        Self::resolve(file_cfg)
    }

    fn resolve(file: DetectorConfigFile) -> Result<Self> {
        let edge_impulse = EdgeImpulseSettings {
            api_key: optional_setting(file.edge_impulse_api_key, "EDGE_IMPULSE_API_KEY"),
            classify_url: string_setting(file.classify_url, "CLASSIFY_URL", DEFAULT_CLASSIFY_URL),
            model_path: path_setting(file.model_path, "MODEL_PATH", DEFAULT_MODEL_PATH),
            runner_path: path_setting(file.runner_path, "RUNNER_PATH", DEFAULT_RUNNER_PATH),
        };
        let home_assistant = HomeAssistantSettings {
            api_url: string_setting(file.ha_api_url, "HA_API_URL", DEFAULT_HA_API_URL),
            token: supervisor_token(),
            binary_sensor_entity: string_setting(
                file.binary_sensor_entity,
                "BINARY_SENSOR_ENTITY",
                DEFAULT_BINARY_SENSOR_ENTITY,
            ),
            confidence_sensor_entity: string_setting(
                file.confidence_sensor_entity,
                "CONFIDENCE_SENSOR_ENTITY",
                DEFAULT_CONFIDENCE_SENSOR_ENTITY,
            ),
        };
        let mqtt = MqttSettings {
            broker: string_setting(file.mqtt_broker, "MQTT_BROKER", DEFAULT_MQTT_BROKER),
            port: parsed_setting(file.mqtt_port, "MQTT_PORT", DEFAULT_MQTT_PORT)?,
            username: optional_setting(file.mqtt_username, "MQTT_USERNAME"),
            password: optional_setting(file.mqtt_password, "MQTT_PASSWORD"),
            use_tls: parsed_setting(file.mqtt_use_tls, "MQTT_USE_TLS", false)?,
            tls_ca_path: file
                .mqtt_tls_ca_path
                .or_else(|| non_empty_env("MQTT_TLS_CA_PATH").map(PathBuf::from)),
            connect_retries: parsed_setting(
                file.mqtt_connect_retries,
                "MQTT_CONNECT_RETRIES",
                DEFAULT_MQTT_CONNECT_RETRIES,
            )?,
        };
        let topics = TopicSettings {
            image: string_setting(file.image_topic, "IMAGE_TOPIC", DEFAULT_IMAGE_TOPIC),
            detection_switch: string_setting(
                file.detection_switch_topic,
                "DETECTION_SWITCH_TOPIC",
                DEFAULT_DETECTION_SWITCH_TOPIC,
            ),
            upload_switch: string_setting(
                file.upload_switch_topic,
                "UPLOAD_SWITCH_TOPIC",
                DEFAULT_UPLOAD_SWITCH_TOPIC,
            ),
            person_detection: string_setting(
                file.person_detection_topic,
                "PERSON_DETECTION_TOPIC",
                DEFAULT_PERSON_DETECTION_TOPIC,
            ),
            confidence: string_setting(
                file.confidence_topic,
                "CONFIDENCE_TOPIC",
                DEFAULT_CONFIDENCE_TOPIC,
            ),
        };

        Ok(Self {
            camera_entity: string_setting(
                file.camera_entity,
                "CAMERA_ENTITY",
                DEFAULT_CAMERA_ENTITY,
            ),
            confidence_threshold: parsed_setting(
                file.confidence_threshold,
                "CONFIDENCE_THRESHOLD",
                DEFAULT_CONFIDENCE_THRESHOLD,
            )?,
            scan_interval: Duration::from_secs(parsed_setting(
                file.scan_interval,
                "SCAN_INTERVAL",
                DEFAULT_SCAN_INTERVAL_SECS,
            )?),
            request_timeout: Duration::from_secs(parsed_setting(
                file.request_timeout,
                "REQUEST_TIMEOUT",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            inference_timeout: Duration::from_secs(parsed_setting(
                file.inference_timeout,
                "INFERENCE_TIMEOUT",
                DEFAULT_INFERENCE_TIMEOUT_SECS,
            )?),
            source: kind_setting(file.source, "IMAGE_SOURCE", SourceKind::CameraProxy)?,
            backend: kind_setting(file.backend, "INFERENCE_BACKEND", BackendKind::Auto)?,
            sink: kind_setting(file.sink, "STATE_SINK", SinkKind::HomeAssistant)?,
            edge_impulse,
            home_assistant,
            mqtt,
            topics,
        })
    }

    pub fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold must be within 0.0..=1.0, got {}",
                self.confidence_threshold
            ));
        }
        if self.scan_interval.is_zero() {
            return Err(anyhow!("scan interval must be greater than zero"));
        }
        if self.request_timeout.is_zero() || self.inference_timeout.is_zero() {
            return Err(anyhow!("timeouts must be greater than zero"));
        }
        self.camera_entity = self.camera_entity.trim().to_string();
        if self.camera_entity.is_empty() {
            return Err(anyhow!("camera entity must not be empty"));
        }
        Ok(())
    }

    /// Backend that runs first, after resolving `auto`.
    pub fn effective_backend(&self) -> BackendKind {
        match self.backend {
            BackendKind::Auto if self.edge_impulse.api_key.is_some() => BackendKind::EdgeImpulseApi,
            BackendKind::Auto => BackendKind::Simulation,
            other => other,
        }
    }

    /// Log the effective configuration. Secrets are reported as set/unset only.
    pub fn log_summary(&self) {
        log::info!("Person detector configuration");
        log::info!("  Camera entity: {}", self.camera_entity);
        log::info!("  Confidence threshold: {}", self.confidence_threshold);
        log::info!("  Scan interval: {}s", self.scan_interval.as_secs());
        log::info!(
            "  Source: {:?}, backend: {:?} (effective {:?}), sink: {:?}",
            self.source,
            self.backend,
            self.effective_backend(),
            self.sink
        );
        log::info!(
            "  Edge Impulse API key: {}",
            redacted(self.edge_impulse.api_key.is_some())
        );
        log::info!(
            "  Supervisor token: {}",
            redacted(self.home_assistant.token.is_some())
        );
        if self.source == SourceKind::Mqtt || self.sink == SinkKind::Mqtt {
            log::info!(
                "  MQTT broker: {}:{} (TLS: {}, auth: {})",
                self.mqtt.broker,
                self.mqtt.port,
                self.mqtt.use_tls,
                self.mqtt.username.is_some()
            );
        }
    }
}

fn redacted(present: bool) -> &'static str {
    if present {
        "set"
    } else {
        "unset"
    }
}

fn read_config_file(path: &Path) -> Result<DetectorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString<T> {
    Value(T),
    Text(String),
}

/// Accept `0.7` as well as `"0.7"`; a blank string counts as unset.
fn number_or_string<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match Option::<NumberOrString<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Value(value)) => Ok(Some(value)),
        Some(NumberOrString::Text(raw)) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse()
                .map(Some)
                .map_err(|e| de::Error::custom(format!("invalid value '{}': {}", raw, e)))
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn optional_setting(file_value: Option<String>, env_key: &str) -> Option<String> {
    file_value
        .filter(|v| !v.trim().is_empty())
        .or_else(|| non_empty_env(env_key))
}

fn string_setting(file_value: Option<String>, env_key: &str, default: &str) -> String {
    optional_setting(file_value, env_key).unwrap_or_else(|| default.to_string())
}

fn path_setting(file_value: Option<PathBuf>, env_key: &str, default: &str) -> PathBuf {
    file_value
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| non_empty_env(env_key).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default))
}

fn parsed_setting<T: FromStr>(file_value: Option<T>, env_key: &str, default: T) -> Result<T> {
    if let Some(value) = file_value {
        return Ok(value);
    }
    match non_empty_env(env_key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("{} has an invalid value: '{}'", env_key, raw)),
        None => Ok(default),
    }
}

fn kind_setting<T>(file_value: Option<String>, env_key: &str, default: T) -> Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    match optional_setting(file_value, env_key) {
        Some(raw) => raw.parse(),
        None => Ok(default),
    }
}

fn supervisor_token() -> Option<String> {
    if let Some(token) = non_empty_env("SUPERVISOR_TOKEN") {
        return Some(token);
    }
    let token = non_empty_env("HASSIO_TOKEN");
    if token.is_some() {
        log::info!("found token as HASSIO_TOKEN instead of SUPERVISOR_TOKEN");
    }
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_case_insensitively() {
        assert_eq!("MQTT".parse::<SourceKind>().unwrap(), SourceKind::Mqtt);
        assert_eq!(
            "camera_proxy".parse::<SourceKind>().unwrap(),
            SourceKind::CameraProxy
        );
        assert_eq!("Runner".parse::<BackendKind>().unwrap(), BackendKind::Runner);
        assert_eq!(
            "edge_impulse_api".parse::<BackendKind>().unwrap(),
            BackendKind::EdgeImpulseApi
        );
        assert_eq!("rest".parse::<SinkKind>().unwrap(), SinkKind::HomeAssistant);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = "carrier_pigeon".parse::<SinkKind>().unwrap_err();
        assert!(err.to_string().contains("carrier_pigeon"));
    }

    #[test]
    fn file_value_wins_over_default() {
        let value: u64 = parsed_setting(Some(5), "PERSON_DETECTOR_TEST_UNSET_KEY", 1).unwrap();
        assert_eq!(value, 5);
        let value: u64 = parsed_setting(None, "PERSON_DETECTOR_TEST_UNSET_KEY", 1).unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn quoted_numbers_are_accepted() {
        let file: DetectorConfigFile = serde_json::from_str(
            r#"{
                "confidence_threshold": "0.65",
                "scan_interval": " 5 ",
                "mqtt_port": "1884",
                "mqtt_use_tls": "true",
                "mqtt_connect_retries": 3,
                "request_timeout": ""
            }"#,
        )
        .unwrap();
        assert_eq!(file.confidence_threshold, Some(0.65));
        assert_eq!(file.scan_interval, Some(5));
        assert_eq!(file.mqtt_port, Some(1884));
        assert_eq!(file.mqtt_use_tls, Some(true));
        assert_eq!(file.mqtt_connect_retries, Some(3));
        assert_eq!(file.request_timeout, None);
        assert_eq!(file.inference_timeout, None);
    }

    #[test]
    fn malformed_quoted_number_is_rejected() {
        let err = serde_json::from_str::<DetectorConfigFile>(r#"{ "mqtt_port": "eighteen" }"#)
            .unwrap_err();
        assert!(err.to_string().contains("eighteen"));
    }

    #[test]
    fn blank_file_strings_count_as_unset() {
        assert_eq!(
            optional_setting(Some("  ".into()), "PERSON_DETECTOR_TEST_UNSET_KEY"),
            None
        );
        assert_eq!(
            string_setting(Some(String::new()), "PERSON_DETECTOR_TEST_UNSET_KEY", "fallback"),
            "fallback"
        );
    }
}
