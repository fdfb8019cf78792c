//! Person detector bridge.
//!
//! Takes camera images, classifies them for the presence of a person and
//! publishes occupancy plus confidence to Home Assistant.
//!
//! # Pipeline
//!
//! ```text
//! ImageSource / InboundMessage -> FallbackClassifier -> debounce -> StateSink
//! ```
//!
//! # Module Structure
//!
//! - `config`: options file, environment and defaults
//! - `ingest`: camera proxy (pull) and MQTT image topic (push)
//! - `detect`: inference backends and the simulation fallback
//! - `sink`: Home Assistant REST states and MQTT state topics
//! - `transport`: HTTP agent and MQTT session
//! - `controller`: the detection loop and its debounce state

pub mod config;
pub mod controller;
pub mod detect;
pub mod error;
pub mod ingest;
pub mod sink;
pub mod transport;

pub use config::{BackendKind, DetectorConfig, SinkKind, SourceKind};
pub use controller::{ControllerState, ControllerStats, CycleOutcome, DetectionController};
pub use detect::{
    ClassifiedBy, DetectionResult, EdgeImpulseApiBackend, FallbackClassifier, InferenceBackend,
    RunnerBackend, SimulationBackend,
};
pub use error::BridgeError;
pub use ingest::{CameraProxySource, ImageSource, InboundMessage, TopicRouter};
pub use sink::{HomeAssistantSink, MqttStateSink, StateSink, TopicPublisher};
pub use transport::MqttSession;
