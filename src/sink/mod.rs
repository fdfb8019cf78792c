//! Result egress.
//!
//! A sink publishes two values per result: the binary occupancy state and
//! the confidence percentage. Publishing is best-effort: failures and
//! missing credentials are logged, never returned.

pub mod home_assistant;
pub mod mqtt;

pub use home_assistant::{binary_state_payload, confidence_state_payload, HomeAssistantSink};
pub use mqtt::{occupancy_payload, MqttStateSink, TopicPublisher};

use crate::detect::DetectionResult;

pub trait StateSink {
    /// Sink identifier used in logs.
    fn name(&self) -> &'static str;

    /// Publish occupancy and confidence for one result.
    fn publish(&mut self, result: &DetectionResult);
}
