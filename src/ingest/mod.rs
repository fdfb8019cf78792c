//! Image sources.
//!
//! - Pull: [`CameraProxySource`] requests a snapshot on every controller tick
//! - Push: images arrive on an MQTT topic and reach the controller as
//!   [`InboundMessage`]s over a channel (see [`push`])
//!
//! A source never fails the cycle: transport and decode problems are logged
//! and surface as "no image".

pub mod camera_proxy;
pub mod push;

pub use camera_proxy::CameraProxySource;
pub use push::{decode_image_payload, switch_state, InboundMessage, TopicRouter};

/// Pull-mode image source.
pub trait ImageSource {
    /// Source identifier used in logs.
    fn name(&self) -> &'static str;

    /// Fetch the next image, or `None` when nothing could be obtained.
    fn fetch(&mut self) -> Option<Vec<u8>>;
}
