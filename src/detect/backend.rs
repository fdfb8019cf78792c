use crate::detect::result::DetectionResult;
use crate::error::BridgeError;

/// Inference backend trait.
///
/// Turns encoded image bytes (JPEG as delivered by the camera) into a
/// [`DetectionResult`]. Implementations report failures through
/// [`BridgeError`]; the [`FallbackClassifier`](crate::detect::FallbackClassifier)
/// turns those into a simulated result so nothing reaches the controller.
///
/// How `person_detected` relates to `confidence` is backend-specific and
/// must not be normalised here.
pub trait InferenceBackend: Send {
    /// Backend identifier used in logs.
    fn name(&self) -> &'static str;

    /// Classify one image.
    fn classify(&mut self, image: &[u8]) -> Result<DetectionResult, BridgeError>;

    /// Optional startup check. A failure here is fatal for the process.
    fn warm_up(&mut self) -> Result<(), BridgeError> {
        Ok(())
    }
}
