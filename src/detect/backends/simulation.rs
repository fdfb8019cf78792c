use crate::detect::backend::InferenceBackend;
use crate::detect::result::DetectionResult;
use crate::error::BridgeError;

/// Number of leading image bytes folded into the simulated score.
const SCORE_PREFIX_BYTES: usize = 20;
/// Scores below this count as a detection (roughly 30% of images).
const DETECTION_CUTOFF: u32 = 30;

/// Deterministic stand-in for a real model.
///
/// Used when no inference credential is configured and as the per-cycle
/// fallback when the primary backend fails. The same bytes always produce
/// the same result.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimulationBackend;

impl SimulationBackend {
    pub fn new() -> Self {
        Self
    }

    /// Infallible classification, shared with the fallback path.
    pub fn simulate(&self, image: &[u8]) -> DetectionResult {
        let score = simulated_score(image);
        if score < DETECTION_CUTOFF {
            DetectionResult::new(true, 0.5 + (score as f64 / 100.0) * 0.5)
        } else {
            DetectionResult::new(false, 0.0)
        }
    }
}

/// Pseudo-score in `0..100` accumulated over the first 20 bytes.
pub fn simulated_score(image: &[u8]) -> u32 {
    image
        .iter()
        .take(SCORE_PREFIX_BYTES)
        .fold(0u32, |acc, &b| (acc * 31 + b as u32) % 100)
}

impl InferenceBackend for SimulationBackend {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn classify(&mut self, image: &[u8]) -> Result<DetectionResult, BridgeError> {
        Ok(self.simulate(image))
    }
}
