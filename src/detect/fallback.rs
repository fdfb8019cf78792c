use crate::detect::backend::InferenceBackend;
use crate::detect::backends::SimulationBackend;
use crate::detect::result::DetectionResult;
use crate::error::BridgeError;

/// Primary backend with per-cycle simulation fallback.
///
/// Without a primary every image goes to the simulation. With one, any
/// primary error yields the simulated result for that image only; the
/// primary is tried again on the next image.
pub struct FallbackClassifier {
    primary: Option<Box<dyn InferenceBackend>>,
    simulation: SimulationBackend,
    fallbacks: u64,
}

/// Which path produced a classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassifiedBy {
    Primary,
    Fallback,
    Simulation,
}

impl FallbackClassifier {
    pub fn new(primary: Option<Box<dyn InferenceBackend>>) -> Self {
        Self {
            primary,
            simulation: SimulationBackend::new(),
            fallbacks: 0,
        }
    }

    pub fn with_primary<B: InferenceBackend + 'static>(backend: B) -> Self {
        Self::new(Some(Box::new(backend)))
    }

    pub fn simulation_only() -> Self {
        Self::new(None)
    }

    /// Name of the backend tried first.
    pub fn primary_name(&self) -> &'static str {
        self.primary
            .as_ref()
            .map(|b| b.name())
            .unwrap_or("simulation")
    }

    /// Number of cycles that fell back to simulation so far.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks
    }

    /// Classify one image. Never fails.
    pub fn classify(&mut self, image: &[u8]) -> (DetectionResult, ClassifiedBy) {
        let Some(primary) = self.primary.as_mut() else {
            return (self.simulation.simulate(image), ClassifiedBy::Simulation);
        };
        match primary.classify(image) {
            Ok(result) => (result, ClassifiedBy::Primary),
            Err(e) => {
                self.fallbacks += 1;
                log::error!(
                    "{} detection failed: {}, falling back to simulation",
                    primary.name(),
                    e
                );
                (self.simulation.simulate(image), ClassifiedBy::Fallback)
            }
        }
    }

    /// Run the primary's startup check, if any.
    pub fn warm_up(&mut self) -> Result<(), BridgeError> {
        match self.primary.as_mut() {
            Some(primary) => primary.warm_up(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyBackend {
        calls: u32,
    }

    impl InferenceBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn classify(&mut self, _image: &[u8]) -> Result<DetectionResult, BridgeError> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                Err(BridgeError::transport("http://api", "connection reset"))
            } else {
                Ok(DetectionResult::new(true, 0.9))
            }
        }
    }

    #[test]
    fn error_falls_back_for_that_cycle_only() {
        let image = [1u8, 2, 3];
        let mut classifier = FallbackClassifier::with_primary(FlakyBackend { calls: 0 });

        let (first, by) = classifier.classify(&image);
        assert_eq!(by, ClassifiedBy::Fallback);
        assert_eq!(first, SimulationBackend::new().simulate(&image));

        let (second, by) = classifier.classify(&image);
        assert_eq!(by, ClassifiedBy::Primary);
        assert_eq!(second, DetectionResult::new(true, 0.9));

        assert_eq!(classifier.fallback_count(), 1);
    }

    #[test]
    fn no_primary_uses_simulation() {
        let mut classifier = FallbackClassifier::simulation_only();
        assert_eq!(classifier.primary_name(), "simulation");
        let (result, by) = classifier.classify(&[40]);
        assert_eq!(by, ClassifiedBy::Simulation);
        assert!(!result.person_detected);
        assert_eq!(classifier.fallback_count(), 0);
    }
}
