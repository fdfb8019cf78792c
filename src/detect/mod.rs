mod backend;
pub mod backends;
mod fallback;
mod result;

pub use backend::InferenceBackend;
pub use backends::{
    parse_runner_output, person_confidence, simulated_score, EdgeImpulseApiBackend, RunnerBackend,
    SimulationBackend,
};
pub use fallback::{ClassifiedBy, FallbackClassifier};
pub use result::DetectionResult;
