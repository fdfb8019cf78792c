pub mod edge_api;
pub mod runner;
pub mod simulation;

pub use edge_api::{person_confidence, EdgeImpulseApiBackend};
pub use runner::{parse_runner_output, RunnerBackend};
pub use simulation::{simulated_score, SimulationBackend};
