// Scheduling and lifecycle engine for query jobs

pub mod engine;
pub mod runner;
pub mod shutdown;

pub use engine::{ShutdownOutcome, Supervisor};
pub use runner::{JobRunner, RunnerState};
pub use shutdown::ShutdownController;
