pub mod orchestrator;
pub mod progress;
pub mod runner;

pub use orchestrator::*;
pub use progress::*;
pub use runner::*;
