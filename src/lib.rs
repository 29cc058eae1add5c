pub mod driver;
pub mod error;
pub mod report;
pub mod runner;
pub mod utils;

// Re-export common items
pub use error::LifecycleError;
pub use runner::{run_step, Orchestrator, ScenarioContext, ScenarioMeta, ScenarioOutcome, StepStatus};
pub use utils::Config;
