pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod events;
pub mod goals;
pub mod logging;
pub mod orchestrator;
pub mod provider;
pub mod server;
pub mod tools;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::RunConfig;
pub use errors::OrchestratorError;
pub use orchestrator::{Decision, Orchestrator, Run, RunStatus};
