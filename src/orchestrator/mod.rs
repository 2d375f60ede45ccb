//! Run lifecycle: start, suspend/resume, and the per-run driver task.
//!
//! The [`Orchestrator`] is the only component callers touch. Each run is
//! driven by one spawned task at a time; suspension ends that task after
//! checkpointing and `resume` spawns a fresh one from the checkpoint.

mod registry;
mod runner;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::agent::{self, AgentState};
use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::config::RunConfig;
use crate::errors::{CheckpointError, OrchestratorError};
use crate::events::{AgentEvent, EventBus, RunEvents, Subscription};
use crate::goals::GoalRegistry;
use crate::provider::CompletionProvider;
use crate::tools::{BuiltinTools, ToolRegistry};
use registry::RunRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Suspended,
    Achieved,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Achieved => "achieved",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Achieved | Self::Failed | Self::Aborted)
    }

    /// Terminal or suspended: no driver task is running.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || *self == Self::Suspended
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "suspended" => Ok(Self::Suspended),
            "achieved" => Ok(Self::Achieved),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

pub fn is_valid_transition(from: RunStatus, to: RunStatus) -> bool {
    matches!(
        (from, to),
        (RunStatus::Pending, RunStatus::Running)
            | (RunStatus::Pending, RunStatus::Failed)
            | (RunStatus::Running, RunStatus::Suspended)
            | (RunStatus::Running, RunStatus::Achieved)
            | (RunStatus::Running, RunStatus::Failed)
            | (RunStatus::Suspended, RunStatus::Running)
            | (RunStatus::Suspended, RunStatus::Aborted)
            | (RunStatus::Suspended, RunStatus::Failed)
    )
}

/// A human's answer at a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Abort,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Abort => "abort",
        }
    }
}

impl FromStr for Decision {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "abort" => Ok(Self::Abort),
            _ => Err(OrchestratorError::InvalidDecision(s.to_string())),
        }
    }
}

/// Outcome summary, present once a run is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalState {
    pub iteration: u32,
    pub achieved: bool,
    pub reason: String,
}

/// Snapshot of one run as seen by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub goal: String,
    pub cwd: PathBuf,
    pub model: String,
    pub max_iterations: u32,
    pub hitl_enabled: bool,
    pub status: RunStatus,
    pub iteration: u32,
    pub goal_reason: String,
    pub error: Option<String>,
    pub final_state: Option<FinalState>,
    pub created_at: DateTime<Utc>,
}

impl Run {
    pub(crate) fn new(
        run_id: &str,
        goal: &str,
        cwd: PathBuf,
        model: &str,
        max_iterations: u32,
        hitl_enabled: bool,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            goal: goal.to_string(),
            cwd,
            model: model.to_string(),
            max_iterations,
            hitl_enabled,
            status: RunStatus::Pending,
            iteration: 0,
            goal_reason: String::new(),
            error: None,
            final_state: None,
            created_at: Utc::now(),
        }
    }
}

pub(crate) struct Shared {
    pub(crate) registry: RunRegistry,
    pub(crate) bus: EventBus,
    pub(crate) goals: GoalRegistry,
    pub(crate) checkpoints: Arc<dyn CheckpointStore>,
    pub(crate) provider: Arc<dyn CompletionProvider>,
    pub(crate) tools: Arc<dyn ToolRegistry>,
}

/// Builder for [`Orchestrator`]; everything but the provider has a default.
pub struct OrchestratorBuilder {
    provider: Arc<dyn CompletionProvider>,
    bus: Option<EventBus>,
    goals: Option<GoalRegistry>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    tools: Option<Arc<dyn ToolRegistry>>,
}

impl OrchestratorBuilder {
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn goals(mut self, goals: GoalRegistry) -> Self {
        self.goals = Some(goals);
        self
    }

    pub fn checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn tools(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            shared: Arc::new(Shared {
                registry: RunRegistry::new(),
                bus: self.bus.unwrap_or_else(EventBus::new),
                goals: self.goals.unwrap_or_else(GoalRegistry::with_defaults),
                checkpoints: self
                    .checkpoints
                    .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new())),
                provider: self.provider,
                tools: self.tools.unwrap_or_else(|| Arc::new(BuiltinTools::new())),
            }),
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn builder(provider: Arc<dyn CompletionProvider>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            provider,
            bus: None,
            goals: None,
            checkpoints: None,
            tools: None,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn goals(&self) -> &GoalRegistry {
        &self.shared.goals
    }

    /// Subscribe to one run's events (or all runs with `None`).
    pub fn subscribe(&self, run_id: Option<&str>) -> Subscription {
        self.shared.bus.subscribe(run_id)
    }

    /// Validate `config`, register the run as `running` and spawn its
    /// driver. Returns as soon as the run is registered.
    pub fn start(&self, config: RunConfig) -> Result<String, OrchestratorError> {
        let goal = self
            .shared
            .goals
            .get(&config.goal)
            .ok_or_else(|| OrchestratorError::InvalidGoal {
                name: config.goal.clone(),
                available: self.shared.goals.names().join(", "),
            })?;
        let config = config.validate()?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let mut state = AgentState::new(
            &run_id,
            &config.goal,
            config.cwd.clone(),
            &config.model,
            config.max_iterations,
            config.hitl_enabled,
        );
        let system_prompt = agent::build_system_prompt(
            &goal.system_prompt(&config.cwd),
            &config.cwd,
            config.max_iterations,
            &self.shared.tools.catalogue(),
        );
        state.conversation = agent::initial_conversation(system_prompt);

        self.shared.registry.insert(Run::new(
            &run_id,
            &config.goal,
            config.cwd.clone(),
            &config.model,
            config.max_iterations,
            config.hitl_enabled,
        ));
        self.shared
            .registry
            .transition(&run_id, RunStatus::Running, |_| {})?;

        info!(
            run_id = %run_id,
            goal = %config.goal,
            cwd = %config.cwd.display(),
            max_iterations = config.max_iterations,
            hitl = config.hitl_enabled,
            "Run started"
        );
        runner::spawn(Arc::clone(&self.shared), goal, state, agent::Node::Plan);
        Ok(run_id)
    }

    /// Continue (`approve`) or terminate (`abort`) a suspended run.
    pub async fn resume(&self, run_id: &str, decision: Decision) -> Result<(), OrchestratorError> {
        let shared = &self.shared;
        let status = shared
            .registry
            .status(run_id)
            .ok_or_else(|| OrchestratorError::NoSuchRun(run_id.to_string()))?;
        if status != RunStatus::Suspended {
            return Err(OrchestratorError::NotSuspended {
                run_id: run_id.to_string(),
                status: status.to_string(),
            });
        }

        let checkpoint = match shared.checkpoints.load(run_id).await {
            Ok(checkpoint) => checkpoint,
            Err(CheckpointError::AlreadyResuming(_)) => {
                return Err(OrchestratorError::AlreadyResuming(run_id.to_string()));
            }
            Err(CheckpointError::NoCheckpoint(_)) => {
                return Err(self.missing_checkpoint(run_id));
            }
            Err(e) => {
                // a failed load may leave the checkpoint claimed
                let message = format!("checkpoint of run {} could not be loaded: {:#}", run_id, e);
                error!(run_id, error = %e, "Failed to load checkpoint");
                self.discard_checkpoint(run_id).await;
                runner::fail_run(shared, run_id, &message);
                return Err(OrchestratorError::Internal(message));
            }
        };

        let goal = match shared.goals.get(&checkpoint.state.goal) {
            Some(goal) => goal,
            None => {
                let message = format!(
                    "goal '{}' of run {} is no longer registered",
                    checkpoint.state.goal, run_id
                );
                error!(run_id, "{}", message);
                self.discard_checkpoint(run_id).await;
                runner::fail_run(shared, run_id, &message);
                return Err(OrchestratorError::Internal(message));
            }
        };

        let state = checkpoint.state;
        let events = RunEvents::new(shared.bus.clone(), run_id);
        match decision {
            Decision::Approve => {
                shared
                    .registry
                    .transition(run_id, RunStatus::Running, |_| {})?;
                self.discard_checkpoint(run_id).await;
                events.emit(AgentEvent::human_check_response(
                    run_id,
                    state.iteration,
                    decision.as_str(),
                ));
                info!(run_id, iteration = state.iteration, "Run approved, resuming");
                runner::spawn(Arc::clone(shared), goal, state, checkpoint.resume_at);
            }
            Decision::Abort => {
                let reason = "Aborted by human".to_string();
                let final_state = FinalState {
                    iteration: state.iteration,
                    achieved: false,
                    reason: reason.clone(),
                };
                shared
                    .registry
                    .transition(run_id, RunStatus::Aborted, |run| {
                        run.final_state = Some(final_state);
                    })?;
                self.discard_checkpoint(run_id).await;
                events.emit(AgentEvent::human_check_response(
                    run_id,
                    state.iteration,
                    decision.as_str(),
                ));
                events.emit(AgentEvent::run_end(
                    run_id,
                    state.iteration,
                    RunStatus::Aborted.as_str(),
                    &reason,
                ));
                info!(run_id, iteration = state.iteration, "Run aborted");
            }
        }
        Ok(())
    }

    pub fn get(&self, run_id: &str) -> Result<Run, OrchestratorError> {
        self.shared
            .registry
            .get(run_id)
            .ok_or_else(|| OrchestratorError::NoSuchRun(run_id.to_string()))
    }

    /// All runs, oldest first.
    pub fn list(&self) -> Vec<Run> {
        self.shared.registry.list()
    }

    /// Wait until the run is suspended or terminal and return its snapshot.
    pub async fn settled(&self, run_id: &str) -> Result<Run, OrchestratorError> {
        let mut rx = self
            .shared
            .registry
            .watch(run_id)
            .ok_or_else(|| OrchestratorError::NoSuchRun(run_id.to_string()))?;
        rx.wait_for(|status| status.is_settled())
            .await
            .map_err(|_| OrchestratorError::Internal(format!("run {} vanished", run_id)))?;
        self.get(run_id)
    }

    async fn discard_checkpoint(&self, run_id: &str) {
        if let Err(e) = self.shared.checkpoints.invalidate(run_id).await {
            warn!(run_id, error = %e, "Failed to invalidate consumed checkpoint");
        }
    }

    /// A suspended-looking run had no checkpoint: either a concurrent resume
    /// already consumed it, or the invariant is broken.
    fn missing_checkpoint(&self, run_id: &str) -> OrchestratorError {
        match self.shared.registry.status(run_id) {
            None => OrchestratorError::NoSuchRun(run_id.to_string()),
            Some(status) if status != RunStatus::Suspended => OrchestratorError::NotSuspended {
                run_id: run_id.to_string(),
                status: status.to_string(),
            },
            Some(_) => {
                let message = format!("run {} is suspended but has no checkpoint", run_id);
                error!(run_id, "{}", message);
                runner::fail_run(&self.shared, run_id, &message);
                OrchestratorError::Internal(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Suspended,
            RunStatus::Achieved,
            RunStatus::Failed,
            RunStatus::Aborted,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("done".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_terminal_and_settled() {
        assert!(RunStatus::Achieved.is_terminal());
        assert!(!RunStatus::Suspended.is_terminal());
        assert!(RunStatus::Suspended.is_settled());
        assert!(!RunStatus::Running.is_settled());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(is_valid_transition(RunStatus::Running, RunStatus::Suspended));
        assert!(is_valid_transition(RunStatus::Suspended, RunStatus::Running));
        assert!(is_valid_transition(RunStatus::Suspended, RunStatus::Aborted));
        assert!(!is_valid_transition(RunStatus::Running, RunStatus::Aborted));
        assert!(!is_valid_transition(RunStatus::Aborted, RunStatus::Running));
        assert!(!is_valid_transition(RunStatus::Achieved, RunStatus::Failed));
    }

    #[test]
    fn test_decision_parsing() {
        assert_eq!("approve".parse::<Decision>().unwrap(), Decision::Approve);
        assert_eq!(" ABORT ".parse::<Decision>().unwrap(), Decision::Abort);
        let err = "maybe".parse::<Decision>().unwrap_err();
        assert_eq!(err.reason(), "invalid_decision");
    }

    #[test]
    fn test_run_serializes_status_lowercase() {
        let run = Run::new("r", "pytest", PathBuf::from("/w"), "m", 3, true);
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["status"], "pending");
        assert!(value["final_state"].is_null());
    }
}
