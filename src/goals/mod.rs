//! Goal strategies: pluggable success criteria plus the instructions the
//! model works from.
//!
//! A strategy's `check` runs at every `evaluate` node and is authoritative.
//! A failing check command is a *not achieved* result; [`GoalError`] is only
//! for faults in the strategy itself.

pub mod command;
pub mod detector;
pub mod shell;
pub mod sql;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::state::AgentState;
use crate::errors::GoalError;

pub use command::{AiEvalGoal, CommandGoal};
pub use detector::detect_goal;
pub use shell::{PerfCheckGoal, ShellGoal};
pub use sql::SqlBenchmarkGoal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalResult {
    pub achieved: bool,
    pub reason: String,
    #[serde(default)]
    pub details: Value,
}

impl GoalResult {
    pub fn achieved(reason: impl Into<String>, details: Value) -> Self {
        Self {
            achieved: true,
            reason: reason.into(),
            details,
        }
    }

    pub fn not_achieved(reason: impl Into<String>, details: Value) -> Self {
        Self {
            achieved: false,
            reason: reason.into(),
            details,
        }
    }
}

#[async_trait]
pub trait GoalStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Decide whether the goal holds for the project at `cwd`.
    async fn check(&self, state: &AgentState, cwd: &Path) -> Result<GoalResult, GoalError>;

    /// Goal-specific instructions, placed in the run's system turn.
    fn system_prompt(&self, cwd: &Path) -> String;
}

/// Name → strategy lookup used by `start`.
#[derive(Clone, Default)]
pub struct GoalRegistry {
    goals: BTreeMap<String, Arc<dyn GoalStrategy>>,
}

impl GoalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every builtin goal.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for goal in command::presets() {
            registry.register(Arc::new(goal));
        }
        registry.register(Arc::new(ShellGoal));
        registry.register(Arc::new(PerfCheckGoal));
        registry.register(Arc::new(SqlBenchmarkGoal));
        registry.register(Arc::new(AiEvalGoal::new()));
        registry
    }

    /// Add or replace a strategy under its own name.
    pub fn register(&mut self, goal: Arc<dyn GoalStrategy>) {
        self.goals.insert(goal.name().to_string(), goal);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GoalStrategy>> {
        self.goals.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.goals.contains_key(name)
    }

    /// Sorted goal names.
    pub fn names(&self) -> Vec<String> {
        self.goals.keys().cloned().collect()
    }
}

impl std::fmt::Debug for GoalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalRegistry")
            .field("goals", &self.names())
            .finish()
    }
}
