//! Typed error hierarchy for the retrai engine.
//!
//! Errors split by where they surface:
//! - `OrchestratorError`: rejected synchronously at the API boundary
//! - `NodeError`: fatal to a single run, reported on its event stream
//! - `ToolError`, `ProviderError`, `GoalError`: raised by external collaborators
//! - `CheckpointError`: suspend/resume storage failures

use thiserror::Error;

/// Broad classification of an [`OrchestratorError`], used by the transport
/// layer to choose a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad goal name, invalid iteration bound, malformed resume decision.
    Configuration,
    /// Resume on an unknown, non-suspended or already-resuming run.
    SuspensionProtocol,
    /// Broken invariant inside the engine.
    Internal,
}

/// Errors returned directly from `Orchestrator` calls.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown goal '{name}'. Available: {available}")]
    InvalidGoal { name: String, available: String },

    #[error("Invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid resume decision '{0}'. Expected 'approve' or 'abort'")]
    InvalidDecision(String),

    #[error("Run {0} not found")]
    NoSuchRun(String),

    #[error("Run {run_id} is not suspended (status: {status})")]
    NotSuspended { run_id: String, status: String },

    #[error("Run {0} is already being resumed")]
    AlreadyResuming(String),

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Stable, machine-readable reason string.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidGoal { .. } => "invalid_goal",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidDecision(_) => "invalid_decision",
            Self::NoSuchRun(_) => "no_such_run",
            Self::NotSuspended { .. } => "not_suspended",
            Self::AlreadyResuming(_) => "already_resuming",
            Self::Internal(_) => "internal",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidGoal { .. } | Self::InvalidConfig(_) | Self::InvalidDecision(_) => {
                ErrorClass::Configuration
            }
            Self::NoSuchRun(_) | Self::NotSuspended { .. } | Self::AlreadyResuming(_) => {
                ErrorClass::SuspensionProtocol
            }
            Self::Internal(_) => ErrorClass::Internal,
        }
    }
}

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("No checkpoint for run {0}")]
    NoCheckpoint(String),

    #[error("Checkpoint for run {0} is already claimed by another resume")]
    AlreadyResuming(String),

    #[error("Run {0} already has a live checkpoint")]
    AlreadyCheckpointed(String),

    #[error("Checkpoint storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Errors from the tool registry.
///
/// `UnknownTool` and `Execution` are recovered into a failed tool-result
/// turn; only `Fatal` terminates the run.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool {tool} failed: {message}")]
    Execution { tool: String, message: String },

    #[error("Tool registry failure: {0}")]
    Fatal(String),
}

impl ToolError {
    pub fn execution(tool: &str, message: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

/// Errors from the model-completion provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider is not configured: {0}")]
    NotConfigured(String),

    #[error("Provider request failed: {0}")]
    Transport(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

/// Errors raised by a goal strategy itself (not "goal not achieved").
#[derive(Debug, Error)]
pub enum GoalError {
    #[error("Goal '{goal}' misconfigured: {message}")]
    Misconfigured { goal: String, message: String },

    #[error("Goal '{goal}' check failed: {message}")]
    CheckFailed { goal: String, message: String },
}

/// Unrecoverable failure inside a node; terminates the run as `failed`.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Goal(#[from] GoalError),

    #[error(transparent)]
    Tool(ToolError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_stable_strings() {
        let err = OrchestratorError::InvalidGoal {
            name: "nope".into(),
            available: "pytest".into(),
        };
        assert_eq!(err.reason(), "invalid_goal");
        assert_eq!(OrchestratorError::NoSuchRun("r".into()).reason(), "no_such_run");
        assert_eq!(
            OrchestratorError::AlreadyResuming("r".into()).reason(),
            "already_resuming"
        );
    }

    #[test]
    fn classes_follow_taxonomy() {
        assert_eq!(
            OrchestratorError::InvalidConfig("max_iterations".into()).class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            OrchestratorError::InvalidDecision("maybe".into()).class(),
            ErrorClass::Configuration
        );
        let err = OrchestratorError::NotSuspended {
            run_id: "r".into(),
            status: "running".into(),
        };
        assert_eq!(err.class(), ErrorClass::SuspensionProtocol);
        assert_eq!(
            OrchestratorError::Internal("x".into()).class(),
            ErrorClass::Internal
        );
    }

    #[test]
    fn invalid_goal_lists_available_goals() {
        let err = OrchestratorError::InvalidGoal {
            name: "nope".into(),
            available: "pytest, cargo-test".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("nope"));
        assert!(msg.contains("cargo-test"));
    }

    #[test]
    fn node_error_wraps_provider_error() {
        let err: NodeError = ProviderError::Transport("connection refused".into()).into();
        match &err {
            NodeError::Provider(ProviderError::Transport(msg)) => {
                assert_eq!(msg, "connection refused");
            }
            _ => panic!("Expected Provider variant"),
        }
    }

    #[test]
    fn tool_execution_helper_carries_tool_name() {
        let err = ToolError::execution("file_read", "not found");
        assert_eq!(err.to_string(), "Tool file_read failed: not found");
    }
}
