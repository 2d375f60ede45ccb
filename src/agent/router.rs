use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::state::AgentState;
use crate::orchestrator::RunStatus;

/// Nodes of the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Plan,
    Act,
    Evaluate,
    HumanCheck,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Act => "act",
            Self::Evaluate => "evaluate",
            Self::HumanCheck => "human_check",
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Node {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Self::Plan),
            "act" => Ok(Self::Act),
            "evaluate" => Ok(Self::Evaluate),
            "human_check" => Ok(Self::HumanCheck),
            _ => Err(format!("Invalid node: {}", s)),
        }
    }
}

/// What the driver does after a node returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Goto(Node),
    /// Checkpoint the state and hand control back; resume restarts at `Node`.
    Suspend { resume_at: Node },
    Finish(RunStatus),
}

/// Select the next step from the node just executed and the resulting state.
pub fn route(after: Node, state: &AgentState) -> Transition {
    match after {
        Node::Plan => {
            if state.pending_tool_calls.is_empty() {
                Transition::Goto(Node::Evaluate)
            } else {
                Transition::Goto(Node::Act)
            }
        }
        Node::Act => Transition::Goto(Node::Evaluate),
        Node::Evaluate => {
            if state.goal_achieved {
                Transition::Finish(RunStatus::Achieved)
            } else if !state.iterations_remaining() {
                Transition::Finish(RunStatus::Failed)
            } else if state.hitl_enabled {
                Transition::Goto(Node::HumanCheck)
            } else {
                Transition::Goto(Node::Plan)
            }
        }
        Node::HumanCheck => Transition::Suspend {
            resume_at: Node::Plan,
        },
    }
}
