//! The run state machine: conversation state, node executors and the router.

pub mod nodes;
pub mod router;
pub mod state;

use std::path::Path;

use crate::provider::ToolSpec;
use state::{Conversation, Turn};

pub use nodes::{NodeContext, execute};
pub use router::{Node, Transition, route};
pub use state::{AgentState, CONTEXT_WINDOW};

const KICKOFF: &str = "Begin working towards the goal. Start by exploring the project \
                       structure, then run the check to see where things stand.";

/// The run's system instructions, placed once as the first turn.
pub fn build_system_prompt(
    goal_prompt: &str,
    cwd: &Path,
    max_iterations: u32,
    tools: &[ToolSpec],
) -> String {
    let tool_lines: String = tools
        .iter()
        .map(|t| format!("- `{}`: {}\n", t.name, t.description))
        .collect();
    format!(
        "You are retrAI, an autonomous software agent.\n\n\
         Project directory: {}\n\
         Max iterations: {}\n\n\
         ## Goal\n{}\n\n\
         ## Available Tools\n{}\n\
         Always think step-by-step. Be methodical and precise.",
        cwd.display(),
        max_iterations,
        goal_prompt.trim_end(),
        tool_lines
    )
}

/// System turn followed by the kickoff user turn.
pub fn initial_conversation(system_prompt: String) -> Conversation {
    let mut conversation = Conversation::new();
    conversation.push(Turn::system(system_prompt));
    conversation.push(Turn::user(KICKOFF));
    conversation
}
