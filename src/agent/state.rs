use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of most recent turns (after the system turn) shown to the provider.
pub const CONTEXT_WINDOW: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// The outcome of executing one [`ToolInvocation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
    pub error: bool,
}

/// One entry in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Tool invocations requested in an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    /// For tool turns: the invocation this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Turn {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            is_error: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolInvocation>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(outcome: &ToolOutcome) -> Self {
        Self {
            tool_call_id: Some(outcome.tool_call_id.clone()),
            name: Some(outcome.name.clone()),
            is_error: outcome.error,
            ..Self::plain(Role::Tool, outcome.content.clone())
        }
    }
}

/// Append-only exchange history for one run.
///
/// The full history is kept for audit and replay; [`Conversation::trimmed`]
/// is the bounded projection handed to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn first(&self) -> Option<&Turn> {
        self.turns.first()
    }

    /// First turn plus the most recent `window` turns of the remainder.
    pub fn trimmed_to(&self, window: usize) -> Vec<Turn> {
        let Some((first, rest)) = self.turns.split_first() else {
            return Vec::new();
        };
        let start = rest.len().saturating_sub(window);
        std::iter::once(first)
            .chain(&rest[start..])
            .cloned()
            .collect()
    }

    pub fn trimmed(&self) -> Vec<Turn> {
        self.trimmed_to(CONTEXT_WINDOW)
    }
}

/// Everything threaded through the nodes of one run; this is what a
/// checkpoint persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub run_id: String,
    pub goal: String,
    pub cwd: PathBuf,
    pub model: String,
    pub max_iterations: u32,
    pub hitl_enabled: bool,
    pub conversation: Conversation,
    /// Invocations extracted by the last `plan`, consumed by `act`.
    #[serde(default)]
    pub pending_tool_calls: Vec<ToolInvocation>,
    /// Results produced by the last `act`.
    #[serde(default)]
    pub tool_results: Vec<ToolOutcome>,
    pub goal_achieved: bool,
    pub goal_reason: String,
    pub iteration: u32,
}

impl AgentState {
    pub fn new(
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
            conversation: Conversation::new(),
            pending_tool_calls: Vec::new(),
            tool_results: Vec::new(),
            goal_achieved: false,
            goal_reason: String::new(),
            iteration: 0,
        }
    }

    pub fn iterations_remaining(&self) -> bool {
        self.iteration < self.max_iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation_with(n: usize) -> Conversation {
        let mut conv = Conversation::new();
        conv.push(Turn::system("instructions"));
        for i in 0..n {
            conv.push(Turn::user(format!("turn {}", i)));
        }
        conv
    }

    #[test]
    fn test_trimmed_short_history_is_unchanged() {
        let conv = conversation_with(5);
        assert_eq!(conv.trimmed(), conv.turns().to_vec());
    }

    #[test]
    fn test_trimmed_keeps_first_and_recent_window() {
        let conv = conversation_with(100);
        let view = conv.trimmed();
        assert_eq!(view.len(), CONTEXT_WINDOW + 1);
        assert_eq!(view[0], Turn::system("instructions"));
        assert_eq!(view[1].content, "turn 60");
        assert_eq!(view.last().unwrap().content, "turn 99");
        // projection, not mutation
        assert_eq!(conv.len(), 101);
    }

    #[test]
    fn test_trimmed_is_never_longer_than_history() {
        for n in [0, 1, 39, 40, 41, 200] {
            let conv = conversation_with(n);
            let view = conv.trimmed();
            assert!(view.len() <= conv.len());
            assert_eq!(view.first(), conv.first());
        }
    }

    #[test]
    fn test_trimmed_empty() {
        assert!(Conversation::new().trimmed().is_empty());
    }

    #[test]
    fn test_tool_result_turn_links_invocation() {
        let outcome = ToolOutcome {
            tool_call_id: "call-1".into(),
            name: "file_read".into(),
            content: "boom".into(),
            error: true,
        };
        let turn = Turn::tool_result(&outcome);
        assert_eq!(turn.role, Role::Tool);
        assert_eq!(turn.tool_call_id.as_deref(), Some("call-1"));
        assert!(turn.is_error);
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let mut state = AgentState::new("r1", "pytest", PathBuf::from("/tmp"), "m", 3, true);
        state.conversation.push(Turn::system("sys"));
        state.conversation.push(Turn::assistant(
            "",
            vec![ToolInvocation {
                id: "c1".into(),
                name: "bash_exec".into(),
                args: serde_json::json!({"command": "ls"}),
            }],
        ));
        let text = serde_json::to_string(&state).unwrap();
        let back: AgentState = serde_json::from_str(&text).unwrap();
        assert_eq!(back.conversation, state.conversation);
        assert_eq!(back.max_iterations, 3);
        assert!(back.hitl_enabled);
    }
}
