use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Max characters of tool output carried in a `tool_result` event.
pub const TOOL_RESULT_PREVIEW: usize = 500;

/// Max characters of any string inside `goal_check` details.
pub const GOAL_DETAIL_LIMIT: usize = 2000;

/// Closed set of event kinds published by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StepStart,
    ToolCall,
    ToolResult,
    GoalCheck,
    HumanCheckRequired,
    HumanCheckResponse,
    IterationComplete,
    RunEnd,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepStart => "step_start",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::GoalCheck => "goal_check",
            Self::HumanCheckRequired => "human_check_required",
            Self::HumanCheckResponse => "human_check_response",
            Self::IterationComplete => "iteration_complete",
            Self::RunEnd => "run_end",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of run progress.
///
/// Serialized as `{kind, run_id, iteration, timestamp, payload}` where
/// `timestamp` is fractional UNIX seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub kind: EventKind,
    pub run_id: String,
    pub iteration: u32,
    pub timestamp: f64,
    pub payload: Value,
}

impl AgentEvent {
    pub fn new(kind: EventKind, run_id: &str, iteration: u32, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            kind,
            run_id: run_id.to_string(),
            iteration,
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
            payload,
        }
    }

    pub fn step_start(run_id: &str, iteration: u32, node: &str) -> Self {
        Self::new(EventKind::StepStart, run_id, iteration, json!({ "node": node }))
    }

    pub fn tool_call(run_id: &str, iteration: u32, tool: &str, args: &Value) -> Self {
        Self::new(
            EventKind::ToolCall,
            run_id,
            iteration,
            json!({ "tool": tool, "args": args }),
        )
    }

    pub fn tool_result(
        run_id: &str,
        iteration: u32,
        tool: &str,
        content: &str,
        success: bool,
    ) -> Self {
        Self::new(
            EventKind::ToolResult,
            run_id,
            iteration,
            json!({
                "tool": tool,
                "content": truncate_chars(content, TOOL_RESULT_PREVIEW),
                "success": success,
            }),
        )
    }

    pub fn goal_check(
        run_id: &str,
        iteration: u32,
        achieved: bool,
        reason: &str,
        details: &Value,
    ) -> Self {
        Self::new(
            EventKind::GoalCheck,
            run_id,
            iteration,
            json!({
                "achieved": achieved,
                "reason": reason,
                "details": truncate_details(details, GOAL_DETAIL_LIMIT),
            }),
        )
    }

    pub fn human_check_required(run_id: &str, iteration: u32, goal_reason: &str) -> Self {
        Self::new(
            EventKind::HumanCheckRequired,
            run_id,
            iteration,
            json!({
                "goal_reason": goal_reason,
                "message": "Human approval required to continue",
            }),
        )
    }

    pub fn human_check_response(run_id: &str, iteration: u32, decision: &str) -> Self {
        Self::new(
            EventKind::HumanCheckResponse,
            run_id,
            iteration,
            json!({ "decision": decision }),
        )
    }

    pub fn iteration_complete(run_id: &str, iteration: u32, goal_achieved: bool) -> Self {
        Self::new(
            EventKind::IterationComplete,
            run_id,
            iteration,
            json!({ "iteration": iteration, "goal_achieved": goal_achieved }),
        )
    }

    pub fn run_end(run_id: &str, iteration: u32, status: &str, reason: &str) -> Self {
        Self::new(
            EventKind::RunEnd,
            run_id,
            iteration,
            json!({ "status": status, "reason": reason }),
        )
    }

    pub fn error(run_id: &str, iteration: u32, error: &str) -> Self {
        Self::new(EventKind::Error, run_id, iteration, json!({ "error": error }))
    }

    /// True for the event that closes a run's stream.
    pub fn is_terminal(&self) -> bool {
        self.kind == EventKind::RunEnd
    }
}

/// Truncate to at most `max` characters, respecting char boundaries.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Recursively truncate long string values, appending `...` to cut strings.
pub fn truncate_details(details: &Value, max: usize) -> Value {
    match details {
        Value::String(s) if s.chars().count() > max => {
            Value::String(format!("{}...", truncate_chars(s, max)))
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_details(v, max)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| truncate_details(v, max)).collect())
        }
        other => other.clone(),
    }
}
