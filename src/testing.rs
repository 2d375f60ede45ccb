//! Scripted collaborators for exercising the engine without a model,
//! real tools or real goal checks.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agent::state::{AgentState, ToolInvocation};
use crate::errors::{GoalError, ProviderError, ToolError};
use crate::events::{AgentEvent, Subscription};
use crate::goals::{GoalResult, GoalStrategy};
use crate::provider::{CompletionProvider, CompletionReply, CompletionRequest, ToolSpec};
use crate::tools::ToolRegistry;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What a [`ScriptedProvider`] saw on one call.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub system_prompt: String,
    pub turn_count: usize,
    pub tool_names: Vec<String>,
}

/// Replies from a queue; once empty, replies with plain text and no tool
/// calls.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<CompletionReply, String>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    next_call_id: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_reply(self, reply: CompletionReply) -> Self {
        lock(&self.replies).push_back(Ok(reply));
        self
    }

    pub fn then_text(self, text: &str) -> Self {
        self.then_reply(CompletionReply {
            content: text.to_string(),
            tool_calls: Vec::new(),
        })
    }

    pub fn then_tool_call(self, name: &str, args: Value) -> Self {
        self.then_tool_calls(&[(name, args)])
    }

    pub fn then_tool_calls(self, calls: &[(&str, Value)]) -> Self {
        let tool_calls = calls
            .iter()
            .map(|(name, args)| ToolInvocation {
                id: format!(
                    "toolu_{}",
                    self.next_call_id.fetch_add(1, Ordering::Relaxed)
                ),
                name: name.to_string(),
                args: args.clone(),
            })
            .collect();
        self.then_reply(CompletionReply {
            content: String::new(),
            tool_calls,
        })
    }

    /// Queue a transport failure.
    pub fn then_error(self, message: &str) -> Self {
        lock(&self.replies).push_back(Err(message.to_string()));
        self
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        lock(&self.requests).last().cloned()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<CompletionReply, ProviderError> {
        lock(&self.requests).push(RecordedRequest {
            model: request.model.to_string(),
            system_prompt: request.system_prompt.to_string(),
            turn_count: request.turns.len(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
        });
        match lock(&self.replies).pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(ProviderError::Transport(message)),
            None => Ok(CompletionReply {
                content: "Continuing.".to_string(),
                tool_calls: Vec::new(),
            }),
        }
    }
}

/// Goal whose results are scripted: queued results first, then `fallback`.
pub struct StaticGoal {
    name: String,
    queued: Mutex<VecDeque<GoalResult>>,
    fallback: GoalResult,
    error: Option<String>,
    checks: AtomicUsize,
}

impl StaticGoal {
    fn build(queued: Vec<GoalResult>, fallback: GoalResult) -> Self {
        Self {
            name: "static".to_string(),
            queued: Mutex::new(queued.into()),
            fallback,
            error: None,
            checks: AtomicUsize::new(0),
        }
    }

    /// Never achieved.
    pub fn never() -> Self {
        Self::build(Vec::new(), GoalResult::not_achieved("not yet", json!({})))
    }

    /// Achieved on every check.
    pub fn always() -> Self {
        Self::build(Vec::new(), GoalResult::achieved("done", json!({})))
    }

    /// Not achieved until check number `n` (1-based), achieved from then on.
    pub fn achieved_on(n: usize) -> Self {
        let misses = (1..n)
            .map(|i| GoalResult::not_achieved(format!("miss {}", i), json!({})))
            .collect();
        Self::build(misses, GoalResult::achieved("done", json!({})))
    }

    /// `results` in order, then never achieved.
    pub fn sequence(results: Vec<GoalResult>) -> Self {
        Self::build(results, GoalResult::not_achieved("not yet", json!({})))
    }

    /// Every check raises a strategy error.
    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::never()
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GoalStrategy for StaticGoal {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _state: &AgentState, _cwd: &Path) -> Result<GoalResult, GoalError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.error {
            return Err(GoalError::CheckFailed {
                goal: self.name.clone(),
                message: message.clone(),
            });
        }
        Ok(lock(&self.queued)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }

    fn system_prompt(&self, _cwd: &Path) -> String {
        format!("Satisfy the {} goal.", self.name)
    }
}

/// Tool registry that records invocations.
///
/// `echo` and `file_list` succeed, `failing_tool` returns an execution
/// error, `fatal_tool` a fatal one; any other name is unknown.
#[derive(Default)]
pub struct RecordingTools {
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ToolRegistry for RecordingTools {
    fn catalogue(&self) -> Vec<ToolSpec> {
        ["echo", "file_list"]
            .into_iter()
            .map(|name| ToolSpec {
                name: name.to_string(),
                description: format!("test tool {}", name),
                parameters: json!({"type": "object", "properties": {}}),
            })
            .collect()
    }

    async fn invoke(&self, name: &str, args: &Value, _cwd: &Path) -> Result<String, ToolError> {
        lock(&self.calls).push((name.to_string(), args.clone()));
        match name {
            "echo" => Ok(args.to_string()),
            "file_list" => Ok("src/\nREADME.md".to_string()),
            "failing_tool" => Err(ToolError::execution(name, "exit status 1")),
            "fatal_tool" => Err(ToolError::Fatal("registry unavailable".to_string())),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

/// Receive events until `stop` matches (inclusive) or 10s pass.
pub async fn collect_until(
    subscription: &mut Subscription,
    stop: impl Fn(&AgentEvent) -> bool,
) -> Vec<Arc<AgentEvent>> {
    let mut events = Vec::new();
    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) => {
                    let done = stop(&event);
                    events.push(event);
                    if done {
                        return events;
                    }
                }
                None => return events,
            },
            _ = &mut deadline => return events,
        }
    }
}
