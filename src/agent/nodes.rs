//! Node executors. Each receives the run's state plus an explicit
//! collaborator bundle and returns once the node's work is appended.

use tracing::{debug, info, warn};

use super::router::Node;
use super::state::{AgentState, Role, ToolOutcome, Turn};
use crate::errors::{NodeError, ToolError};
use crate::events::{AgentEvent, RunEvents};
use crate::goals::GoalStrategy;
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::tools::ToolRegistry;

/// Collaborators a node may call. Borrowed for one node execution.
#[derive(Clone, Copy)]
pub struct NodeContext<'a> {
    pub goal: &'a dyn GoalStrategy,
    pub events: &'a RunEvents,
    pub provider: &'a dyn CompletionProvider,
    pub tools: &'a dyn ToolRegistry,
}

/// Announce `node` with a `step_start` event and run it.
pub async fn execute(
    node: Node,
    ctx: NodeContext<'_>,
    state: &mut AgentState,
) -> Result<(), NodeError> {
    ctx.events.emit(AgentEvent::step_start(
        &state.run_id,
        state.iteration,
        node.as_str(),
    ));
    match node {
        Node::Plan => plan(ctx, state).await,
        Node::Act => act(ctx, state).await,
        Node::Evaluate => evaluate(ctx, state).await,
        Node::HumanCheck => {
            human_check(ctx, state);
            Ok(())
        }
    }
}

async fn plan(ctx: NodeContext<'_>, state: &mut AgentState) -> Result<(), NodeError> {
    let view = state.conversation.trimmed();
    let (system_prompt, turns) = match view.split_first() {
        Some((first, rest)) if first.role == Role::System => (first.content.as_str(), rest),
        _ => ("", view.as_slice()),
    };
    let catalogue = ctx.tools.catalogue();

    let reply = ctx
        .provider
        .complete(CompletionRequest {
            model: &state.model,
            system_prompt,
            turns,
            tools: &catalogue,
        })
        .await?;

    let mut calls = reply.tool_calls;
    for (i, call) in calls.iter_mut().enumerate() {
        if call.id.is_empty() {
            call.id = format!("call_{}_{}", state.iteration, i);
        }
    }
    debug!(
        run_id = %state.run_id,
        iteration = state.iteration,
        tool_calls = calls.len(),
        "Plan reply received"
    );

    state
        .conversation
        .push(Turn::assistant(reply.content, calls.clone()));
    state.pending_tool_calls = calls;
    state.tool_results.clear();
    Ok(())
}

async fn act(ctx: NodeContext<'_>, state: &mut AgentState) -> Result<(), NodeError> {
    let run_id = ctx.events.run_id();
    let calls = std::mem::take(&mut state.pending_tool_calls);
    let mut results = Vec::with_capacity(calls.len());

    for call in calls {
        ctx.events.emit(AgentEvent::tool_call(
            run_id,
            state.iteration,
            &call.name,
            &call.args,
        ));

        let (content, error) = match ctx.tools.invoke(&call.name, &call.args, &state.cwd).await {
            Ok(content) => (content, false),
            Err(ToolError::Fatal(message)) => {
                return Err(NodeError::Tool(ToolError::Fatal(message)));
            }
            Err(e) => {
                warn!(run_id, tool = %call.name, error = %e, "Tool call failed");
                (format!("Error: {}", e), true)
            }
        };
        let outcome = ToolOutcome {
            tool_call_id: call.id,
            name: call.name,
            content,
            error,
        };

        ctx.events.emit(AgentEvent::tool_result(
            run_id,
            state.iteration,
            &outcome.name,
            &outcome.content,
            !outcome.error,
        ));
        state.conversation.push(Turn::tool_result(&outcome));
        results.push(outcome);
    }

    state.tool_results = results;
    Ok(())
}

async fn evaluate(ctx: NodeContext<'_>, state: &mut AgentState) -> Result<(), NodeError> {
    let run_id = ctx.events.run_id();
    let result = ctx.goal.check(&*state, &state.cwd).await?;
    let iteration = state.iteration + 1;

    ctx.events.emit(AgentEvent::goal_check(
        run_id,
        iteration,
        result.achieved,
        &result.reason,
        &result.details,
    ));
    ctx.events.emit(AgentEvent::iteration_complete(
        run_id,
        iteration,
        result.achieved,
    ));

    state.conversation.push(Turn::user(format!(
        "[Iteration {}/{}] Goal status: {}. Reason: {}",
        iteration,
        state.max_iterations,
        if result.achieved {
            "ACHIEVED"
        } else {
            "NOT YET ACHIEVED"
        },
        result.reason
    )));

    info!(
        run_id,
        iteration,
        achieved = result.achieved,
        reason = %result.reason,
        "Goal checked"
    );

    state.iteration = iteration;
    state.goal_achieved = result.achieved;
    state.goal_reason = if !result.achieved && iteration >= state.max_iterations {
        format!(
            "Max iterations ({}) reached. {}",
            state.max_iterations, result.reason
        )
    } else {
        result.reason
    };
    Ok(())
}

fn human_check(ctx: NodeContext<'_>, state: &AgentState) {
    ctx.events.emit(AgentEvent::human_check_required(
        ctx.events.run_id(),
        state.iteration,
        &state.goal_reason,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, EventKind};
    use crate::goals::GoalResult;
    use crate::testing::{RecordingTools, ScriptedProvider, StaticGoal};
    use serde_json::json;
    use std::path::PathBuf;

    struct Harness {
        bus: EventBus,
        events: RunEvents,
        goal: StaticGoal,
        provider: ScriptedProvider,
        tools: RecordingTools,
    }

    impl Harness {
        fn new(provider: ScriptedProvider, goal: StaticGoal) -> Self {
            let bus = EventBus::new();
            let events = RunEvents::new(bus.clone(), "run-1");
            Self {
                bus,
                events,
                goal,
                provider,
                tools: RecordingTools::new(),
            }
        }

        fn ctx(&self) -> NodeContext<'_> {
            NodeContext {
                goal: &self.goal,
                events: &self.events,
                provider: &self.provider,
                tools: &self.tools,
            }
        }
    }

    fn state(max_iterations: u32) -> AgentState {
        let mut state = AgentState::new(
            "run-1",
            "static",
            PathBuf::from("."),
            "test-model",
            max_iterations,
            false,
        );
        state.conversation.push(Turn::system("system instructions"));
        state.conversation.push(Turn::user("Begin."));
        state
    }

    #[tokio::test]
    async fn test_plan_appends_reply_and_extracts_calls() {
        let provider = ScriptedProvider::new()
            .then_tool_call("file_list", json!({"path": "."}))
            .then_text("done");
        let h = Harness::new(provider, StaticGoal::never());
        let mut s = state(3);
        let mut sub = h.bus.subscribe(Some("run-1"));

        execute(Node::Plan, h.ctx(), &mut s).await.unwrap();

        assert_eq!(s.pending_tool_calls.len(), 1);
        assert_eq!(s.conversation.len(), 3);
        let event = sub.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::StepStart);
        assert_eq!(event.payload["node"], "plan");

        let request = h.provider.last_request().unwrap();
        assert_eq!(request.system_prompt, "system instructions");
        assert_eq!(request.turn_count, 1);
    }

    #[tokio::test]
    async fn test_plan_sends_trimmed_view_but_keeps_full_history() {
        let provider = ScriptedProvider::new().then_text("first").then_text("second");
        let h = Harness::new(provider, StaticGoal::never());
        let mut s = state(3);
        for i in 0..50 {
            s.conversation.push(Turn::user(format!("status {}", i)));
        }
        assert_eq!(s.conversation.len(), 52);

        execute(Node::Plan, h.ctx(), &mut s).await.unwrap();
        let request = h.provider.last_request().unwrap();
        assert_eq!(request.system_prompt, "system instructions");
        assert_eq!(request.turn_count, crate::agent::state::CONTEXT_WINDOW);
        assert_eq!(s.conversation.len(), 53);

        execute(Node::Plan, h.ctx(), &mut s).await.unwrap();
        let request = h.provider.last_request().unwrap();
        assert_eq!(request.system_prompt, "system instructions");
        assert_eq!(request.turn_count, crate::agent::state::CONTEXT_WINDOW);
        assert_eq!(s.conversation.len(), 54);
        assert_eq!(
            s.conversation.turns()[0],
            Turn::system("system instructions")
        );
    }

    #[tokio::test]
    async fn test_act_records_failures_without_stopping() {
        let provider = ScriptedProvider::new()
            .then_tool_call("broken_tool", json!({}))
            .then_text("");
        let h = Harness::new(provider, StaticGoal::never());
        let mut s = state(3);
        execute(Node::Plan, h.ctx(), &mut s).await.unwrap();
        let mut sub = h.bus.subscribe(Some("run-1"));

        execute(Node::Act, h.ctx(), &mut s).await.unwrap();

        assert!(s.pending_tool_calls.is_empty());
        assert_eq!(s.tool_results.len(), 1);
        assert!(s.tool_results[0].error);
        let kinds: Vec<EventKind> = std::iter::from_fn(|| sub.try_recv())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            [EventKind::StepStart, EventKind::ToolCall, EventKind::ToolResult]
        );
    }

    #[tokio::test]
    async fn test_evaluate_increments_iteration_and_appends_status() {
        let h = Harness::new(
            ScriptedProvider::new(),
            StaticGoal::sequence(vec![GoalResult::not_achieved("2 failing", json!({}))]),
        );
        let mut s = state(1);
        execute(Node::Evaluate, h.ctx(), &mut s).await.unwrap();

        assert_eq!(s.iteration, 1);
        assert!(!s.goal_achieved);
        assert_eq!(s.goal_reason, "Max iterations (1) reached. 2 failing");
        let last = s.conversation.turns().last().unwrap();
        assert_eq!(
            last.content,
            "[Iteration 1/1] Goal status: NOT YET ACHIEVED. Reason: 2 failing"
        );
    }

    #[tokio::test]
    async fn test_human_check_announces_suspension() {
        let h = Harness::new(ScriptedProvider::new(), StaticGoal::never());
        let mut s = state(3);
        s.goal_reason = "not yet".into();
        let mut sub = h.bus.subscribe(Some("run-1"));
        execute(Node::HumanCheck, h.ctx(), &mut s).await.unwrap();

        sub.try_recv().unwrap();
        let event = sub.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::HumanCheckRequired);
        assert_eq!(event.payload["goal_reason"], "not yet");
    }
}
