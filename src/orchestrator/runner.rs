//! The per-run driver task: execute a node, route, repeat until the run
//! suspends or finishes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{FinalState, RunStatus, Shared};
use crate::agent::{AgentState, Node, NodeContext, Transition, execute, route};
use crate::errors::NodeError;
use crate::events::{AgentEvent, RunEvents};
use crate::goals::GoalStrategy;

/// Spawn a driver for `state`, starting at `start_at`.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    goal: Arc<dyn GoalStrategy>,
    state: AgentState,
    start_at: Node,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let run_id = state.run_id.clone();
        let outcome = AssertUnwindSafe(drive(&shared, goal.as_ref(), state, start_at))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            error!(run_id = %run_id, "Run driver panicked");
            fail_run(&shared, &run_id, "run driver panicked");
        }
    })
}

async fn drive(shared: &Shared, goal: &dyn GoalStrategy, mut state: AgentState, start_at: Node) {
    let events = RunEvents::new(shared.bus.clone(), &state.run_id);
    let mut node = start_at;

    loop {
        let ctx = NodeContext {
            goal,
            events: &events,
            provider: shared.provider.as_ref(),
            tools: shared.tools.as_ref(),
        };
        if let Err(e) = execute(node, ctx, &mut state).await {
            error!(
                run_id = %state.run_id,
                node = %node,
                iteration = state.iteration,
                error = %e,
                "Node failed"
            );
            fail_run(shared, &state.run_id, &e.to_string());
            return;
        }

        if node == Node::Evaluate {
            shared.registry.update(&state.run_id, |run| {
                run.iteration = state.iteration;
                run.goal_reason = state.goal_reason.clone();
            });
        }

        match route(node, &state) {
            Transition::Goto(next) => node = next,
            Transition::Suspend { resume_at } => {
                suspend(shared, &state, resume_at).await;
                return;
            }
            Transition::Finish(status) => {
                finish(shared, &events, &state, status);
                return;
            }
        }
    }
}

async fn suspend(shared: &Shared, state: &AgentState, resume_at: Node) {
    if let Err(e) = shared
        .checkpoints
        .save(&state.run_id, state, resume_at)
        .await
    {
        let e = NodeError::from(e);
        error!(run_id = %state.run_id, error = %e, "Failed to checkpoint run");
        fail_run(shared, &state.run_id, &e.to_string());
        return;
    }
    match shared
        .registry
        .transition(&state.run_id, RunStatus::Suspended, |_| {})
    {
        Ok(_) => info!(
            run_id = %state.run_id,
            iteration = state.iteration,
            "Run suspended for human check"
        ),
        Err(e) => warn!(run_id = %state.run_id, error = %e, "Could not mark run suspended"),
    }
}

fn finish(shared: &Shared, events: &RunEvents, state: &AgentState, status: RunStatus) {
    let final_state = FinalState {
        iteration: state.iteration,
        achieved: state.goal_achieved,
        reason: state.goal_reason.clone(),
    };
    if let Err(e) = shared.registry.transition(&state.run_id, status, |run| {
        run.iteration = state.iteration;
        run.goal_reason = state.goal_reason.clone();
        run.final_state = Some(final_state);
    }) {
        warn!(run_id = %state.run_id, error = %e, "Could not record run outcome");
    }
    events.emit(AgentEvent::run_end(
        &state.run_id,
        state.iteration,
        status.as_str(),
        &state.goal_reason,
    ));
    info!(
        run_id = %state.run_id,
        status = %status,
        iteration = state.iteration,
        reason = %state.goal_reason,
        "Run finished"
    );
}

/// Mark the run failed with `message`, then emit `error` and `run_end`.
pub(crate) fn fail_run(shared: &Shared, run_id: &str, message: &str) {
    let Some(run) = shared.registry.get(run_id) else {
        warn!(run_id, "Cannot fail unknown run");
        return;
    };
    if run.status.is_terminal() {
        return;
    }
    let iteration = run.iteration;
    let result = shared
        .registry
        .transition(run_id, RunStatus::Failed, |run| {
            run.error = Some(message.to_string());
            run.final_state = Some(FinalState {
                iteration,
                achieved: false,
                reason: message.to_string(),
            });
        });
    if let Err(e) = result {
        warn!(run_id, error = %e, "Could not mark run failed");
        return;
    }

    let events = RunEvents::new(shared.bus.clone(), run_id);
    events.emit(AgentEvent::error(run_id, iteration, message));
    events.emit(AgentEvent::run_end(
        run_id,
        iteration,
        RunStatus::Failed.as_str(),
        message,
    ));
}
