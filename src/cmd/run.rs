//! Drive one run in the terminal: `retrai run`.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use dialoguer::{Select, theme::ColorfulTheme};
use serde_json::Value;

use retrai::config::RunConfig;
use retrai::events::{AgentEvent, EventKind, spawn_log_sink, truncate_chars};
use retrai::goals::detect_goal;
use retrai::orchestrator::{Decision, Orchestrator, RunStatus};
use retrai::provider::AnthropicProvider;

const ARGS_PREVIEW: usize = 120;
const RESULT_PREVIEW: usize = 200;

pub struct RunOptions {
    /// Detected from the project files when absent.
    pub goal: Option<String>,
    pub cwd: PathBuf,
    pub model: String,
    pub max_iterations: u32,
    pub hitl: bool,
    pub event_log: Option<PathBuf>,
}

/// Returns whether the goal was achieved.
pub async fn cmd_run(options: RunOptions) -> Result<bool> {
    let goal = match options.goal {
        Some(goal) => goal,
        None => detect_goal(&options.cwd)
            .map(str::to_string)
            .with_context(|| {
                format!(
                    "No goal given and none detected in {}. Run 'retrai goals' to list them.",
                    options.cwd.display()
                )
            })?,
    };

    let provider = AnthropicProvider::from_env().context("Model provider is not available")?;
    let orchestrator = Orchestrator::builder(Arc::new(provider)).build();
    let sink = options
        .event_log
        .map(|path| spawn_log_sink(orchestrator.bus(), Some(path)));

    // Subscribe before starting so the first step_start is seen.
    let mut events = orchestrator.subscribe(None);
    let config = RunConfig::new(&goal)
        .with_cwd(&options.cwd)
        .with_model(&options.model)
        .with_max_iterations(options.max_iterations)
        .with_hitl(options.hitl);
    let run_id = orchestrator.start(config)?;

    println!(
        "{} {} {}",
        console::style("retrAI").bold().cyan(),
        console::style(&goal).bold(),
        console::style(format!("(run {})", run_id)).dim()
    );

    while let Some(event) = events.recv().await {
        if event.run_id != run_id {
            continue;
        }
        if let Some(line) = render_event(&event) {
            println!("{}", line);
        }
        match event.kind {
            EventKind::HumanCheckRequired => {
                let run = orchestrator.settled(&run_id).await?;
                if run.status != RunStatus::Suspended {
                    continue;
                }
                let decision = prompt_decision().await?;
                orchestrator.resume(&run_id, decision).await?;
            }
            EventKind::RunEnd => break,
            _ => {}
        }
    }

    let run = orchestrator.settled(&run_id).await?;
    if let Some(sink) = sink {
        sink.abort();
    }

    let reason = run
        .final_state
        .as_ref()
        .map(|f| f.reason.as_str())
        .unwrap_or_default();
    let status = match run.status {
        RunStatus::Achieved => console::style(run.status.as_str()).green().bold(),
        _ => console::style(run.status.as_str()).red().bold(),
    };
    println!();
    println!(
        "Run {} after {} iteration(s): {}",
        status, run.iteration, reason
    );
    Ok(run.status == RunStatus::Achieved)
}

/// Ask approve/abort. Uses an interactive menu on a terminal and reads one
/// line from stdin otherwise; end of input means abort.
async fn prompt_decision() -> Result<Decision> {
    tokio::task::spawn_blocking(|| -> Result<Decision> {
        if console::user_attended() {
            let selection = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Continue with the next iteration?")
                .items(&["Approve", "Abort"])
                .default(0)
                .interact()?;
            return Ok(if selection == 0 {
                Decision::Approve
            } else {
                Decision::Abort
            });
        }
        let mut line = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read decision from stdin")?;
        if read == 0 {
            return Ok(Decision::Abort);
        }
        Ok(line.parse::<Decision>()?)
    })
    .await
    .context("Decision prompt panicked")?
}

fn text<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// One terminal line per event.
pub fn render_event(event: &AgentEvent) -> Option<String> {
    let p = &event.payload;
    let line = match event.kind {
        EventKind::StepStart => format!(
            "{} {}",
            console::style(format!("[{}]", event.iteration)).dim(),
            console::style(text(p, "node")).bold()
        ),
        EventKind::ToolCall => {
            let args = p.get("args").map(Value::to_string).unwrap_or_default();
            format!(
                "    {} {}",
                console::style(text(p, "tool")).cyan(),
                console::style(truncate_chars(&args, ARGS_PREVIEW)).dim()
            )
        }
        EventKind::ToolResult => {
            let ok = p.get("success").and_then(Value::as_bool).unwrap_or(false);
            let marker = if ok {
                console::style("ok").green()
            } else {
                console::style("failed").red()
            };
            let first_line = text(p, "content").lines().next().unwrap_or_default();
            format!(
                "    {} {} {}",
                marker,
                text(p, "tool"),
                console::style(truncate_chars(first_line, RESULT_PREVIEW)).dim()
            )
        }
        EventKind::GoalCheck => {
            let achieved = p.get("achieved").and_then(Value::as_bool).unwrap_or(false);
            if achieved {
                format!("  {} {}", console::style("Goal met:").green().bold(), text(p, "reason"))
            } else {
                format!("  {} {}", console::style("Goal not met:").yellow(), text(p, "reason"))
            }
        }
        EventKind::HumanCheckRequired => format!(
            "  {} {}",
            console::style("Human check required.").yellow().bold(),
            text(p, "goal_reason")
        ),
        EventKind::HumanCheckResponse => {
            format!("  {} {}", console::style("Decision:").bold(), text(p, "decision"))
        }
        EventKind::IterationComplete => return None,
        EventKind::RunEnd => format!(
            "{} {}",
            console::style(format!("Run {}", text(p, "status"))).bold(),
            text(p, "reason")
        ),
        EventKind::Error => format!(
            "  {} {}",
            console::style("Error:").red().bold(),
            text(p, "error")
        ),
    };
    Some(line)
}
