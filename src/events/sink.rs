use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use super::{AgentEvent, EventBus, EventKind};

/// Subscribe to every run and record the event stream.
///
/// Each event becomes one structured `tracing` record; with a `path` it is
/// also appended to that file as a JSON line. The task ends once every
/// handle to `bus` is dropped, or when aborted.
pub fn spawn_log_sink(bus: &EventBus, path: Option<PathBuf>) -> JoinHandle<()> {
    let mut subscription = bus.subscribe(None);
    tokio::spawn(async move {
        let mut writer = match path.as_deref() {
            Some(p) => match open_log(p).await {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::error!(path = %p.display(), error = %format!("{:#}", e), "event log disabled");
                    None
                }
            },
            None => None,
        };

        while let Some(event) = subscription.recv().await {
            trace_event(&event);
            if let Some(file) = writer.as_mut()
                && let Err(e) = append_line(file, &event).await
            {
                tracing::warn!(error = %format!("{:#}", e), "failed to append event log line");
            }
        }
    })
}

async fn open_log(path: &Path) -> Result<tokio::fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open event log {}", path.display()))
}

async fn append_line(file: &mut tokio::fs::File, event: &AgentEvent) -> Result<()> {
    let mut line = serde_json::to_string(event).context("Failed to serialize event")?;
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

fn trace_event(event: &AgentEvent) {
    match event.kind {
        EventKind::Error => tracing::error!(
            run_id = %event.run_id,
            iteration = event.iteration,
            payload = %event.payload,
            "run error"
        ),
        EventKind::RunEnd | EventKind::HumanCheckRequired => tracing::info!(
            run_id = %event.run_id,
            iteration = event.iteration,
            kind = %event.kind,
            payload = %event.payload,
            "run event"
        ),
        _ => tracing::debug!(
            run_id = %event.run_id,
            iteration = event.iteration,
            kind = %event.kind,
            payload = %event.payload,
            "run event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_log_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/events.jsonl");
        let bus = EventBus::new();
        let handle = spawn_log_sink(&bus, Some(path.clone()));

        bus.publish(AgentEvent::step_start("r1", 0, "plan"));
        bus.publish(AgentEvent::run_end("r1", 1, "achieved", "done"));

        let mut lines = Vec::new();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Ok(text) = tokio::fs::read_to_string(&path).await {
                lines = text.lines().map(str::to_string).collect();
                if lines.len() == 2 {
                    break;
                }
            }
        }
        handle.abort();

        assert_eq!(lines.len(), 2);
        let first: AgentEvent = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first.kind, EventKind::StepStart);
        let last: AgentEvent = serde_json::from_str(&lines[1]).unwrap();
        assert!(last.is_terminal());
    }

    #[tokio::test]
    async fn test_log_sink_finishes_when_bus_is_dropped() {
        let bus = EventBus::new();
        let handle = spawn_log_sink(&bus, None);
        bus.publish(AgentEvent::step_start("r1", 0, "plan"));
        drop(bus);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sink should stop after the bus is gone")
            .unwrap();
    }
}
