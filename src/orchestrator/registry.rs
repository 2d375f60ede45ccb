use dashmap::DashMap;
use tokio::sync::watch;

use super::{Run, RunStatus, is_valid_transition};
use crate::errors::OrchestratorError;

struct Entry {
    run: Run,
    status_tx: watch::Sender<RunStatus>,
}

/// Run id → run record. Each entry is guarded by its dashmap shard, so
/// unrelated runs never serialize on one lock.
#[derive(Default)]
pub(crate) struct RunRegistry {
    runs: DashMap<String, Entry>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, run: Run) {
        let (status_tx, _) = watch::channel(run.status);
        self.runs
            .insert(run.run_id.clone(), Entry { run, status_tx });
    }

    pub fn get(&self, run_id: &str) -> Option<Run> {
        self.runs.get(run_id).map(|entry| entry.run.clone())
    }

    pub fn status(&self, run_id: &str) -> Option<RunStatus> {
        self.runs.get(run_id).map(|entry| entry.run.status)
    }

    pub fn list(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.runs.iter().map(|entry| entry.run.clone()).collect();
        runs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        runs
    }

    /// Apply `f` to the run under its entry lock. Returns false for an
    /// unknown run.
    pub fn update(&self, run_id: &str, f: impl FnOnce(&mut Run)) -> bool {
        match self.runs.get_mut(run_id) {
            Some(mut entry) => {
                f(&mut entry.run);
                true
            }
            None => false,
        }
    }

    /// Move the run to `to`, applying `f` in the same critical section.
    /// Returns the previous status.
    pub fn transition(
        &self,
        run_id: &str,
        to: RunStatus,
        f: impl FnOnce(&mut Run),
    ) -> Result<RunStatus, OrchestratorError> {
        let mut entry = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| OrchestratorError::NoSuchRun(run_id.to_string()))?;
        let from = entry.run.status;
        if !is_valid_transition(from, to) {
            return Err(OrchestratorError::Internal(format!(
                "run {} cannot move from {} to {}",
                run_id, from, to
            )));
        }
        entry.run.status = to;
        f(&mut entry.run);
        entry.status_tx.send_replace(to);
        Ok(from)
    }

    pub fn watch(&self, run_id: &str) -> Option<watch::Receiver<RunStatus>> {
        self.runs
            .get(run_id)
            .map(|entry| entry.status_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn run(id: &str) -> Run {
        Run::new(id, "pytest", PathBuf::from("/tmp"), "m", 3, false)
    }

    #[test]
    fn test_insert_get_list() {
        let registry = RunRegistry::new();
        registry.insert(run("a"));
        registry.insert(run("b"));
        assert_eq!(registry.get("a").unwrap().run_id, "a");
        assert!(registry.get("zzz").is_none());
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_transition_enforces_table() {
        let registry = RunRegistry::new();
        registry.insert(run("a"));
        assert_eq!(
            registry
                .transition("a", RunStatus::Running, |_| {})
                .unwrap(),
            RunStatus::Pending
        );
        let err = registry
            .transition("a", RunStatus::Aborted, |_| {})
            .unwrap_err();
        assert_eq!(err.reason(), "internal");
        assert_eq!(registry.status("a"), Some(RunStatus::Running));
    }

    #[test]
    fn test_transition_unknown_run() {
        let registry = RunRegistry::new();
        let err = registry
            .transition("nope", RunStatus::Running, |_| {})
            .unwrap_err();
        assert_eq!(err.reason(), "no_such_run");
    }

    #[tokio::test]
    async fn test_watch_sees_transitions() {
        let registry = RunRegistry::new();
        registry.insert(run("a"));
        let mut rx = registry.watch("a").unwrap();
        registry
            .transition("a", RunStatus::Running, |_| {})
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), RunStatus::Running);
    }
}
