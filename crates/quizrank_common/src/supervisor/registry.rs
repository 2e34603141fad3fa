//! Task registry for supervisor

use super::{BackoffConfig, BackoffState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered, waiting for its next run
    Idle,
    /// A run is in progress
    Running,
    /// Last run succeeded
    Healthy,
    /// Last run failed, backing off
    Failing,
    /// Loop exited
    Stopped,
}

#[derive(Debug, Clone)]
struct TaskEntry {
    backoff: BackoffState,
    status: TaskStatus,
    runs: u64,
    failures: u64,
    last_error: Option<String>,
    last_run_at: Option<DateTime<Utc>>,
}

/// Observable state of one supervised task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub name: String,
    pub status: TaskStatus,
    pub runs: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Registry of supervised tasks
#[derive(Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskEntry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, backoff_config: BackoffConfig) {
        self.tasks.insert(
            name.to_string(),
            TaskEntry {
                backoff: BackoffState::new(backoff_config),
                status: TaskStatus::Idle,
                runs: 0,
                failures: 0,
                last_error: None,
                last_run_at: None,
            },
        );
    }

    pub fn record_start(&mut self, name: &str) {
        if let Some(entry) = self.tasks.get_mut(name) {
            entry.status = TaskStatus::Running;
            entry.runs += 1;
            entry.last_run_at = Some(Utc::now());
        }
    }

    /// Record a failed run and return how long to back off
    pub fn record_failure(&mut self, name: &str, error: &str) -> Option<Duration> {
        let entry = self.tasks.get_mut(name)?;
        entry.status = TaskStatus::Failing;
        entry.failures += 1;
        entry.last_error = Some(error.to_string());
        Some(entry.backoff.next_backoff())
    }

    pub fn record_success(&mut self, name: &str) {
        if let Some(entry) = self.tasks.get_mut(name) {
            entry.backoff.reset();
            entry.status = TaskStatus::Healthy;
        }
    }

    pub fn mark_stopped(&mut self, name: &str) {
        if let Some(entry) = self.tasks.get_mut(name) {
            entry.status = TaskStatus::Stopped;
        }
    }

    pub fn status(&self, name: &str) -> Option<TaskStatus> {
        self.tasks.get(name).map(|e| e.status)
    }

    /// Every task, ordered by name
    pub fn reports(&self) -> Vec<TaskReport> {
        self.tasks
            .iter()
            .map(|(name, e)| TaskReport {
                name: name.clone(),
                status: e.status,
                runs: e.runs,
                failures: e.failures,
                consecutive_failures: e.backoff.attempt(),
                last_error: e.last_error.clone(),
                last_run_at: e.last_run_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lifecycle() {
        let mut registry = TaskRegistry::new();
        registry.register("sync", BackoffConfig::default());
        assert_eq!(registry.status("sync"), Some(TaskStatus::Idle));

        registry.record_start("sync");
        assert_eq!(registry.status("sync"), Some(TaskStatus::Running));

        assert!(registry.record_failure("sync", "store down").is_some());
        assert_eq!(registry.status("sync"), Some(TaskStatus::Failing));

        registry.record_start("sync");
        registry.record_success("sync");
        let report = &registry.reports()[0];
        assert_eq!(report.status, TaskStatus::Healthy);
        assert_eq!((report.runs, report.failures, report.consecutive_failures), (2, 1, 0));
        assert_eq!(report.last_error.as_deref(), Some("store down"));
    }

    #[test]
    fn test_unknown_task() {
        let mut registry = TaskRegistry::new();
        assert!(registry.record_failure("missing", "x").is_none());
        assert_eq!(registry.status("missing"), None);
    }
}
