use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::WorkerId;

/// State of the crew orchestrator, independent of individual worker states.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CrewState {
    Idle,
    Running,
    Complete,
    Error,
}

/// Lifecycle of a worker agent. Terminal states never revert.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    Running,
    Complete,
    /// Completed but hit its iteration cap.
    Warning,
    Error,
    /// Task determined infeasible by the worker itself.
    Failed,
    Cancelled,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A worker agent record. The registry entry is the authoritative copy;
/// in-memory instances are working copies written through on every change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub task: String,
    pub status: WorkerStatus,
    pub priority: i32,
    #[serde(default)]
    pub depends_on: Vec<WorkerId>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Worker {
    pub fn new(id: WorkerId, task: impl Into<String>, priority: i32, depends_on: Vec<WorkerId>) -> Self {
        Self {
            id,
            task: task.into(),
            status: WorkerStatus::Pending,
            priority,
            depends_on,
            result: None,
            error: None,
            tools_used: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a status transition. Returns false (and leaves the record
    /// untouched) if the current status is already terminal.
    pub fn transition(&mut self, next: WorkerStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        true
    }

    /// Record a tool name, keeping `tools_used` ordered and deduplicated.
    /// Returns true if the name was new.
    pub fn record_tool(&mut self, name: &str) -> bool {
        if self.tools_used.iter().any(|t| t == name) {
            return false;
        }
        self.tools_used.push(name.to_string());
        true
    }

    pub fn summary(&self) -> WorkerSummary {
        WorkerSummary {
            task: self.task.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            tools_used: self.tools_used.clone(),
        }
    }
}

/// The view of a settled worker returned by `wait_for`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub task: String,
    pub status: WorkerStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub tools_used: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> Worker {
        Worker::new(WorkerId::from_index(0), "scan the target", 1, vec![])
    }

    #[test]
    fn new_worker_is_pending() {
        let w = worker();
        assert_eq!(w.status, WorkerStatus::Pending);
        assert!(!w.status.is_terminal());
        assert!(w.result.is_none());
        assert!(w.started_at.is_none());
    }

    #[test]
    fn transition_through_lifecycle() {
        let mut w = worker();
        assert!(w.transition(WorkerStatus::Running));
        assert!(w.transition(WorkerStatus::Complete));
        assert_eq!(w.status, WorkerStatus::Complete);
    }

    #[test]
    fn terminal_states_are_sticky() {
        for terminal in [
            WorkerStatus::Complete,
            WorkerStatus::Warning,
            WorkerStatus::Failed,
            WorkerStatus::Error,
            WorkerStatus::Cancelled,
        ] {
            let mut w = worker();
            w.transition(WorkerStatus::Running);
            w.transition(terminal);
            assert!(!w.transition(WorkerStatus::Complete), "{terminal:?} reverted");
            assert!(!w.transition(WorkerStatus::Running), "{terminal:?} reverted");
            assert_eq!(w.status, terminal);
        }
    }

    #[test]
    fn record_tool_dedupes_and_keeps_order() {
        let mut w = worker();
        assert!(w.record_tool("shell"));
        assert!(w.record_tool("report_step"));
        assert!(!w.record_tool("shell"));
        assert_eq!(w.tools_used, vec!["shell", "report_step"]);
    }

    #[test]
    fn serde_roundtrip() {
        let mut w = worker();
        w.transition(WorkerStatus::Running);
        w.started_at = Some(Utc::now());
        w.record_tool("shell");
        w.result = Some("open ports: 22, 443".into());

        let json = serde_json::to_string(&w).unwrap();
        let parsed: Worker = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, w.id);
        assert_eq!(parsed.status, WorkerStatus::Running);
        assert_eq!(parsed.tools_used, vec!["shell"]);
    }

    #[test]
    fn status_display_matches_serde() {
        for status in [
            WorkerStatus::Pending,
            WorkerStatus::Running,
            WorkerStatus::Complete,
            WorkerStatus::Warning,
            WorkerStatus::Error,
            WorkerStatus::Failed,
            WorkerStatus::Cancelled,
        ] {
            let display = status.to_string();
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(format!("\"{display}\""), json);
        }
    }

    #[test]
    fn crew_state_serde() {
        let json = serde_json::to_string(&CrewState::Running).unwrap();
        assert_eq!(json, r#""running""#);
    }
}
