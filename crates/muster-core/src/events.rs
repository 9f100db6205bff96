use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::ids::{ProjectId, WorkerId};
use crate::worker::WorkerStatus;

/// Progress events broadcast during a crew run. Delivery is fire-and-forget:
/// nothing in the control loop depends on a receiver existing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum CrewEvent {
    Starting {
        project: ProjectId,
    },
    Thinking {
        content: String,
    },
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    ToolResult {
        tool: String,
        result: String,
    },
    Tokens {
        tokens: u64,
    },
    Complete {
        report: String,
    },
    Error {
        error: String,
    },

    WorkerSpawn {
        worker_id: WorkerId,
        task: String,
    },
    WorkerStatus {
        worker_id: WorkerId,
        status: WorkerStatus,
    },
    WorkerTool {
        worker_id: WorkerId,
        tool: String,
    },
    WorkerTokens {
        worker_id: WorkerId,
        tokens: u64,
    },
    WorkerComplete {
        worker_id: WorkerId,
        status: WorkerStatus,
        summary: String,
    },
    WorkerCancelled {
        worker_id: WorkerId,
    },
    WorkerError {
        worker_id: WorkerId,
        error: String,
    },
}

impl CrewEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Starting { .. } => "starting",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Tokens { .. } => "tokens",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::WorkerSpawn { .. } => "worker_spawn",
            Self::WorkerStatus { .. } => "worker_status",
            Self::WorkerTool { .. } => "worker_tool",
            Self::WorkerTokens { .. } => "worker_tokens",
            Self::WorkerComplete { .. } => "worker_complete",
            Self::WorkerCancelled { .. } => "worker_cancelled",
            Self::WorkerError { .. } => "worker_error",
        }
    }
}

/// Observer interface the engine emits progress through. Implementations
/// must never fail into the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CrewEvent);
}

/// Sink backed by a tokio broadcast channel. An external observer (UI,
/// metrics feed) subscribes with `subscribe()`; with no receivers the send
/// result is logged and dropped.
pub struct BroadcastSink {
    tx: broadcast::Sender<CrewEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CrewEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: CrewEvent) {
        if self.tx.send(event).is_err() {
            warn!("no event receivers — event dropped");
        }
    }
}

/// Sink that discards everything. Handy in tests.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: CrewEvent) {}
}
