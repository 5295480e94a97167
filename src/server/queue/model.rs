//! Data model for the durable work queue: codebases, queued agent tasks, and workers.
//!
//! Distinct from [`crate::types::Task`] (the A2A conversation task, owned by
//! the task lifecycle manager): an [`AgentTask`] is a persistent unit of
//! work belonging to a [`Codebase`], claimed and executed by an external
//! [`Worker`] process over the REST surface in `super::workers`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum size, in bytes, of a stored `result`/`error` payload. Longer
/// values are truncated with a trailing indicator.
pub const MAX_RESULT_BYTES: usize = 5 * 1024;

/// Truncate `text` to `max_bytes`, appending an indicator if it was cut.
pub fn truncate_result(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [truncated {} bytes]", &text[..end], text.len() - end)
}

/// Lifecycle state of a registered codebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodebaseStatus {
    /// No worker attached / no activity.
    Idle,
    /// A worker is actively executing a task.
    Running,
    /// A worker is attached and busy beyond a single task (e.g. long session).
    Busy,
    /// Watch mode is active — the server is auto-dispatching queued tasks.
    Watching,
    /// Watch mode (or another loop) hit an unrecoverable error.
    Error,
    /// Explicitly stopped.
    Stopped,
}

/// A server-registered target of agent work. The server persists identity
/// and status, not the codebase's contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codebase {
    /// Server-assigned id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Opaque path, meaningful only to the worker that owns it.
    pub path: String,
    /// Current lifecycle status.
    pub status: CodebaseStatus,
    /// Worker currently attached, if any.
    pub worker_id: Option<String>,
    /// Active session id, if any.
    pub session_id: Option<String>,
    /// Whether watch mode is (or should be) active for this codebase.
    pub watch_mode: bool,
    /// Poll interval for the watch loop, in seconds.
    pub watch_interval_s: u64,
    /// Set when `status == Error`.
    pub error_message: Option<String>,
}

impl Codebase {
    /// Construct a new, idle codebase registration.
    pub fn new(id: String, name: String, path: String) -> Self {
        Self {
            id,
            name,
            path,
            status: CodebaseStatus::Idle,
            worker_id: None,
            session_id: None,
            watch_mode: false,
            watch_interval_s: 10,
            error_message: None,
        }
    }
}

/// Lifecycle state of a queued [`AgentTask`].
///
/// ```text
/// PENDING ──► ASSIGNED ──► RUNNING ──► COMPLETED
///                    │            ├──► FAILED
///                    │            └──► CANCELLED
///                    └───────────► CANCELLED   (client-initiated, only while PENDING/ASSIGNED)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTaskState {
    /// Queued, unclaimed.
    Pending,
    /// Claimed by a worker but not yet executing (optional lease state).
    Assigned,
    /// A worker has taken ownership and is executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Canceled before or during execution.
    Cancelled,
}

impl AgentTaskState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentTaskState::Completed | AgentTaskState::Failed | AgentTaskState::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition per the state machine above.
    pub fn can_transition_to(self, next: AgentTaskState) -> bool {
        use AgentTaskState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Running)
                | (Pending, Cancelled)
                | (Assigned, Running)
                | (Assigned, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                // Lease recovery: a running task whose lease expired is revived to pending.
                | (Running, Pending)
        )
    }

    /// Whether a client-initiated cancel is permitted from this state
    /// (`spec.md` §4.5: only while PENDING or ASSIGNED).
    pub fn cancelable(self) -> bool {
        matches!(self, AgentTaskState::Pending | AgentTaskState::Assigned)
    }
}

/// A queued, persistent unit of work belonging to one [`Codebase`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    /// Unique id.
    pub id: String,
    /// Owning codebase.
    pub codebase_id: String,
    /// Short human-readable title.
    pub title: String,
    /// The prompt/instruction handed to the worker.
    pub prompt: String,
    /// Which agent type/skill should execute this task.
    pub agent_type: String,
    /// Current lifecycle state.
    pub status: AgentTaskState,
    /// Claim priority — higher claims first.
    pub priority: i32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When a worker claimed it (entered RUNNING).
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Worker currently (or formerly) holding the task.
    pub worker_id: Option<String>,
    /// Success result text, truncated to [`MAX_RESULT_BYTES`].
    pub result: Option<String>,
    /// Error text on FAILED.
    pub error: Option<String>,
    /// Opaque metadata blob.
    pub metadata: Option<serde_json::Value>,
    /// Last time a status update was observed for this task — used by the
    /// lease-recovery sweep, independent of `started_at`.
    pub last_heartbeat_at: DateTime<Utc>,
}

impl AgentTask {
    /// Construct a new PENDING task.
    pub fn new(
        id: String,
        codebase_id: String,
        title: String,
        prompt: String,
        agent_type: String,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            codebase_id,
            title,
            prompt,
            agent_type,
            status: AgentTaskState::Pending,
            priority,
            created_at: now,
            started_at: None,
            completed_at: None,
            worker_id: None,
            result: None,
            error: None,
            metadata: None,
            last_heartbeat_at: now,
        }
    }
}

/// Transient registration status of a [`Worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Heartbeating within the freshness horizon.
    Online,
    /// Missed heartbeats beyond the stale horizon (3x heartbeat interval).
    Stale,
}

/// An external process that polls for and executes [`AgentTask`]s.
///
/// Workers are transient: they re-register on restart, and the server
/// evicts entries whose `last_seen` exceeds the stale horizon. Persisting
/// this table is optional (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Caller-supplied unique id.
    pub worker_id: String,
    /// Human-readable name.
    pub name: String,
    /// Declared capabilities / agent types this worker can execute.
    pub capabilities: Vec<String>,
    /// Reporting hostname.
    pub hostname: String,
    /// First registration time.
    pub registered_at: DateTime<Utc>,
    /// Last heartbeat or poll time.
    pub last_seen: DateTime<Utc>,
    /// Derived liveness status.
    pub status: WorkerStatus,
}
