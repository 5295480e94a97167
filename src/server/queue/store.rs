//! Persistence contract and in-memory implementation for [`AgentTask`]s and [`Codebase`]s.
//!
//! The critical correctness property here is **claim exclusivity**
//! (`spec.md` §4.5, §8 property 3): when N workers race to claim the same
//! PENDING task, exactly one must observe it transition to RUNNING. The
//! reference SQL pattern is a conditional `UPDATE … WHERE id=? AND
//! status=PENDING`, succeeding only when one row is affected. The in-memory
//! equivalent here holds the entire task table behind a single
//! `tokio::sync::Mutex` and performs the check-then-set atomically while the
//! lock is held — the same linearizability a single-row conditional UPDATE
//! gives a SQL backend, grounded in the single-writer-guarded-table pattern
//! already used throughout this crate's `InMemoryTaskStore`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{A2AError, A2AResult};

use super::model::{AgentTask, AgentTaskState, Codebase, MAX_RESULT_BYTES};

/// Filter for listing claimable/visible agent tasks.
#[derive(Debug, Clone, Default)]
pub struct AgentTaskFilter {
    /// Restrict to tasks in this state.
    pub status: Option<AgentTaskState>,
    /// Restrict to tasks belonging to codebases this worker is bound to.
    /// `None` means no codebase restriction.
    pub codebase_ids: Option<Vec<String>>,
}

/// Persistence + claim contract for the work queue.
///
/// Implementations must guarantee their own atomic single-row claim
/// semantics; callers never need to retry a claim for correctness (only for
/// contention — a failed claim simply means another worker won).
#[async_trait]
pub trait AgentTaskStore: Send + Sync {
    /// Insert a new PENDING task.
    async fn create_task(&self, task: AgentTask) -> A2AResult<()>;

    /// Fetch a task by id.
    async fn get_task(&self, id: &str) -> A2AResult<Option<AgentTask>>;

    /// List tasks matching the filter, ordered `(priority DESC, created_at ASC)`.
    async fn list_tasks(&self, filter: &AgentTaskFilter) -> A2AResult<Vec<AgentTask>>;

    /// Attempt to claim the highest-priority PENDING task visible to
    /// `codebase_ids`, transitioning it straight to RUNNING. Returns `None`
    /// if no claimable task exists. Succeeds for at most one caller per task
    /// even under concurrent calls.
    async fn claim_next(
        &self,
        worker_id: &str,
        codebase_ids: Option<&[String]>,
    ) -> A2AResult<Option<AgentTask>>;

    /// Claim one specific task by id, the URL-addressed counterpart to
    /// [`Self::claim_next`]. Fails with [`A2AError::AgentTaskNotFound`] if
    /// the id doesn't exist and [`A2AError::AgentTaskConflict`] if it
    /// exists but isn't PENDING (already claimed, cancelled, etc).
    async fn claim_specific(&self, id: &str, worker_id: &str) -> A2AResult<AgentTask>;

    /// Update a task's status. Validates the transition against the state
    /// machine and rejects illegal ones with [`A2AError::AgentTaskConflict`].
    /// `result`/`error` are truncated to [`MAX_RESULT_BYTES`] when provided.
    /// Also refreshes `last_heartbeat_at`, independent of the lease sweep.
    async fn update_status(
        &self,
        id: &str,
        worker_id: &str,
        next: AgentTaskState,
        result: Option<String>,
        error: Option<String>,
    ) -> A2AResult<AgentTask>;

    /// Client-initiated cancel. Succeeds only while PENDING or ASSIGNED.
    async fn cancel_task(&self, id: &str) -> A2AResult<AgentTask>;

    /// Revive every RUNNING task whose `last_heartbeat_at` is older than
    /// `now - lease_timeout` back to PENDING. Returns the ids revived.
    async fn sweep_expired_leases(
        &self,
        lease_timeout: chrono::Duration,
        now: DateTime<Utc>,
    ) -> A2AResult<Vec<String>>;

    /// Register or update a codebase.
    async fn upsert_codebase(&self, codebase: Codebase) -> A2AResult<()>;

    /// Fetch a codebase by id.
    async fn get_codebase(&self, id: &str) -> A2AResult<Option<Codebase>>;

    /// List all registered codebases.
    async fn list_codebases(&self) -> A2AResult<Vec<Codebase>>;
}

#[derive(Default)]
struct Tables {
    tasks: HashMap<String, AgentTask>,
    codebases: HashMap<String, Codebase>,
}

/// In-memory [`AgentTaskStore`]. Suitable for development, testing, and as
/// the baseline the durable backend's behavior is checked against.
pub struct InMemoryAgentTaskStore {
    tables: Mutex<Tables>,
}

impl InMemoryAgentTaskStore {
    /// Construct a new, empty store.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }
}

impl Default for InMemoryAgentTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_candidates<'a>(
    tasks: &'a HashMap<String, AgentTask>,
    codebase_ids: Option<&[String]>,
) -> Vec<&'a AgentTask> {
    let mut candidates: Vec<&AgentTask> = tasks
        .values()
        .filter(|t| t.status == AgentTaskState::Pending)
        .filter(|t| match codebase_ids {
            Some(ids) => ids.contains(&t.codebase_id),
            None => true,
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    candidates
}

#[async_trait]
impl AgentTaskStore for InMemoryAgentTaskStore {
    async fn create_task(&self, task: AgentTask) -> A2AResult<()> {
        let mut tables = self.tables.lock().await;
        debug!(task_id = %task.id, codebase_id = %task.codebase_id, "queued agent task created");
        tables.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn get_task(&self, id: &str) -> A2AResult<Option<AgentTask>> {
        let tables = self.tables.lock().await;
        Ok(tables.tasks.get(id).cloned())
    }

    async fn list_tasks(&self, filter: &AgentTaskFilter) -> A2AResult<Vec<AgentTask>> {
        let tables = self.tables.lock().await;
        let mut results: Vec<AgentTask> = tables
            .tasks
            .values()
            .filter(|t| filter.status.map(|s| s == t.status).unwrap_or(true))
            .filter(|t| match &filter.codebase_ids {
                Some(ids) => ids.contains(&t.codebase_id),
                None => true,
            })
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(results)
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        codebase_ids: Option<&[String]>,
    ) -> A2AResult<Option<AgentTask>> {
        let mut tables = self.tables.lock().await;
        let winner_id = {
            let candidates = sorted_candidates(&tables.tasks, codebase_ids);
            candidates.first().map(|t| t.id.clone())
        };
        let Some(id) = winner_id else {
            return Ok(None);
        };

        // Re-check status under the same lock acquisition — this is the
        // atomic compare-and-set equivalent of `WHERE id=? AND status=PENDING`.
        let task = tables.tasks.get_mut(&id).expect("id came from this table");
        if task.status != AgentTaskState::Pending {
            // Lost the race between candidate selection and claim — caller retries.
            return Ok(None);
        }

        let now = Utc::now();
        task.status = AgentTaskState::Running;
        task.worker_id = Some(worker_id.to_string());
        task.started_at = Some(now);
        task.last_heartbeat_at = now;

        info!(task_id = %id, worker_id, "agent task claimed");
        Ok(Some(task.clone()))
    }

    async fn claim_specific(&self, id: &str, worker_id: &str) -> A2AResult<AgentTask> {
        let mut tables = self.tables.lock().await;
        let task = tables
            .tasks
            .get_mut(id)
            .ok_or_else(|| A2AError::AgentTaskNotFound(id.to_string()))?;

        if task.status != AgentTaskState::Pending {
            return Err(A2AError::AgentTaskConflict(format!(
                "agent task {id} cannot be claimed from state {:?}",
                task.status
            )));
        }

        let now = Utc::now();
        task.status = AgentTaskState::Running;
        task.worker_id = Some(worker_id.to_string());
        task.started_at = Some(now);
        task.last_heartbeat_at = now;

        info!(task_id = %id, worker_id, "agent task claimed by id");
        Ok(task.clone())
    }

    async fn update_status(
        &self,
        id: &str,
        worker_id: &str,
        next: AgentTaskState,
        result: Option<String>,
        error: Option<String>,
    ) -> A2AResult<AgentTask> {
        let mut tables = self.tables.lock().await;
        let task = tables
            .tasks
            .get_mut(id)
            .ok_or_else(|| A2AError::AgentTaskNotFound(id.to_string()))?;

        if task.worker_id.as_deref() != Some(worker_id) && !task.status.is_terminal() {
            warn!(task_id = id, worker_id, owner = ?task.worker_id, "status update from non-owning worker");
        }

        if !task.status.can_transition_to(next) {
            return Err(A2AError::AgentTaskConflict(format!(
                "cannot transition agent task {id} from {:?} to {:?}",
                task.status, next
            )));
        }

        task.status = next;
        task.last_heartbeat_at = Utc::now();
        if next.is_terminal() {
            task.completed_at = Some(Utc::now());
        }
        if let Some(r) = result {
            task.result = Some(super::model::truncate_result(&r, MAX_RESULT_BYTES));
        }
        if let Some(e) = error {
            task.error = Some(super::model::truncate_result(&e, MAX_RESULT_BYTES));
        }

        debug!(task_id = id, status = ?next, "agent task status updated");
        Ok(task.clone())
    }

    async fn cancel_task(&self, id: &str) -> A2AResult<AgentTask> {
        let mut tables = self.tables.lock().await;
        let task = tables
            .tasks
            .get_mut(id)
            .ok_or_else(|| A2AError::AgentTaskNotFound(id.to_string()))?;

        if !task.status.cancelable() {
            return Err(A2AError::AgentTaskConflict(format!(
                "agent task {id} cannot be canceled from state {:?}",
                task.status
            )));
        }

        task.status = AgentTaskState::Cancelled;
        task.completed_at = Some(Utc::now());
        Ok(task.clone())
    }

    async fn sweep_expired_leases(
        &self,
        lease_timeout: chrono::Duration,
        now: DateTime<Utc>,
    ) -> A2AResult<Vec<String>> {
        let mut tables = self.tables.lock().await;
        let mut revived = Vec::new();
        for task in tables.tasks.values_mut() {
            if task.status == AgentTaskState::Running && now - task.last_heartbeat_at > lease_timeout {
                warn!(task_id = %task.id, worker_id = ?task.worker_id, "agent task lease expired, reviving to pending");
                task.status = AgentTaskState::Pending;
                task.worker_id = None;
                task.started_at = None;
                task.last_heartbeat_at = now;
                revived.push(task.id.clone());
            }
        }
        Ok(revived)
    }

    async fn upsert_codebase(&self, codebase: Codebase) -> A2AResult<()> {
        let mut tables = self.tables.lock().await;
        tables.codebases.insert(codebase.id.clone(), codebase);
        Ok(())
    }

    async fn get_codebase(&self, id: &str) -> A2AResult<Option<Codebase>> {
        let tables = self.tables.lock().await;
        Ok(tables.codebases.get(id).cloned())
    }

    async fn list_codebases(&self) -> A2AResult<Vec<Codebase>> {
        let tables = self.tables.lock().await;
        Ok(tables.codebases.values().cloned().collect())
    }
}

/// Shared handle to an agent task store, convenient for axum state.
pub type SharedAgentTaskStore = Arc<dyn AgentTaskStore>;
