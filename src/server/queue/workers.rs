//! Worker registry, heartbeat tracking, and the watch-mode dispatch loop.
//!
//! Workers are external processes that poll `claim_next`/push status updates
//! over the REST surface (`spec.md` §4.5, §6). The coordinator here is the
//! in-process counterpart: it tracks liveness and, when a codebase has watch
//! mode enabled, runs a background loop that claims and dispatches tasks on
//! workers' behalf through an [`AgentRouter`](super::super::router::AgentRouter),
//! mirroring the reference implementation's `agent_worker.worker` poll loop
//! but pushed server-side so a watched codebase makes progress without an
//! external poller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{A2AError, A2AResult};
use crate::server::agent_executor::{AgentExecutor, RequestContext};
use crate::server::event_queue::EventQueue;
use crate::types::{Message, Part, Role};

use super::model::{Worker, WorkerStatus};
use super::store::AgentTaskStore;

/// Tracks registered workers and their liveness, and drives the watch-mode
/// auto-dispatch loop described in `spec.md` §4.5.
pub struct WorkerCoordinator {
    store: Arc<dyn AgentTaskStore>,
    config: QueueConfig,
    workers: RwLock<HashMap<String, Worker>>,
}

impl WorkerCoordinator {
    /// Construct a coordinator bound to the given task store and timing config.
    pub fn new(store: Arc<dyn AgentTaskStore>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new worker, or refresh an already-registered one.
    pub async fn register(
        &self,
        worker_id: String,
        name: String,
        capabilities: Vec<String>,
        hostname: String,
    ) -> Worker {
        let now = Utc::now();
        let mut workers = self.workers.write().await;
        let worker = workers
            .entry(worker_id.clone())
            .and_modify(|w| {
                w.last_seen = now;
                w.status = WorkerStatus::Online;
            })
            .or_insert_with(|| Worker {
                worker_id: worker_id.clone(),
                name,
                capabilities,
                hostname,
                registered_at: now,
                last_seen: now,
                status: WorkerStatus::Online,
            });
        info!(worker_id = %worker.worker_id, "worker registered");
        worker.clone()
    }

    /// Record a heartbeat for an already-registered worker.
    pub async fn heartbeat(&self, worker_id: &str) -> A2AResult<()> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| A2AError::WorkerNotFound(worker_id.to_string()))?;
        worker.last_seen = Utc::now();
        worker.status = WorkerStatus::Online;
        Ok(())
    }

    /// Deregister a worker explicitly (graceful shutdown).
    pub async fn unregister(&self, worker_id: &str) {
        let mut workers = self.workers.write().await;
        if workers.remove(worker_id).is_some() {
            debug!(worker_id, "worker unregistered");
        }
    }

    /// List all known workers, with `status` reflecting current staleness.
    pub async fn list_workers(&self) -> Vec<Worker> {
        self.workers.read().await.values().cloned().collect()
    }

    /// Mark workers stale if they have missed
    /// `stale_after_missed_heartbeats * heartbeat_interval` worth of heartbeats.
    /// Returns the ids newly marked stale.
    pub async fn sweep_stale_workers(&self) -> Vec<String> {
        let horizon = self.config.heartbeat_interval * self.config.stale_after_missed_heartbeats;
        let now = Utc::now();
        let mut newly_stale = Vec::new();
        let mut workers = self.workers.write().await;
        for worker in workers.values_mut() {
            if worker.status == WorkerStatus::Online {
                let elapsed = now - worker.last_seen;
                if elapsed.to_std().unwrap_or(Duration::ZERO) > horizon {
                    worker.status = WorkerStatus::Stale;
                    warn!(worker_id = %worker.worker_id, "worker marked stale");
                    newly_stale.push(worker.worker_id.clone());
                }
            }
        }
        newly_stale
    }

    /// Run the periodic lease-recovery and worker-staleness sweeps until the
    /// process shuts down. Intended to be spawned once as a background task.
    pub async fn run_sweep_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        loop {
            ticker.tick().await;
            let revived = self
                .store
                .sweep_expired_leases(
                    chrono::Duration::from_std(self.config.lease_timeout)
                        .unwrap_or(chrono::Duration::seconds(60)),
                    Utc::now(),
                )
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "lease sweep failed");
                    Vec::new()
                });
            if !revived.is_empty() {
                info!(count = revived.len(), "revived expired agent task leases");
            }
            self.sweep_stale_workers().await;
        }
    }

    /// Drive a single watch-mode dispatch cycle for `codebase_id`: claim the
    /// next pending task (if any) and execute it synchronously through
    /// `router`. Mutation of the owning codebase's status is the caller's
    /// responsibility, kept outside this method per the "owner API only"
    /// design note (`spec.md` §9) — this method only touches the task table.
    pub async fn dispatch_one(
        &self,
        codebase_id: &str,
        watch_worker_id: &str,
        router: &dyn AgentExecutor,
    ) -> A2AResult<bool> {
        let claimed = self
            .store
            .claim_next(watch_worker_id, Some(std::slice::from_ref(&codebase_id.to_string())))
            .await?;
        let Some(task) = claimed else {
            return Ok(false);
        };

        debug!(task_id = %task.id, codebase_id, "watch mode dispatching task");

        let context = RequestContext {
            task_id: task.id.clone(),
            context_id: task.codebase_id.clone(),
            message: Some(Message {
                message_id: format!("watch-{}", task.id),
                role: Role::User,
                kind: "message".to_string(),
                parts: vec![Part::text(&task.prompt)],
                context_id: Some(task.codebase_id.clone()),
                task_id: Some(task.id.clone()),
                metadata: None,
                extensions: None,
                reference_task_ids: None,
            }),
            task: None,
            configuration: None,
            related_tasks: vec![],
            metadata: None,
            call_context: None,
        };

        let queue = EventQueue::with_default_capacity();
        let outcome = router.execute(context, queue).await;

        match outcome {
            Ok(()) => {
                self.store
                    .update_status(
                        &task.id,
                        watch_worker_id,
                        super::model::AgentTaskState::Completed,
                        Some("dispatched via watch mode".to_string()),
                        None,
                    )
                    .await?;
            }
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "watch mode dispatch failed");
                self.store
                    .update_status(
                        &task.id,
                        watch_worker_id,
                        super::model::AgentTaskState::Failed,
                        None,
                        Some(err.to_string()),
                    )
                    .await?;
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::queue::model::AgentTask;
    use crate::server::queue::store::InMemoryAgentTaskStore;
    use crate::server::router::EchoHandler;

    fn coordinator() -> WorkerCoordinator {
        WorkerCoordinator::new(Arc::new(InMemoryAgentTaskStore::new()), QueueConfig::default())
    }

    #[tokio::test]
    async fn register_then_heartbeat_keeps_worker_online() {
        let coord = coordinator();
        coord
            .register("w1".into(), "worker-1".into(), vec!["generic".into()], "host".into())
            .await;
        coord.heartbeat("w1").await.unwrap();
        let workers = coord.list_workers().await;
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].status, WorkerStatus::Online);
    }

    #[tokio::test]
    async fn heartbeat_on_unknown_worker_errors() {
        let coord = coordinator();
        let err = coord.heartbeat("ghost").await.unwrap_err();
        assert!(matches!(err, A2AError::WorkerNotFound(_)));
    }

    #[tokio::test]
    async fn unregister_removes_worker() {
        let coord = coordinator();
        coord
            .register("w1".into(), "worker-1".into(), vec![], "host".into())
            .await;
        coord.unregister("w1").await;
        assert!(coord.list_workers().await.is_empty());
    }

    #[tokio::test]
    async fn dispatch_one_completes_task_via_router() {
        let store = Arc::new(InMemoryAgentTaskStore::new());
        let coord = WorkerCoordinator::new(store.clone(), QueueConfig::default());
        store
            .create_task(AgentTask::new(
                "t1".into(),
                "c1".into(),
                "title".into(),
                "do it".into(),
                "generic".into(),
                1,
            ))
            .await
            .unwrap();

        let router = EchoHandler::default();
        let dispatched = coord.dispatch_one("c1", "watch-bot", &router).await.unwrap();
        assert!(dispatched);

        let task = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.status, super::super::model::AgentTaskState::Completed);
    }

    #[tokio::test]
    async fn dispatch_one_returns_false_when_queue_empty() {
        let coord = coordinator();
        let router = EchoHandler::default();
        let dispatched = coord.dispatch_one("c1", "watch-bot", &router).await.unwrap();
        assert!(!dispatched);
    }
}
