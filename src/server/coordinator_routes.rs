//! The coordinator's plain-REST surface: health, agent discovery, the
//! monitor SSE firehose, worker registration, and the work queue.
//!
//! Kept separate from [`super::axum_integration`] (the JSON-RPC/SSE A2A
//! front end) because this surface is REST, not JSON-RPC — callers merge
//! both routers with [`axum::Router::merge`]. Grounded in the reference
//! implementation's plain FastAPI routes alongside its JSON-RPC endpoint
//! (`a2a_server.server`'s `/agents`, `/health`) and the worker polling
//! surface implied by `agent_worker.worker`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::A2AError;

use super::axum_integration::sse_response;
use super::broker::{task_channel, Broker, SharedBroker};
use super::queue::model::{AgentTask, AgentTaskState};
use super::queue::store::{AgentTaskFilter, SharedAgentTaskStore};
use super::queue::workers::WorkerCoordinator;

/// Shared state for the coordinator REST routes.
#[derive(Clone)]
pub struct CoordinatorState {
    /// Pub/sub broker, tapped by `/monitor/stream` and the agent registry.
    pub broker: SharedBroker,
    /// Work queue persistence.
    pub tasks: SharedAgentTaskStore,
    /// Worker liveness tracker.
    pub workers: Arc<WorkerCoordinator>,
}

/// Build the coordinator's REST router. Merge with [`super::a2a_router`]
/// to serve both surfaces from one axum app.
pub fn coordinator_router(state: CoordinatorState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/agents", get(list_agents))
        .route("/monitor/stream", get(monitor_stream))
        .route("/workers/register", post(register_worker))
        .route("/workers/{worker_id}/heartbeat", post(worker_heartbeat))
        .route("/workers/{worker_id}/unregister", post(unregister_worker))
        .route("/workers", get(list_workers))
        .route("/codebases", get(list_codebases).post(create_codebase))
        .route("/codebases/{codebase_id}/tasks", post(enqueue_task))
        .route("/tasks", get(list_queued_tasks))
        .route("/tasks/{task_id}/claim", post(claim_task))
        .route("/tasks/{task_id}/status", put(update_task_status))
        .route("/tasks/{task_id}/cancel", post(cancel_queued_task))
        .route("/tasks/{task_id}/output", post(push_task_output))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy", "timestamp": chrono::Utc::now() }))
}

/// `GET /agents` — list agents currently known to the pub/sub registry,
/// i.e. those that have published or been explicitly registered recently
/// enough to pass the broker's freshness horizon.
async fn list_agents(State(state): State<CoordinatorState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.broker.discover_agents().await?))
}

/// `GET /monitor/stream` — an SSE firehose of every event published through
/// the broker, regardless of channel. Intended for dashboards/debugging;
/// grounded in `EventQueue`'s existing subscribe-and-forward SSE pattern,
/// applied here to the broker instead of a single task's queue.
async fn monitor_stream(State(state): State<CoordinatorState>) -> Response {
    let mut subscription = state.broker.subscribe_monitor().await;
    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => yield Ok(Event::default().event("broker").data(json)),
                Err(e) => warn!(error = %e, "failed to serialize broker event for monitor stream"),
            }
        }
    };
    sse_response(stream)
}

#[derive(Debug, Deserialize)]
struct RegisterWorkerRequest {
    worker_id: String,
    name: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    hostname: String,
}

async fn register_worker(
    State(state): State<CoordinatorState>,
    Json(request): Json<RegisterWorkerRequest>,
) -> impl IntoResponse {
    let worker = state
        .workers
        .register(request.worker_id, request.name, request.capabilities, request.hostname)
        .await;
    Json(worker)
}

async fn worker_heartbeat(
    State(state): State<CoordinatorState>,
    Path(worker_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.workers.heartbeat(&worker_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn unregister_worker(State(state): State<CoordinatorState>, Path(worker_id): Path<String>) -> impl IntoResponse {
    state.workers.unregister(&worker_id).await;
    StatusCode::NO_CONTENT
}

async fn list_workers(State(state): State<CoordinatorState>) -> impl IntoResponse {
    Json(state.workers.list_workers().await)
}

#[derive(Debug, Deserialize)]
struct CreateCodebaseRequest {
    id: String,
    name: String,
    path: String,
}

async fn list_codebases(State(state): State<CoordinatorState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.tasks.list_codebases().await?))
}

async fn create_codebase(
    State(state): State<CoordinatorState>,
    Json(request): Json<CreateCodebaseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let codebase = super::queue::model::Codebase::new(request.id, request.name, request.path);
    state.tasks.upsert_codebase(codebase.clone()).await?;
    Ok(Json(codebase))
}

#[derive(Debug, Deserialize)]
struct EnqueueTaskRequest {
    id: String,
    title: String,
    prompt: String,
    #[serde(default = "default_agent_type")]
    agent_type: String,
    #[serde(default)]
    priority: i32,
}

fn default_agent_type() -> String {
    "generic".to_string()
}

async fn enqueue_task(
    State(state): State<CoordinatorState>,
    Path(codebase_id): Path<String>,
    Json(request): Json<EnqueueTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = AgentTask::new(
        request.id,
        codebase_id,
        request.title,
        request.prompt,
        request.agent_type,
        request.priority,
    );
    state.tasks.create_task(task.clone()).await?;
    debug!(task_id = %task.id, "agent task enqueued via REST");
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
struct ListQueuedTasksQuery {
    status: Option<AgentTaskState>,
    codebase_id: Option<String>,
    worker_id: Option<String>,
}

/// `GET /tasks?status=pending&worker_id=…` — a polling worker's view of
/// claimable work, filtered to the codebases bound to it. `worker_id` and
/// `codebase_id` combine (both narrow the result); passing neither returns
/// every task matching `status`.
async fn list_queued_tasks(
    State(state): State<CoordinatorState>,
    Query(query): Query<ListQueuedTasksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut codebase_ids = query.codebase_id.map(|id| vec![id]);
    if let Some(worker_id) = query.worker_id {
        let bound: Vec<String> = state
            .tasks
            .list_codebases()
            .await?
            .into_iter()
            .filter(|c| c.worker_id.as_deref() == Some(worker_id.as_str()))
            .map(|c| c.id)
            .collect();
        codebase_ids = Some(match codebase_ids {
            Some(explicit) => bound.into_iter().filter(|id| explicit.contains(id)).collect(),
            None => bound,
        });
    }
    let filter = AgentTaskFilter {
        status: query.status,
        codebase_ids,
    };
    Ok(Json(state.tasks.list_tasks(&filter).await?))
}

#[derive(Debug, Deserialize)]
struct ClaimTaskRequest {
    worker_id: String,
}

/// `POST /tasks/{task_id}/claim?worker_id=…` — claim the task the URL
/// names, not merely the highest-priority pending one. 404s if no such
/// task exists, 409s if it exists but isn't claimable (already claimed,
/// cancelled, etc).
async fn claim_task(
    State(state): State<CoordinatorState>,
    Path(task_id): Path<String>,
    Query(query): Query<ClaimTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claimed = state.tasks.claim_specific(&task_id, &query.worker_id).await?;
    Ok(Json(claimed))
}

#[derive(Debug, Deserialize)]
struct UpdateTaskStatusRequest {
    worker_id: String,
    status: AgentTaskState,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

async fn update_task_status(
    State(state): State<CoordinatorState>,
    Path(task_id): Path<String>,
    Json(request): Json<UpdateTaskStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .tasks
        .update_status(&task_id, &request.worker_id, request.status, request.result, request.error)
        .await?;
    Ok(Json(task))
}

async fn cancel_queued_task(
    State(state): State<CoordinatorState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.tasks.cancel_task(&task_id).await?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
struct TaskOutputChunk {
    output: String,
}

/// `POST /tasks/{id}/output` — a worker streams output produced while
/// running a task. Fanned into the task's own `task:<id>` broker channel so
/// any SSE subscriber watching that task sees it alongside status events.
async fn push_task_output(
    State(state): State<CoordinatorState>,
    Path(task_id): Path<String>,
    Json(chunk): Json<TaskOutputChunk>,
) -> Result<impl IntoResponse, ApiError> {
    state.tasks.get_task(&task_id).await?.ok_or_else(|| A2AError::AgentTaskNotFound(task_id.clone()))?;
    state
        .broker
        .publish_to_channel(
            &task_channel(&task_id),
            serde_json::json!({ "type": "output", "task_id": task_id, "output": chunk.output }),
        )
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Thin wrapper so [`A2AError`] can be returned directly from axum handlers.
struct ApiError(A2AError);

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            A2AError::AgentTaskNotFound(_) | A2AError::WorkerNotFound(_) | A2AError::CodebaseNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            A2AError::AgentTaskConflict(_) => StatusCode::CONFLICT,
            A2AError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<A2AError> for ApiError {
    fn from(err: A2AError) -> Self {
        ApiError(err)
    }
}
