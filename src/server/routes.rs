//! HTTP surface for jobs, task queues, task payloads, and result intake.
//!
//! Jobs that declare an external `api` have the matching operations
//! proxied verbatim to that backend instead of using local persistence.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::warn;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{ApiError, DatabaseError};
use crate::model::{EpochMs, FileRef, Job, JobApi, Task, TaskPayload, TaskResult};
use crate::server::{assign, files};
use crate::store::Store;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub http: reqwest::Client,
    pub config: ServerConfig,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/{job}", get(task_queue).post(save_results))
        .route("/jobs/{job}/tasks", post(create_task))
        .route("/jobs/{job}/tasks/{task}", get(get_task))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::File { .. } | ApiError::SaveResults | ApiError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

/// Worker identity, taken from the `X-Worker-Id` header.
fn worker_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-worker-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("Missing X-Worker-Id header".to_string()))
}

async fn load_job(state: &AppState, id: Uuid) -> Result<Job, ApiError> {
    state
        .store
        .get_job(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Job".to_string()))
}

async fn proxy_get(http: &reqwest::Client, url: &str) -> Result<Value, ApiError> {
    http.get(url)
        .send()
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?
        .json()
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))
}

// ── Jobs ────────────────────────────────────────────────────────────

/// GET /jobs — jobs that have been closed, for the public job listing.
async fn list_jobs(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let jobs = state.store.list_ended_jobs().await?;
    let summaries: Vec<Value> = jobs
        .iter()
        .map(|job| {
            json!({
                "id": job.id,
                "name": job.name,
                "description": job.description,
            })
        })
        .collect();
    Ok(Json(json!(summaries)))
}

#[derive(Debug, Deserialize)]
struct CreateJob {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    api: Option<JobApi>,
}

/// POST /jobs — create a job.
async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<CreateJob>,
) -> Result<Json<Job>, ApiError> {
    let job = Job {
        id: Uuid::new_v4(),
        name: body.name,
        description: body.description,
        kind: body.kind,
        api: body.api,
        ended: None,
    };
    state.store.create_job(&job).await?;
    Ok(Json(job))
}

// ── Tasks ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateTask {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    files: Vec<FileRef>,
}

/// POST /jobs/{job}/tasks — create a task within a job.
async fn create_task(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(body): Json<CreateTask>,
) -> Result<Json<Task>, ApiError> {
    let job = load_job(&state, job_id).await?;
    let task = Task {
        id: Uuid::new_v4(),
        job: job.id,
        data: body.data,
        files: body.files,
        assigned: Vec::new(),
        results: Vec::new(),
    };
    state.store.create_task(&task).await?;
    Ok(Json(task))
}

/// The `{tasks: [...]}` queue payload for a worker, either proxied or
/// built by the assignment service.
async fn queue_payload(state: &AppState, job: &Job, worker: &str) -> Result<Value, ApiError> {
    if let Some(url) = job.api.as_ref().and_then(|api| api.get_tasks.as_deref()) {
        return proxy_get(&state.http, url).await;
    }

    let ids =
        assign::assign_tasks(state.store.as_ref(), job.id, worker, state.config.queue_size)
            .await?;
    Ok(json!({
        "tasks": ids.iter().map(Uuid::to_string).collect::<Vec<_>>()
    }))
}

/// GET /jobs/{job} — fetch this worker's task queue.
async fn task_queue(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let worker = worker_id(&headers)?;
    let job = load_job(&state, job_id).await?;
    queue_payload(&state, &job, &worker).await.map(Json)
}

/// External task shape accepted from a passthrough backend.
#[derive(Debug, Deserialize)]
struct ExternalTask {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    files: Vec<FileRef>,
}

/// GET /jobs/{job}/tasks/{task} — full task payload, files inlined.
async fn get_task(
    State(state): State<AppState>,
    Path((job_id, task_id)): Path<(Uuid, String)>,
) -> Result<Json<TaskPayload>, ApiError> {
    let job = load_job(&state, job_id).await?;

    let (data, file_refs) =
        if let Some(url) = job.api.as_ref().and_then(|api| api.get_task.as_deref()) {
            let raw = proxy_get(&state.http, url).await?;
            let external: ExternalTask = serde_json::from_value(raw)
                .map_err(|e| ApiError::Upstream(format!("invalid task payload: {e}")))?;
            (external.data, external.files)
        } else {
            let id = Uuid::parse_str(&task_id)
                .map_err(|_| ApiError::NotFound("Task".to_string()))?;
            let task = state
                .store
                .get_task(id)
                .await?
                .filter(|task| task.job == job.id)
                .ok_or_else(|| ApiError::NotFound("Task".to_string()))?;
            (task.data, task.files)
        };

    let inlined = files::inline_files(&state.http, &file_refs).await?;
    Ok(Json(TaskPayload {
        id: task_id,
        kind: job.kind.clone(),
        data,
        files: inlined,
    }))
}

// ── Results ─────────────────────────────────────────────────────────

/// One submitted result. The canonical field is `data`; `results` is
/// accepted as an alias because that is what the sync client's pending
/// buffer stores under each task id.
#[derive(Debug, Deserialize)]
struct IncomingResult {
    #[serde(alias = "results")]
    data: Value,
    started: EpochMs,
    completed: EpochMs,
}

#[derive(Debug, Deserialize)]
struct SaveResultsBody {
    results: std::collections::BTreeMap<String, IncomingResult>,
}

/// POST /jobs/{job} — record a batch of results, then respond with a
/// fresh task queue so a successful save doubles as a refill request.
///
/// Items are written with bounded concurrency. Every item is attempted
/// even if one fails; already-persisted results are not rolled back, so
/// a retried batch may produce duplicate results (accepted limitation —
/// result creation is idempotent in effect, the task stays closed).
async fn save_results(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<SaveResultsBody>,
) -> Result<Json<Value>, ApiError> {
    let worker = worker_id(&headers)?;
    let job = load_job(&state, job_id).await?;

    if let Some(url) = job.api.as_ref().and_then(|api| api.save_result.as_deref()) {
        let results: std::collections::BTreeMap<&String, Value> = body
            .results
            .iter()
            .map(|(id, r)| {
                (
                    id,
                    json!({"data": r.data, "started": r.started, "completed": r.completed}),
                )
            })
            .collect();
        state
            .http
            .post(url)
            .json(&json!({"results": results}))
            .send()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| ApiError::Upstream(e.to_string()))?;
        return Ok(Json(json!({})));
    }

    let fanout = state.config.result_fanout.max(1);
    let outcomes: Vec<Result<(), ApiError>> =
        futures::stream::iter(body.results.into_iter().map(|(id, incoming)| {
            let store = Arc::clone(&state.store);
            let worker = worker.clone();
            async move {
                let task = Uuid::parse_str(&id)
                    .map_err(|_| ApiError::BadRequest(format!("invalid task id {id:?}")))?;
                store
                    .record_result(&TaskResult {
                        id: Uuid::new_v4(),
                        task,
                        worker,
                        data: incoming.data,
                        started: incoming.started,
                        completed: incoming.completed,
                    })
                    .await?;
                Ok(())
            }
        }))
        .buffer_unordered(fanout)
        .collect()
        .await;

    let failed = outcomes.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        warn!(%job_id, worker, failed, "Result batch partially failed");
        return Err(ApiError::SaveResults);
    }

    queue_payload(&state, &job, &worker).await.map(Json)
}
