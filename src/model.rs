//! Core data model — jobs, tasks, results, and their wire shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Millisecond Unix epoch timestamp, the wire format for result timing.
pub type EpochMs = i64;

/// Current time in millisecond epoch form.
pub fn now_ms() -> EpochMs {
    chrono::Utc::now().timestamp_millis()
}

/// A named unit of work comprising many tasks.
///
/// Immutable once created; `ended` marks the job closed and visible in
/// the public job listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional external backend: when set, the corresponding task
    /// operations are proxied verbatim instead of using local persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<JobApi>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended: Option<chrono::DateTime<chrono::Utc>>,
}

/// External API passthrough endpoints for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobApi {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get_tasks: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get_task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_result: Option<String>,
}

/// One discrete work item within a job.
///
/// A task is available while `results` is empty; `assigned` holds the
/// soft leases (worker ids) and is cleared whenever a result is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub job: Uuid,
    pub data: Value,
    #[serde(default)]
    pub files: Vec<FileRef>,
    #[serde(default)]
    pub assigned: Vec<String>,
    #[serde(default)]
    pub results: Vec<Uuid>,
}

/// A file attached to a task: either a filesystem path or an http(s) URL,
/// plus metadata carried through to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub data: Value,
}

/// One worker's submitted answer for a task. Its creation is the sole
/// event that closes the task to further assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: Uuid,
    pub task: Uuid,
    pub worker: String,
    pub data: Value,
    pub started: EpochMs,
    pub completed: EpochMs,
}

/// The full task payload handed to a worker, with every file inlined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    #[serde(default)]
    pub files: Vec<InlineFile>,
}

/// A file with its content inlined as base64, regardless of whether the
/// original was a local path or a remote URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineFile {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub file: String,
    #[serde(default)]
    pub data: Value,
    /// Decoded content, populated client-side for renderable (image) files.
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
}

/// Task-queue fetch response: an ordered list of task ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueResponse {
    pub tasks: Vec<String>,
}

/// Client-local projection of a task's completion state. Roster order is
/// authoritative for what to work on next; `done` is advisory client
/// state and never pushed back to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub done: bool,
}

/// A pending result awaiting server acknowledgement. Lives in the local
/// cache from the moment work finishes until a save is confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub results: Value,
    pub started: EpochMs,
    pub completed: EpochMs,
}

/// Lightweight job listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}
