//! Backend-agnostic store trait for jobs, tasks, and results.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{Job, Task, TaskResult};

/// Persistence operations required by the HTTP surface and the task
/// assignment service.
///
/// The claim operations are the store-native conditional updates that
/// close the read-modify-write race during assignment: a task is only
/// claimed if it is still in the expected state at write time.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Insert a new job.
    async fn create_job(&self, job: &Job) -> Result<(), DatabaseError>;

    /// Get a job by id.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// List jobs that have been closed (`ended` set).
    async fn list_ended_jobs(&self) -> Result<Vec<Job>, DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Insert a new task.
    async fn create_task(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Get a task by id.
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError>;

    /// Ids of unresolved tasks in `job` whose lease set contains `worker`,
    /// in insertion order.
    async fn tasks_assigned_to(
        &self,
        job: Uuid,
        worker: &str,
    ) -> Result<Vec<Uuid>, DatabaseError>;

    /// Atomically claim up to `limit` tasks in `job` that have no lease
    /// and no results, appending `worker` to each claimed task's lease
    /// set. Tasks claimed by a concurrent request are skipped, never
    /// double-counted. Returns the claimed ids in insertion order.
    async fn claim_unassigned(
        &self,
        job: Uuid,
        worker: &str,
        limit: usize,
    ) -> Result<Vec<Uuid>, DatabaseError>;

    /// Re-lease up to `limit` unresolved tasks in `job` that are assigned
    /// to other workers but not to `worker`. Leases are never expired by
    /// time; the first submitted result wins.
    async fn reassign_stale(
        &self,
        job: Uuid,
        worker: &str,
        limit: usize,
    ) -> Result<Vec<Uuid>, DatabaseError>;

    // ── Results ─────────────────────────────────────────────────────

    /// Persist a result, clear the task's lease set, and append the
    /// result id to the task. This is the single authoritative event
    /// that closes a task to further assignment.
    async fn record_result(&self, result: &TaskResult) -> Result<(), DatabaseError>;
}
