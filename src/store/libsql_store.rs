//! libSQL store — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. Lease and result sets are
//! stored as JSON array columns; claim operations use conditional
//! `UPDATE ... WHERE` statements so concurrent assignment requests never
//! double-count a task.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{Job, Task, TaskResult};
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL database store.
///
/// Holds a single connection reused for all operations;
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Select up to `limit` candidate task ids matching `predicate`
    /// (a WHERE fragment with `?2` bound to the worker), then claim each
    /// with a conditional append. Candidates that changed state between
    /// select and update are skipped.
    async fn claim_where(
        &self,
        job: Uuid,
        worker: &str,
        limit: usize,
        predicate: &str,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let sql = format!(
            "SELECT id FROM tasks WHERE job = ?1 AND {predicate} ORDER BY rowid LIMIT ?3"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![job.to_string(), worker, limit as i64])
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut candidates = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
            candidates.push(parse_uuid(&id, "task")?);
        }

        let update = format!(
            "UPDATE tasks SET assigned = json_insert(assigned, '$[#]', ?2)
             WHERE id = ?1 AND {predicate}"
        );
        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            let changed = self
                .conn()
                .execute(&update, params![id.to_string(), worker])
                .await
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            if changed == 1 {
                claimed.push(id);
            }
        }
        Ok(claimed)
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

fn parse_uuid(s: &str, entity: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {entity} id {s:?}: {e}")))
}

fn json_column<T: serde::de::DeserializeOwned>(
    raw: &str,
    column: &str,
) -> Result<T, DatabaseError> {
    serde_json::from_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid JSON in {column}: {e}")))
}

/// Column order: 0:id, 1:name, 2:description, 3:kind, 4:api, 5:ended
fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    let id: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let name: String = row.get(1).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let description: String = row.get(2).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let kind: String = row.get(3).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let api: Option<String> = row.get(4).ok();
    let ended: Option<String> = row.get(5).ok();

    Ok(Job {
        id: parse_uuid(&id, "job")?,
        name,
        description,
        kind,
        api: match api {
            Some(raw) => Some(json_column(&raw, "jobs.api")?),
            None => None,
        },
        ended: ended.and_then(|s| {
            chrono::DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&chrono::Utc))
        }),
    })
}

/// Column order: 0:id, 1:job, 2:data, 3:files, 4:assigned, 5:results
fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let id: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let job: String = row.get(1).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let data: String = row.get(2).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let files: String = row.get(3).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let assigned: String = row.get(4).map_err(|e| DatabaseError::Query(e.to_string()))?;
    let results: String = row.get(5).map_err(|e| DatabaseError::Query(e.to_string()))?;

    Ok(Task {
        id: parse_uuid(&id, "task")?,
        job: parse_uuid(&job, "job")?,
        data: json_column(&data, "tasks.data")?,
        files: json_column(&files, "tasks.files")?,
        assigned: json_column(&assigned, "tasks.assigned")?,
        results: json_column::<Vec<String>>(&results, "tasks.results")?
            .iter()
            .map(|s| parse_uuid(s, "result"))
            .collect::<Result<_, _>>()?,
    })
}

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn create_job(&self, job: &Job) -> Result<(), DatabaseError> {
        let api = match &job.api {
            Some(api) => Some(
                serde_json::to_string(api)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            ),
            None => None,
        };
        self.conn()
            .execute(
                "INSERT INTO jobs (id, name, description, kind, api, ended)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    job.id.to_string(),
                    job.name.clone(),
                    job.description.clone(),
                    job.kind.clone(),
                    api,
                    job.ended.map(|dt| dt.to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, description, kind, api, ended FROM jobs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(e.to_string())),
        }
    }

    async fn list_ended_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, description, kind, api, ended FROM jobs
                 WHERE ended IS NOT NULL ORDER BY ended DESC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    async fn create_task(&self, task: &Task) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO tasks (id, job, data, files, assigned, results)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    task.id.to_string(),
                    task.job.to_string(),
                    task.data.to_string(),
                    serde_json::to_string(&task.files)
                        .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                    serde_json::to_string(&task.assigned)
                        .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                    serde_json::to_string(
                        &task.results.iter().map(Uuid::to_string).collect::<Vec<_>>()
                    )
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, job, data, files, assigned, results FROM tasks WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(e.to_string())),
        }
    }

    async fn tasks_assigned_to(
        &self,
        job: Uuid,
        worker: &str,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM tasks
                 WHERE job = ?1
                   AND json_array_length(results) = 0
                   AND EXISTS (
                       SELECT 1 FROM json_each(tasks.assigned)
                       WHERE json_each.value = ?2
                   )
                 ORDER BY rowid",
                params![job.to_string(), worker],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut ids = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
            ids.push(parse_uuid(&id, "task")?);
        }
        Ok(ids)
    }

    async fn claim_unassigned(
        &self,
        job: Uuid,
        worker: &str,
        limit: usize,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.claim_where(
            job,
            worker,
            limit,
            "json_array_length(assigned) = 0 AND json_array_length(results) = 0",
        )
        .await
    }

    async fn reassign_stale(
        &self,
        job: Uuid,
        worker: &str,
        limit: usize,
    ) -> Result<Vec<Uuid>, DatabaseError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.claim_where(
            job,
            worker,
            limit,
            "json_array_length(results) = 0
             AND NOT EXISTS (
                 SELECT 1 FROM json_each(tasks.assigned)
                 WHERE json_each.value = ?2
             )",
        )
        .await
    }

    async fn record_result(&self, result: &TaskResult) -> Result<(), DatabaseError> {
        let task = self
            .get_task(result.task)
            .await?
            .ok_or(DatabaseError::NotFound {
                entity: "task".to_string(),
                id: result.task,
            })?;

        self.conn()
            .execute(
                "INSERT INTO results (id, task, worker, data, started, completed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    result.id.to_string(),
                    result.task.to_string(),
                    result.worker.clone(),
                    result.data.to_string(),
                    result.started,
                    result.completed,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        // The task is no longer leased to anyone once a result exists.
        self.conn()
            .execute(
                "UPDATE tasks SET assigned = '[]',
                     results = json_insert(results, '$[#]', ?2)
                 WHERE id = ?1",
                params![task.id.to_string(), result.id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::now_ms;
    use serde_json::json;

    fn job(id: Uuid) -> Job {
        Job {
            id,
            name: "transcribe".to_string(),
            description: "transcribe scanned pages".to_string(),
            kind: "image-select".to_string(),
            api: None,
            ended: None,
        }
    }

    fn task(id: Uuid, job: Uuid) -> Task {
        Task {
            id,
            job,
            data: json!({"page": 1}),
            files: Vec::new(),
            assigned: Vec::new(),
            results: Vec::new(),
        }
    }

    async fn seeded_store(task_count: usize) -> (LibSqlStore, Uuid, Vec<Uuid>) {
        let store = LibSqlStore::memory().await.unwrap();
        let job_id = Uuid::new_v4();
        store.create_job(&job(job_id)).await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..task_count {
            let id = Uuid::new_v4();
            store.create_task(&task(id, job_id)).await.unwrap();
            ids.push(id);
        }
        (store, job_id, ids)
    }

    #[tokio::test]
    async fn job_round_trips_with_api() {
        let store = LibSqlStore::memory().await.unwrap();
        let mut j = job(Uuid::new_v4());
        j.api = Some(crate::model::JobApi {
            get_tasks: Some("http://upstream/tasks".to_string()),
            get_task: None,
            save_result: None,
        });
        store.create_job(&j).await.unwrap();

        let loaded = store.get_job(j.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "transcribe");
        assert_eq!(
            loaded.api.unwrap().get_tasks.as_deref(),
            Some("http://upstream/tasks")
        );
    }

    #[tokio::test]
    async fn claim_appends_lease_and_skips_claimed() {
        let (store, job_id, ids) = seeded_store(3).await;

        let first = store.claim_unassigned(job_id, "w1", 2).await.unwrap();
        assert_eq!(first, ids[..2]);

        // Already-claimed tasks are no longer candidates.
        let second = store.claim_unassigned(job_id, "w2", 5).await.unwrap();
        assert_eq!(second, vec![ids[2]]);

        let t = store.get_task(ids[0]).await.unwrap().unwrap();
        assert_eq!(t.assigned, vec!["w1".to_string()]);
    }

    #[tokio::test]
    async fn reassign_skips_own_leases_and_resolved_tasks() {
        let (store, job_id, ids) = seeded_store(3).await;
        store.claim_unassigned(job_id, "w1", 3).await.unwrap();

        // w1 already holds every lease, so nothing is stale for w1.
        assert!(store.reassign_stale(job_id, "w1", 5).await.unwrap().is_empty());

        // Resolve one task; it must never be re-leased.
        store
            .record_result(&TaskResult {
                id: Uuid::new_v4(),
                task: ids[0],
                worker: "w1".to_string(),
                data: json!({"answer": 42}),
                started: now_ms(),
                completed: now_ms(),
            })
            .await
            .unwrap();

        let stale = store.reassign_stale(job_id, "w2", 5).await.unwrap();
        assert_eq!(stale, vec![ids[1], ids[2]]);

        let t = store.get_task(ids[1]).await.unwrap().unwrap();
        assert_eq!(t.assigned, vec!["w1".to_string(), "w2".to_string()]);
    }

    #[tokio::test]
    async fn record_result_clears_lease_and_closes_task() {
        let (store, job_id, ids) = seeded_store(1).await;
        store.claim_unassigned(job_id, "w1", 1).await.unwrap();

        store
            .record_result(&TaskResult {
                id: Uuid::new_v4(),
                task: ids[0],
                worker: "w1".to_string(),
                data: json!({"label": "cat"}),
                started: now_ms(),
                completed: now_ms(),
            })
            .await
            .unwrap();

        let t = store.get_task(ids[0]).await.unwrap().unwrap();
        assert!(t.assigned.is_empty());
        assert_eq!(t.results.len(), 1);

        // Closed tasks disappear from every assignment path.
        assert!(store.tasks_assigned_to(job_id, "w1").await.unwrap().is_empty());
        assert!(store.claim_unassigned(job_id, "w2", 5).await.unwrap().is_empty());
        assert!(store.reassign_stale(job_id, "w2", 5).await.unwrap().is_empty());
    }
}
