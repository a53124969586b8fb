//! Results buffer — completed work pending server acknowledgement.
//!
//! A record exists from the moment `finish()` returns until a save is
//! confirmed, and it lives in the durable cache, so no completed work is
//! silently dropped across disconnects, reloads, or failed submissions.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::broadcast;

use crate::client::cache::KeyedCache;
use crate::client::synced::{SyncEvent, SyncedResource};
use crate::client::transport::Transport;
use crate::error::SyncError;
use crate::model::{EpochMs, ResultRecord, now_ms};

/// The task currently being worked on.
struct OpenTask {
    id: String,
    started: EpochMs,
}

/// Pending results for one job, keyed by task id, flushed to the server
/// opportunistically.
pub struct ResultsBuffer {
    buffer: SyncedResource<BTreeMap<String, ResultRecord>>,
    open: Option<OpenTask>,
}

impl ResultsBuffer {
    pub fn new(
        job: impl AsRef<str>,
        base_url: impl AsRef<str>,
        cache: Arc<dyn KeyedCache>,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        let job = job.as_ref();
        let buffer = SyncedResource::new(
            format!("{}/jobs/{job}", base_url.as_ref()),
            format!("result-data-{job}"),
            BTreeMap::new(),
            cache,
            transport,
            events,
            None,
        );
        Self { buffer, open: None }
    }

    pub async fn load_from_cache(&mut self) -> Result<(), SyncError> {
        self.buffer.load_from_cache().await
    }

    /// Number of results awaiting server acknowledgement.
    pub fn pending(&self) -> usize {
        self.buffer.data.len()
    }

    /// The id of the currently open task, if any.
    pub fn open_task(&self) -> Option<&str> {
        self.open.as_ref().map(|open| open.id.as_str())
    }

    /// Mark a task as the currently open unit of work. Exactly one task
    /// may be open at a time; starting another replaces it.
    pub fn start(&mut self, task_id: impl Into<String>) {
        self.open = Some(OpenTask {
            id: task_id.into(),
            started: now_ms(),
        });
    }

    /// Close the open task with its result payload, persist the record,
    /// then opportunistically attempt a flush. Flush failure is silent
    /// here; the periodic save timer retries it.
    pub async fn finish(&mut self, results: Value) -> Result<(), SyncError> {
        let open = self
            .open
            .take()
            .ok_or_else(|| SyncError::App("no task is open".to_string()))?;

        self.buffer.data.insert(
            open.id,
            ResultRecord {
                results,
                started: open.started,
                completed: now_ms(),
            },
        );
        self.buffer.save_to_cache().await?;

        if let Err(e) = self.save().await {
            tracing::debug!(error = %e, "Opportunistic result flush deferred");
        }
        Ok(())
    }

    /// Flush all pending records to the server.
    ///
    /// No-op (`Ok(None)`) while a save is in flight, the device is
    /// offline, or nothing is pending. On success returns the server's
    /// response body, which doubles as a fresh task queue.
    pub async fn save(&mut self) -> Result<Option<Value>, SyncError> {
        let Some(snapshot) = self.buffer.begin_save() else {
            return Ok(None);
        };

        let transport = self.buffer.transport();
        let url = self.buffer.url().to_string();
        let body = json!({ "results": snapshot });

        match transport.post_json(&url, &body).await {
            Ok(response) => {
                if let Some(err) = self.buffer.application_error(&response) {
                    self.buffer.fail_save(&err);
                    return Err(err);
                }
                self.buffer.commit_save(snapshot, response.clone()).await?;
                Ok(Some(response))
            }
            Err(e) => {
                self.buffer.fail_save(&e);
                Err(e)
            }
        }
    }
}
