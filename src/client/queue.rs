//! Client task queue — the ordered roster of what to work on, plus
//! on-demand resolution of full task payloads.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::client::cache::KeyedCache;
use crate::client::synced::{SyncEvent, SyncedResource};
use crate::client::transport::Transport;
use crate::error::SyncError;
use crate::model::{QueueResponse, RosterEntry, TaskPayload};

/// The roster of tasks for one job, mirrored locally so work continues
/// offline. Roster order is authoritative: the earliest not-done entry
/// is the current task.
pub struct TaskQueue {
    job: String,
    base_url: String,
    roster: SyncedResource<Vec<RosterEntry>>,
    /// Resolved payloads, memoized for the session.
    tasks: HashMap<String, TaskPayload>,
    cache: Arc<dyn KeyedCache>,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<SyncEvent>,
}

fn roster_transform(raw: Value) -> Result<Vec<RosterEntry>, SyncError> {
    let response: QueueResponse = serde_json::from_value(raw)
        .map_err(|e| SyncError::App(format!("unexpected queue payload: {e}")))?;
    Ok(response
        .tasks
        .into_iter()
        .map(|id| RosterEntry { id, done: false })
        .collect())
}

impl TaskQueue {
    pub fn new(
        job: impl Into<String>,
        base_url: impl Into<String>,
        cache: Arc<dyn KeyedCache>,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        let job = job.into();
        let base_url = base_url.into();
        let roster = SyncedResource::new(
            format!("{base_url}/jobs/{job}"),
            format!("task-queue-{job}"),
            Vec::new(),
            Arc::clone(&cache),
            Arc::clone(&transport),
            events.clone(),
            Some(Box::new(roster_transform)),
        );
        Self {
            job,
            base_url,
            roster,
            tasks: HashMap::new(),
            cache,
            transport,
            events,
        }
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.roster.data
    }

    pub async fn load_from_cache(&mut self) -> Result<(), SyncError> {
        self.roster.load_from_cache().await
    }

    /// Refresh the roster from the server if possible (no-op offline).
    pub async fn update(&mut self) -> Result<(), SyncError> {
        self.roster.update().await?;
        Ok(())
    }

    /// Replace the roster from a raw payload, e.g. the response to a
    /// successful result save. Payloads without a `tasks` field (such as
    /// a passthrough backend's bare acknowledgement) are ignored.
    pub async fn absorb(&mut self, raw: Value) -> Result<(), SyncError> {
        if raw.get("tasks").is_none() {
            return Ok(());
        }
        self.roster.absorb(raw).await
    }

    /// The first not-done entry, or `None` when the queue is exhausted.
    pub fn latest_task_id(&self) -> Option<String> {
        self.roster
            .data
            .iter()
            .find(|entry| !entry.done)
            .map(|entry| entry.id.clone())
    }

    fn task_resource(&self, task_id: &str) -> SyncedResource<Option<TaskPayload>> {
        SyncedResource::new(
            format!("{}/jobs/{}/tasks/{}", self.base_url, self.job, task_id),
            format!("tasks-{}-{}", self.job, task_id),
            None,
            Arc::clone(&self.cache),
            Arc::clone(&self.transport),
            self.events.clone(),
            Some(Box::new(|raw| {
                let payload: TaskPayload = serde_json::from_value(raw)
                    .map_err(|e| SyncError::App(format!("unexpected task payload: {e}")))?;
                Ok(Some(payload))
            })),
        )
    }

    /// Resolve a task's full payload: session memo first, then the local
    /// cache, then the network.
    pub async fn get_task(&mut self, task_id: &str) -> Result<TaskPayload, SyncError> {
        if let Some(task) = self.tasks.get(task_id) {
            return Ok(task.clone());
        }

        let mut resource = self.task_resource(task_id);
        resource.load_from_cache().await?;
        if resource.data.is_none() {
            resource.update().await?;
        }

        let payload = resource
            .data
            .clone()
            .ok_or_else(|| SyncError::App(format!("task {task_id} unavailable offline")))?;
        self.tasks.insert(task_id.to_string(), payload.clone());
        Ok(payload)
    }

    /// Flip a roster entry's done flag, drop the resolved payload and its
    /// cache entry (no longer needed), and persist the updated roster.
    pub async fn mark_done(&mut self, task_id: &str) -> Result<(), SyncError> {
        for entry in &mut self.roster.data {
            if entry.id == task_id {
                entry.done = true;
            }
        }
        self.tasks.remove(task_id);
        self.cache
            .remove(&format!("tasks-{}-{}", self.job, task_id))
            .await?;
        self.roster.save_to_cache().await
    }
}
