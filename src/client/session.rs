//! Work session — drives the fetch → present → collect → advance cycle
//! for one job.
//!
//! A session is an explicitly constructed object owning its task queue,
//! results buffer, and timer; nothing is global, so multiple sessions
//! (and tests) can run side by side. It is driven by a single command
//! loop: the periodic save timer, the host's online signal, and work
//! completion all arrive as messages, so concurrent save triggers
//! naturally collapse into one guarded attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::client::cache::KeyedCache;
use crate::client::queue::TaskQueue;
use crate::client::results::ResultsBuffer;
use crate::client::synced::SyncEvent;
use crate::client::transport::Transport;
use crate::config::SessionConfig;
use crate::error::SyncError;
use crate::model::TaskPayload;

/// Receives tasks as they become current. The host calls
/// `SessionHandle::complete` once the worker finishes one.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn present(&self, task: TaskPayload);
}

enum Command {
    Complete(Value),
    Save,
    Refresh,
    Shutdown,
}

/// Clonable handle for driving a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Deliver the result for the currently presented task.
    pub async fn complete(&self, result: Value) {
        let _ = self.tx.send(Command::Complete(result)).await;
    }

    /// Request a save attempt (also the hook for "device came online").
    pub async fn save(&self) {
        let _ = self.tx.send(Command::Save).await;
    }

    /// Refresh the roster from the server and resume if it was empty.
    pub async fn refresh(&self) {
        let _ = self.tx.send(Command::Refresh).await;
    }

    /// Stop the session loop.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

/// One worker's session against one job.
pub struct WorkSession {
    queue: TaskQueue,
    results: ResultsBuffer,
    handler: Arc<dyn WorkHandler>,
    events: broadcast::Sender<SyncEvent>,
    rx: mpsc::Receiver<Command>,
    save_interval: Duration,
}

impl WorkSession {
    /// Build a session plus its driving handle and an event receiver for
    /// status indicators.
    pub fn new(
        job: impl AsRef<str>,
        config: &SessionConfig,
        cache: Arc<dyn KeyedCache>,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn WorkHandler>,
    ) -> (Self, SessionHandle, broadcast::Receiver<SyncEvent>) {
        let job = job.as_ref();
        let (events, events_rx) = broadcast::channel(64);
        let (tx, rx) = mpsc::channel(64);

        let queue = TaskQueue::new(
            job,
            &config.base_url,
            Arc::clone(&cache),
            Arc::clone(&transport),
            events.clone(),
        );
        let results = ResultsBuffer::new(
            job,
            &config.base_url,
            cache,
            transport,
            events.clone(),
        );

        let session = Self {
            queue,
            results,
            handler,
            events,
            rx,
            save_interval: config.save_interval,
        };
        (session, SessionHandle { tx }, events_rx)
    }

    /// Run the session until shutdown.
    ///
    /// Startup order matters: both mirrors are loaded from cache before
    /// anything else binds, the roster is refreshed if the network
    /// allows, the first task is presented, and any results left over
    /// from a prior session are submitted immediately.
    pub async fn run(mut self) -> Result<(), SyncError> {
        self.queue.load_from_cache().await?;
        self.results.load_from_cache().await?;

        let mut saved_events = self.events.subscribe();
        let mut ticker = tokio::time::interval(self.save_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        if let Err(e) = self.queue.update().await {
            debug!(error = %e, "Roster refresh deferred");
        }
        self.advance().await;
        self.try_save().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.try_save().await,

                event = saved_events.recv() => match event {
                    // A confirmed save doubles as a queue refresh.
                    Ok(SyncEvent::Saved { response, .. }) => self.absorb_refill(response).await,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                command = self.rx.recv() => match command {
                    Some(Command::Complete(result)) => self.complete(result).await,
                    Some(Command::Save) => self.try_save().await,
                    Some(Command::Refresh) => self.refresh().await,
                    Some(Command::Shutdown) | None => break,
                },
            }
        }
        Ok(())
    }

    /// Present the earliest not-done task, or signal that the queue is
    /// exhausted. Image-typed files are decoded into renderable bytes on
    /// the way out.
    async fn advance(&mut self) {
        let Some(task_id) = self.queue.latest_task_id() else {
            let _ = self.events.send(SyncEvent::Empty);
            return;
        };

        match self.queue.get_task(&task_id).await {
            Ok(mut task) => {
                decode_image_files(&mut task);
                self.results.start(&task_id);
                self.handler.present(task).await;
            }
            Err(e) => {
                warn!(task_id, error = %e, "Failed to resolve current task");
                let _ = self.events.send(SyncEvent::Error(e.to_string()));
            }
        }
    }

    /// Record a finished task and move on.
    async fn complete(&mut self, result: Value) {
        let Some(task_id) = self.results.open_task().map(str::to_string) else {
            warn!("Completion received with no open task");
            return;
        };

        if let Err(e) = self.queue.mark_done(&task_id).await {
            warn!(task_id, error = %e, "Failed to mark task done");
        }
        if let Err(e) = self.results.finish(result).await {
            warn!(task_id, error = %e, "Failed to record result");
        }
        self.advance().await;
    }

    async fn try_save(&mut self) {
        if let Err(e) = self.results.save().await {
            debug!(error = %e, "Deferred result save");
        }
    }

    async fn refresh(&mut self) {
        if self.queue.update().await.is_ok() && self.results.open_task().is_none() {
            self.advance().await;
        }
    }

    /// Feed a save response back into the roster; if the session had
    /// stalled on an empty queue, fresh entries resume it.
    async fn absorb_refill(&mut self, response: Value) {
        if let Err(e) = self.queue.absorb(response).await {
            debug!(error = %e, "Ignored malformed refill payload");
        }
        if self.results.open_task().is_none() && self.queue.latest_task_id().is_some() {
            self.advance().await;
        }
    }
}

/// Decode base64 image files into raw bytes for rendering.
fn decode_image_files(task: &mut TaskPayload) {
    for file in &mut task.files {
        if file.kind.starts_with("image") && file.bytes.is_none() {
            match STANDARD.decode(file.file.as_bytes()) {
                Ok(bytes) => file.bytes = Some(bytes),
                Err(e) => warn!(name = %file.name, error = %e, "Undecodable image payload"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::cache::MemoryCache;
    use crate::client::testing::FakeTransport;
    use serde_json::json;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Forwards presented tasks into a channel the test can await.
    struct ChannelHandler {
        tx: mpsc::Sender<TaskPayload>,
    }

    #[async_trait]
    impl WorkHandler for ChannelHandler {
        async fn present(&self, task: TaskPayload) {
            let _ = self.tx.send(task).await;
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            base_url: "http://test".to_string(),
            // Long enough that only explicit saves fire during a test.
            save_interval: Duration::from_secs(60),
            ..SessionConfig::default()
        }
    }

    fn payload_json(id: &str) -> Value {
        json!({
            "id": id,
            "type": "image-select",
            "data": {},
            "files": []
        })
    }

    async fn start_session(
        cache: Arc<dyn KeyedCache>,
        transport: Arc<FakeTransport>,
    ) -> (
        SessionHandle,
        mpsc::Receiver<TaskPayload>,
        broadcast::Receiver<SyncEvent>,
    ) {
        let (task_tx, task_rx) = mpsc::channel(16);
        let (session, handle, events) = WorkSession::new(
            "j1",
            &test_config(),
            cache,
            transport,
            Arc::new(ChannelHandler { tx: task_tx }),
        );
        tokio::spawn(session.run());
        (handle, task_rx, events)
    }

    async fn next_task(rx: &mut mpsc::Receiver<TaskPayload>) -> TaskPayload {
        tokio::time::timeout(TEST_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for a task")
            .expect("session dropped the task channel")
    }

    #[tokio::test]
    async fn works_through_the_roster_then_signals_empty() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_get(Ok(json!({"tasks": ["a", "b"]})));
        transport.push_get(Ok(payload_json("a")));
        transport.push_get(Ok(payload_json("b")));
        // Saves triggered by each completion.
        transport.push_post(Ok(json!({"tasks": ["b"]})));
        transport.push_post(Ok(json!({"tasks": []})));

        let (handle, mut tasks, mut events) =
            start_session(Arc::new(MemoryCache::new()), Arc::clone(&transport)).await;

        assert_eq!(next_task(&mut tasks).await.id, "a");
        handle.complete(json!({"answer": 1})).await;

        assert_eq!(next_task(&mut tasks).await.id, "b");
        handle.complete(json!({"answer": 2})).await;

        // Queue exhausted.
        tokio::time::timeout(TEST_TIMEOUT, async {
            loop {
                if let Ok(SyncEvent::Empty) = events.recv().await {
                    break;
                }
            }
        })
        .await
        .expect("timed out waiting for the empty signal");

        // Both results went out.
        let bodies: Vec<Value> = transport.sent().into_iter().map(|(_, b)| b).collect();
        assert!(bodies.iter().any(|b| b["results"].get("a").is_some()));
        assert!(bodies.iter().any(|b| b["results"].get("b").is_some()));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn offline_session_runs_from_cache_alone() {
        let cache: Arc<dyn KeyedCache> = Arc::new(MemoryCache::new());
        cache
            .set(
                "task-queue-j1",
                &json!([{"id": "a", "done": false}]),
            )
            .await
            .unwrap();
        cache.set("tasks-j1-a", &payload_json("a")).await.unwrap();

        let transport = Arc::new(FakeTransport::new());
        transport.set_online(false);

        let (handle, mut tasks, _events) = start_session(cache, Arc::clone(&transport)).await;

        let task = next_task(&mut tasks).await;
        assert_eq!(task.id, "a");

        // Completing offline queues the result locally, no network.
        handle.complete(json!({"answer": 1})).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(transport.sent().is_empty());

        // The online signal flushes it.
        transport.set_online(true);
        transport.push_post(Ok(json!({"tasks": []})));
        handle.save().await;
        tokio::time::timeout(TEST_TIMEOUT, async {
            while transport.sent().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for the flush");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn leftover_results_are_submitted_at_startup() {
        let cache: Arc<dyn KeyedCache> = Arc::new(MemoryCache::new());
        cache
            .set(
                "result-data-j1",
                &json!({"t0": {"results": {"n": 0}, "started": 1, "completed": 2}}),
            )
            .await
            .unwrap();

        let transport = Arc::new(FakeTransport::new());
        transport.push_get(Ok(json!({"tasks": []})));
        transport.push_post(Ok(json!({"tasks": []})));

        let (handle, _tasks, _events) = start_session(cache, Arc::clone(&transport)).await;

        tokio::time::timeout(TEST_TIMEOUT, async {
            while transport.sent().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for the startup save");

        let (_, body) = &transport.sent()[0];
        assert!(body["results"].get("t0").is_some());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn refill_after_empty_resumes_the_session() {
        let cache: Arc<dyn KeyedCache> = Arc::new(MemoryCache::new());
        // One leftover pending result and an initially empty roster.
        cache
            .set(
                "result-data-j1",
                &json!({"t0": {"results": {}, "started": 1, "completed": 2}}),
            )
            .await
            .unwrap();

        let transport = Arc::new(FakeTransport::new());
        transport.push_get(Ok(json!({"tasks": []})));
        // The save response refills the queue.
        transport.push_post(Ok(json!({"tasks": ["a"]})));
        transport.push_get(Ok(payload_json("a")));

        let (handle, mut tasks, _events) = start_session(cache, transport).await;

        // The refreshed roster surfaces a new current task.
        assert_eq!(next_task(&mut tasks).await.id, "a");
        handle.shutdown().await;
    }

    #[test]
    fn image_files_are_decoded_for_rendering() {
        let mut task: TaskPayload = serde_json::from_value(json!({
            "id": "a",
            "type": "image-select",
            "data": {},
            "files": [
                {"name": "p.png", "type": "image/png", "file": "aGVsbG8=", "data": null},
                {"name": "notes.txt", "type": "text/plain", "file": "aGVsbG8=", "data": null}
            ]
        }))
        .unwrap();

        decode_image_files(&mut task);
        assert_eq!(task.files[0].bytes.as_deref(), Some(b"hello".as_slice()));
        assert!(task.files[1].bytes.is_none());
    }
}
