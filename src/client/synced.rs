//! Synced resource — a cached, network-backed entity with guarded
//! load/save.
//!
//! Composition replaces the inherit-and-override reuse of the original
//! design: each specialization embeds a `SyncedResource` parameterized
//! over its data shape and an optional load transform, instead of
//! extending a shared base.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::client::cache::KeyedCache;
use crate::client::transport::Transport;
use crate::error::SyncError;

/// Observable state transitions. None of these block the work cycle;
/// they exist to drive status indicators and the session's refill logic.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A save request is about to go out.
    Saving,
    /// A save was acknowledged: the snapshot that was saved, plus the
    /// server's response body (which doubles as a queue refresh).
    Saved { saved: Value, response: Value },
    /// A transport failure or an application error payload.
    Error(String),
    /// The server signalled an authentication failure; the host should
    /// redirect to its login flow rather than retry.
    LoginRequired,
    /// The roster is exhausted; waiting for upstream tasks.
    Empty,
}

/// Transform applied to a raw server response before it replaces `data`.
pub type Transform<T> = Box<dyn Fn(Value) -> Result<T, SyncError> + Send + Sync>;

/// A remote-backed value with a durable local mirror.
///
/// `update()` and the save operations are single-flight per resource:
/// while a request is outstanding, further calls resolve immediately
/// with the in-memory state instead of queuing.
pub struct SyncedResource<T> {
    url: String,
    cache_key: String,
    pub data: T,
    loading: bool,
    saving: bool,
    cache: Arc<dyn KeyedCache>,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<SyncEvent>,
    transform: Option<Transform<T>>,
}

impl<T: Serialize + DeserializeOwned> SyncedResource<T> {
    pub fn new(
        url: impl Into<String>,
        cache_key: impl Into<String>,
        initial: T,
        cache: Arc<dyn KeyedCache>,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<SyncEvent>,
        transform: Option<Transform<T>>,
    ) -> Self {
        Self {
            url: url.into(),
            cache_key: cache_key.into(),
            data: initial,
            loading: false,
            saving: false,
            cache,
            transport,
            events,
            transform,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn cache(&self) -> Arc<dyn KeyedCache> {
        Arc::clone(&self.cache)
    }

    /// Read the cached mirror into `data`. An absent key leaves the
    /// pre-seeded in-memory value untouched.
    pub async fn load_from_cache(&mut self) -> Result<(), SyncError> {
        if let Some(value) = self.cache.get(&self.cache_key).await? {
            self.data = serde_json::from_value(value)
                .map_err(|e| SyncError::Cache(format!("corrupt cache entry: {e}")))?;
        }
        Ok(())
    }

    /// Persist the current `data` to the cache.
    pub async fn save_to_cache(&self) -> Result<(), SyncError> {
        let value = serde_json::to_value(&self.data)
            .map_err(|e| SyncError::Cache(e.to_string()))?;
        self.cache.set(&self.cache_key, &value).await
    }

    /// Drop the cached mirror.
    pub async fn remove_from_cache(&self) -> Result<(), SyncError> {
        self.cache.remove(&self.cache_key).await
    }

    /// Replace `data` with a raw server payload (through the transform,
    /// if any) and persist the result. Used both by `update()` and when
    /// a save response doubles as a refresh.
    pub async fn absorb(&mut self, raw: Value) -> Result<(), SyncError> {
        self.data = match &self.transform {
            Some(transform) => transform(raw)?,
            None => serde_json::from_value(raw)
                .map_err(|e| SyncError::App(format!("unexpected payload shape: {e}")))?,
        };
        self.save_to_cache().await
    }

    /// Refresh `data` from the remote URL.
    ///
    /// Resolves immediately with the current data when a load is already
    /// in flight or the device is offline. Application error payloads
    /// abort without mutating local state.
    pub async fn update(&mut self) -> Result<&T, SyncError> {
        if self.loading || !self.transport.is_online() {
            return Ok(&self.data);
        }

        self.loading = true;
        let fetched = self.transport.get_json(&self.url).await;
        self.loading = false;

        match fetched {
            Ok(raw) => {
                if let Some(err) = self.application_error(&raw) {
                    return Err(err);
                }
                self.absorb(raw).await?;
                Ok(&self.data)
            }
            Err(e) => {
                let _ = self.events.send(SyncEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Inspect a well-formed response for an application-level error.
    /// A `login` field means authentication failed; an `error` field is
    /// surfaced as an error signal. Either way local state is untouched.
    pub(crate) fn application_error(&self, raw: &Value) -> Option<SyncError> {
        if raw.get("login").is_some_and(|v| !v.is_null() && v != false) {
            let _ = self.events.send(SyncEvent::LoginRequired);
            return Some(SyncError::LoginRequired);
        }
        if let Some(message) = raw.get("error") {
            let message = message.as_str().unwrap_or("error retrieving data").to_string();
            let _ = self.events.send(SyncEvent::Error(message.clone()));
            return Some(SyncError::App(message));
        }
        None
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }
}

/// Save operations for map-shaped resources (pending-entry buffers).
///
/// The snapshot-then-diff-remove pattern is what prevents the race
/// between "new entry arrives mid-flight" and "old entries get falsely
/// cleared": only entries proven saved are evicted.
impl<V> SyncedResource<BTreeMap<String, V>>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// Open a save attempt: `None` (a no-op) while a save is in flight,
    /// the device is offline, or there is nothing pending. Otherwise
    /// snapshots the current entries and emits `Saving`.
    pub fn begin_save(&mut self) -> Option<BTreeMap<String, V>> {
        if self.saving || !self.transport.is_online() || self.data.is_empty() {
            return None;
        }
        self.saving = true;
        self.emit(SyncEvent::Saving);
        Some(self.data.clone())
    }

    /// Conclude a successful save: remove exactly the snapshotted
    /// entries (anything added during the flight survives for the next
    /// cycle), persist, and emit `Saved`.
    pub async fn commit_save(
        &mut self,
        snapshot: BTreeMap<String, V>,
        response: Value,
    ) -> Result<(), SyncError> {
        self.saving = false;
        for key in snapshot.keys() {
            self.data.remove(key);
        }
        self.save_to_cache().await?;
        let saved = serde_json::to_value(&snapshot).map_err(|e| SyncError::Cache(e.to_string()))?;
        self.emit(SyncEvent::Saved { saved, response });
        Ok(())
    }

    /// Conclude a failed save: data is left unchanged for a later retry.
    pub fn fail_save(&mut self, error: &SyncError) {
        self.saving = false;
        if !matches!(error, SyncError::LoginRequired) {
            self.emit(SyncEvent::Error(error.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::cache::MemoryCache;
    use crate::client::testing::FakeTransport;
    use crate::model::ResultRecord;
    use serde_json::json;

    type Buffer = SyncedResource<BTreeMap<String, ResultRecord>>;

    fn record(n: i64) -> ResultRecord {
        ResultRecord {
            results: json!({"n": n}),
            started: 1_000,
            completed: 2_000,
        }
    }

    fn buffer(transport: Arc<FakeTransport>) -> (Buffer, broadcast::Receiver<SyncEvent>) {
        let (events, rx) = broadcast::channel(16);
        let resource = SyncedResource::new(
            "http://test/jobs/j1",
            "result-data-j1",
            BTreeMap::new(),
            Arc::new(MemoryCache::new()),
            transport,
            events,
            None,
        );
        (resource, rx)
    }

    #[tokio::test]
    async fn begin_save_is_noop_when_empty_or_offline() {
        let transport = Arc::new(FakeTransport::new());
        let (mut buffer, _rx) = buffer(Arc::clone(&transport));

        // Nothing pending.
        assert!(buffer.begin_save().is_none());

        buffer.data.insert("t1".to_string(), record(1));
        transport.set_online(false);
        assert!(buffer.begin_save().is_none());

        transport.set_online(true);
        assert!(buffer.begin_save().is_some());
    }

    #[tokio::test]
    async fn second_begin_save_is_noop_while_in_flight() {
        let transport = Arc::new(FakeTransport::new());
        let (mut buffer, _rx) = buffer(transport);
        buffer.data.insert("t1".to_string(), record(1));

        assert!(buffer.begin_save().is_some());
        assert!(buffer.begin_save().is_none());
    }

    #[tokio::test]
    async fn entries_added_mid_flight_survive_commit() {
        let transport = Arc::new(FakeTransport::new());
        let (mut buffer, _rx) = buffer(transport);
        buffer.data.insert("t1".to_string(), record(1));

        let snapshot = buffer.begin_save().unwrap();
        // Simulated race: a new result lands while the request is out.
        buffer.data.insert("t2".to_string(), record(2));

        buffer.commit_save(snapshot, json!({"tasks": []})).await.unwrap();

        assert!(!buffer.data.contains_key("t1"));
        assert!(buffer.data.contains_key("t2"));
    }

    #[tokio::test]
    async fn failed_save_keeps_data_and_allows_retry() {
        let transport = Arc::new(FakeTransport::new());
        let (mut buffer, _rx) = buffer(transport);
        buffer.data.insert("t1".to_string(), record(1));

        let snapshot = buffer.begin_save().unwrap();
        buffer.fail_save(&SyncError::Transport("timed out".to_string()));

        assert_eq!(buffer.data.len(), 1);
        // The guard was released, so the retry can proceed.
        assert_eq!(buffer.begin_save(), Some(snapshot));
    }

    #[tokio::test]
    async fn update_offline_returns_cached_data() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_online(false);
        let (events, _rx) = broadcast::channel(16);
        let mut resource: SyncedResource<Vec<String>> = SyncedResource::new(
            "http://test/jobs",
            "jobs-data",
            vec!["seeded".to_string()],
            Arc::new(MemoryCache::new()),
            transport,
            events,
            None,
        );

        let data = resource.update().await.unwrap();
        assert_eq!(data, &vec!["seeded".to_string()]);
    }

    #[tokio::test]
    async fn update_replaces_data_and_caches_it() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_get(Ok(json!(["a", "b"])));
        let cache = Arc::new(MemoryCache::new());
        let (events, _rx) = broadcast::channel(16);
        let mut resource: SyncedResource<Vec<String>> = SyncedResource::new(
            "http://test/things",
            "things",
            Vec::new(),
            Arc::clone(&cache) as Arc<dyn KeyedCache>,
            transport,
            events,
            None,
        );

        resource.update().await.unwrap();
        assert_eq!(resource.data, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cache.get("things").await.unwrap(), Some(json!(["a", "b"])));
    }

    #[tokio::test]
    async fn login_payload_emits_redirect_signal() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_get(Ok(json!({"login": true})));
        let (events, mut rx) = broadcast::channel(16);
        let mut resource: SyncedResource<Vec<String>> = SyncedResource::new(
            "http://test/things",
            "things",
            vec!["kept".to_string()],
            Arc::new(MemoryCache::new()),
            transport,
            events,
            None,
        );

        let err = resource.update().await.unwrap_err();
        assert!(matches!(err, SyncError::LoginRequired));
        // Local state untouched.
        assert_eq!(resource.data, vec!["kept".to_string()]);
        assert!(matches!(rx.try_recv().unwrap(), SyncEvent::LoginRequired));
    }

    #[tokio::test]
    async fn load_from_cache_leaves_preseeded_default_on_absent_key() {
        let transport = Arc::new(FakeTransport::new());
        let (events, _rx) = broadcast::channel(16);
        let mut resource: SyncedResource<Vec<String>> = SyncedResource::new(
            "http://test/things",
            "things",
            vec!["default".to_string()],
            Arc::new(MemoryCache::new()),
            transport,
            events,
            None,
        );

        resource.load_from_cache().await.unwrap();
        assert_eq!(resource.data, vec!["default".to_string()]);
    }
}
