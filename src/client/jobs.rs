//! Cached job listing for the job picker.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::client::cache::KeyedCache;
use crate::client::synced::{SyncEvent, SyncedResource};
use crate::client::transport::Transport;
use crate::error::SyncError;
use crate::model::JobSummary;

/// The list of closed jobs, mirrored locally so the picker renders
/// offline.
pub struct JobsList {
    resource: SyncedResource<Vec<JobSummary>>,
}

impl JobsList {
    pub fn new(
        base_url: impl AsRef<str>,
        cache: Arc<dyn KeyedCache>,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        let resource = SyncedResource::new(
            format!("{}/jobs", base_url.as_ref()),
            "jobs-data",
            Vec::new(),
            cache,
            transport,
            events,
            None,
        );
        Self { resource }
    }

    pub async fn load_from_cache(&mut self) -> Result<(), SyncError> {
        self.resource.load_from_cache().await
    }

    /// Refresh from the server if online; offline callers get the
    /// cached list.
    pub async fn update(&mut self) -> Result<&[JobSummary], SyncError> {
        self.resource.update().await.map(Vec::as_slice)
    }

    pub fn jobs(&self) -> &[JobSummary] {
        &self.resource.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::cache::MemoryCache;
    use crate::client::testing::FakeTransport;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn listing_survives_going_offline() {
        let cache: Arc<dyn KeyedCache> = Arc::new(MemoryCache::new());
        let transport = Arc::new(FakeTransport::new());
        let id = Uuid::new_v4();
        transport.push_get(Ok(json!([
            {"id": id, "name": "count-sheep", "description": "how many?"}
        ])));

        let (events, _rx) = broadcast::channel(8);
        let mut jobs = JobsList::new(
            "http://test",
            Arc::clone(&cache),
            Arc::clone(&transport) as Arc<dyn Transport>,
            events.clone(),
        );
        jobs.load_from_cache().await.unwrap();
        jobs.update().await.unwrap();
        assert_eq!(jobs.jobs().len(), 1);

        // A fresh list, offline, comes back from the cache.
        transport.set_online(false);
        let mut jobs = JobsList::new("http://test", cache, transport, events);
        jobs.load_from_cache().await.unwrap();
        let listed = jobs.update().await.unwrap();
        assert_eq!(listed[0].name, "count-sheep");
    }
}
