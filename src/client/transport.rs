//! Client network transport with online-awareness.
//!
//! Requests carry a fixed timeout after which they count as failures;
//! there is no explicit cancellation. The online flag is owned by the
//! embedding application (connectivity events flip it), and every synced
//! resource consults it before touching the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncError;

/// JSON-over-HTTP transport used by synced resources.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the device currently believes it is online.
    fn is_online(&self) -> bool;

    async fn get_json(&self, url: &str) -> Result<Value, SyncError>;

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, SyncError>;
}

/// Production transport on reqwest.
pub struct HttpTransport {
    http: reqwest::Client,
    online: AtomicBool,
    worker: String,
}

impl HttpTransport {
    /// Build a transport identifying as `worker`, with `timeout` applied
    /// to every request.
    pub fn new(worker: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            online: AtomicBool::new(true),
            worker: worker.into(),
        })
    }

    /// Flip the online flag (wired to the host's connectivity events).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    async fn get_json(&self, url: &str) -> Result<Value, SyncError> {
        self.http
            .get(url)
            .header("x-worker-id", &self.worker)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, SyncError> {
        self.http
            .post(url)
            .header("x-worker-id", &self.worker)
            .json(body)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }
}
