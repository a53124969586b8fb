//! Scripted transport double for client unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::client::transport::Transport;
use crate::error::SyncError;

/// A transport that replays scripted responses and records every post.
pub(crate) struct FakeTransport {
    online: AtomicBool,
    gets: Mutex<VecDeque<Result<Value, SyncError>>>,
    posts: Mutex<VecDeque<Result<Value, SyncError>>>,
    sent: Mutex<Vec<(String, Value)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            gets: Mutex::new(VecDeque::new()),
            posts: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    pub fn push_get(&self, response: Result<Value, SyncError>) {
        self.gets.lock().unwrap().push_back(response);
    }

    pub fn push_post(&self, response: Result<Value, SyncError>) {
        self.posts.lock().unwrap().push_back(response);
    }

    /// Bodies posted so far, in order, paired with their URLs.
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    async fn get_json(&self, url: &str) -> Result<Value, SyncError> {
        self.gets
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Transport(format!("no scripted GET for {url}"))))
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, SyncError> {
        self.sent
            .lock()
            .unwrap()
            .push((url.to_string(), body.clone()));
        self.posts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Transport(format!("no scripted POST for {url}"))))
    }
}
