//! File inlining — task files resolved to base64 before delivery.
//!
//! Workers may be offline by the time they open a task, so the payload
//! carries every file's content inline rather than a path or URL.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::ApiError;
use crate::model::{FileRef, InlineFile};

/// Resolve a set of file references to inline base64 content. Local
/// paths are read from disk; http(s) sources are fetched.
pub async fn inline_files(
    http: &reqwest::Client,
    files: &[FileRef],
) -> Result<Vec<InlineFile>, ApiError> {
    let fetches = files.iter().map(|file| inline_one(http, file));
    futures::future::try_join_all(fetches).await
}

async fn inline_one(http: &reqwest::Client, file: &FileRef) -> Result<InlineFile, ApiError> {
    let bytes = if file.path.starts_with("http") {
        http.get(&file.path)
            .send()
            .await
            .map_err(|e| ApiError::File {
                name: file.name.clone(),
                reason: e.to_string(),
            })?
            .bytes()
            .await
            .map_err(|e| ApiError::File {
                name: file.name.clone(),
                reason: e.to_string(),
            })?
            .to_vec()
    } else {
        tokio::fs::read(&file.path).await.map_err(|e| ApiError::File {
            name: file.name.clone(),
            reason: e.to_string(),
        })?
    };

    Ok(InlineFile {
        name: file.name.clone(),
        kind: file.kind.clone(),
        file: STANDARD.encode(&bytes),
        data: file.data.clone(),
        bytes: None,
    })
}
