//! Append-only JSONL journal for ingested payloads.
//!
//! Every inbound snapshot payload is persisted as one JSON line with a
//! server-assigned `ts` field merged in. Writes are fire-and-forget:
//! a failed write is logged and dropped, and the request path never
//! waits on the filesystem.

use std::path::PathBuf;

use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::types::now_iso;

/// Handle to the JSONL journal file. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Journal {
    path: Option<PathBuf>,
}

impl Journal {
    /// Journal writing to `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Journal that drops every entry.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Append one entry, stamping it with the server time.
    ///
    /// Non-object entries are wrapped as `{"payload": <entry>}` so the
    /// journal stays one JSON object per line.
    pub async fn append(&self, entry: Value) {
        let Some(path) = &self.path else {
            return;
        };

        let mut record = match entry {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("payload".to_string(), other);
                map
            }
        };
        // Server timestamp wins over any client-supplied `ts`.
        record.insert("ts".to_string(), Value::String(now_iso()));

        if let Err(e) = Self::write_line(path, &Value::Object(record)).await {
            warn!(path = %path.display(), error = %e, "journal write failed");
        }
    }

    /// Append without blocking the caller.
    pub fn spawn_append(&self, entry: Value) {
        if self.path.is_none() {
            return;
        }
        let journal = self.clone();
        tokio::spawn(async move {
            journal.append(entry).await;
        });
    }

    async fn write_line(path: &PathBuf, record: &Value) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}
