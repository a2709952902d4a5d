//! Persisted chat history access.
//!
//! The reconciler re-fetches history after every terminal notification; the
//! persisted list is the authoritative view of a finished run.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, warn};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use runstream_protocol::ChatMessage;

use crate::error::{EngineError, EngineResult};

/// Read access to persisted chat history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load the full ordered history of a session.
    async fn load(&self, session_key: &str) -> EngineResult<Vec<ChatMessage>>;
}

/// History kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    sessions: DashMap<String, Vec<ChatMessage>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, session_key: &str, message: ChatMessage) {
        self.sessions
            .entry(session_key.to_string())
            .or_default()
            .push(message);
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load(&self, session_key: &str) -> EngineResult<Vec<ChatMessage>> {
        Ok(self
            .sessions
            .get(session_key)
            .map(|m| m.value().clone())
            .unwrap_or_default())
    }
}

/// History stored as one JSONL file per session.
///
/// A missing file is an empty history. Lines that fail to parse are skipped
/// so one corrupt entry does not hide the rest of the conversation.
#[derive(Debug, Clone)]
pub struct JsonlHistoryStore {
    dir: PathBuf,
}

impl JsonlHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File backing a session.
    pub fn session_path(&self, session_key: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", sanitize_session_key(session_key)))
    }

    /// Append one message to a session's file.
    pub async fn append(&self, session_key: &str, message: &ChatMessage) -> EngineResult<()> {
        fs::create_dir_all(&self.dir).await?;
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.session_path(session_key))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn load(&self, session_key: &str) -> EngineResult<Vec<ChatMessage>> {
        let path = self.session_path(session_key);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No history file at {}", path.display());
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(EngineError::history(
                    session_key,
                    format!("reading {}: {err}", path.display()),
                ));
            }
        };

        let mut messages = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatMessage>(line) {
                Ok(message) => messages.push(message),
                Err(err) => warn!(
                    "Skipping malformed history line {} in {}: {}",
                    line_no + 1,
                    path.display(),
                    err
                ),
            }
        }
        Ok(messages)
    }
}

/// Map a session key to a safe file stem.
fn sanitize_session_key(session_key: &str) -> String {
    let stem: String = session_key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "_".to_string()
    } else {
        stem
    }
}
