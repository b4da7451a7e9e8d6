//! Best-effort transcript snapshots.
//!
//! Stores never fail the caller: a missing or unreadable snapshot loads as an
//! empty transcript and write errors are logged and dropped.

use crate::config::Config;
use crate::error::Result;
use crate::state::ChatMessage;
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fixed key the snapshot is stored under
const TRANSCRIPT_KEY: &str = "transcript.json";

pub trait TranscriptStore: Send + Sync {
    fn load(&self) -> Vec<ChatMessage>;

    /// Overwrite the snapshot with the most recent messages.
    fn save(&self, messages: &[ChatMessage]);
}

fn most_recent(messages: &[ChatMessage], max: usize) -> &[ChatMessage] {
    &messages[messages.len().saturating_sub(max)..]
}

/// Snapshot kept as a JSON array in the app data directory
pub struct JsonFileStore {
    path: PathBuf,
    max_messages: usize,
}

impl JsonFileStore {
    pub fn new(dir: &Path, max_messages: usize) -> Self {
        Self {
            path: dir.join(TRANSCRIPT_KEY),
            max_messages,
        }
    }

    /// Store in the platform data directory
    pub fn open_default(max_messages: usize) -> anyhow::Result<Self> {
        Ok(Self::new(&Config::data_dir()?, max_messages))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_load(&self) -> Result<Vec<ChatMessage>> {
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn try_save(&self, messages: &[ChatMessage]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string(most_recent(messages, self.max_messages))?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl TranscriptStore for JsonFileStore {
    fn load(&self) -> Vec<ChatMessage> {
        match self.try_load() {
            Ok(messages) => messages,
            Err(crate::CopilotError::Io(e)) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Ignoring unreadable transcript snapshot");
                Vec::new()
            }
        }
    }

    fn save(&self, messages: &[ChatMessage]) {
        match self.try_save(messages) {
            Ok(()) => tracing::debug!(path = ?self.path, "Saved transcript snapshot"),
            Err(e) => tracing::warn!(path = ?self.path, error = %e, "Failed to save transcript snapshot"),
        }
    }
}

/// In-process store for ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<ChatMessage>>,
    max_messages: Option<usize>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_messages(max_messages: usize) -> Self {
        Self {
            max_messages: Some(max_messages),
            ..Self::default()
        }
    }

    /// Number of snapshots written so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl TranscriptStore for MemoryStore {
    fn load(&self) -> Vec<ChatMessage> {
        self.messages.lock().clone()
    }

    fn save(&self, messages: &[ChatMessage]) {
        let kept = most_recent(messages, self.max_messages.unwrap_or(usize::MAX));
        *self.messages.lock() = kept.to_vec();
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(turns: usize) -> Vec<ChatMessage> {
        (0..turns)
            .flat_map(|i| {
                [
                    ChatMessage::user(format!("question {i}")),
                    ChatMessage::assistant(format!("answer {i}")),
                ]
            })
            .collect()
    }

    #[test]
    fn test_missing_snapshot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path(), 50);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path(), 50);
        fs::write(store.path(), "[{\"role\": \"user\", \"content\"").unwrap();
        assert!(store.load().is_empty());

        fs::write(store.path(), r#"{"role": "user"}"#).unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_caps_to_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path(), 3);
        let messages = conversation(3);
        store.save(&messages);

        let loaded = store.load();
        assert_eq!(loaded, messages[3..].to_vec());
        assert_eq!(loaded[0].content, "answer 1");
    }

    #[test]
    fn test_save_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path(), 50);
        store.save(&conversation(2));
        store.save(&[]);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_write_failure_is_absorbed() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the store expects a directory.
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "").unwrap();
        let store = JsonFileStore::new(&blocker, 50);
        store.save(&conversation(1));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_memory_store_counts_writes() {
        let store = MemoryStore::with_max_messages(2);
        store.save(&conversation(2));
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.load().len(), 2);
        assert_eq!(store.load()[1].content, "answer 1");
    }
}
