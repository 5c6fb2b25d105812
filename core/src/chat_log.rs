//! Seam to the durable chat-history collaborator.
//!
//! The coordinator appends and clears through this trait; the persistence
//! format belongs to the collaborator behind it. A durable implementation
//! would enqueue writes to its own writer task; the in-memory reference
//! implementation here backs the server binary and the tests.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use huddle_protocol::protocol::ChatMessage;
use tracing::debug;

pub trait ChatLog: Send + Sync {
    /// Append in arrival order. Implementations may drop a message that
    /// exactly duplicates the tail of the log on {role, content,
    /// timestamp}; that check is best-effort, never a guarantee.
    fn append(&self, message: ChatMessage);

    fn clear(&self, directory: &Path);

    fn history(&self, directory: &Path) -> Vec<ChatMessage>;
}

#[derive(Default)]
pub struct MemoryChatLog {
    logs: Mutex<HashMap<PathBuf, Vec<ChatMessage>>>,
}

impl MemoryChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Vec<ChatMessage>>> {
        match self.logs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ChatLog for MemoryChatLog {
    fn append(&self, message: ChatMessage) {
        let mut logs = self.lock();
        let log = logs.entry(message.directory.clone()).or_default();
        if log.last().is_some_and(|last| {
            last.role == message.role
                && last.content == message.content
                && last.timestamp == message.timestamp
        }) {
            debug!(
                "dropping duplicate chat message for {}",
                message.directory.display()
            );
            return;
        }
        log.push(message);
    }

    fn clear(&self, directory: &Path) {
        self.lock().remove(directory);
    }

    fn history(&self, directory: &Path) -> Vec<ChatMessage> {
        self.lock().get(directory).cloned().unwrap_or_default()
    }
}
