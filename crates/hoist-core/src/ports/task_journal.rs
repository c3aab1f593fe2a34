//! Task journal port.
//!
//! The journal records which tasks are in flight so a restarted process can
//! re-associate them with the background session that still owns the
//! transfers. It is not a history store: entries are removed as soon as a
//! task reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::upload::{HttpMethod, TaskId};

/// One in-flight task as remembered across restarts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Task identifier.
    pub task_id: TaskId,
    /// Background session that owns the transfer.
    pub session_id: String,
    /// Destination URL.
    pub url: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Caller tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// When the task was admitted.
    pub created_at: DateTime<Utc>,
}

/// Errors from journal persistence.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Reading or writing the backing store failed.
    #[error("journal I/O error: {0}")]
    Io(String),

    /// The stored data could not be decoded.
    #[error("journal is corrupt: {0}")]
    Corrupt(String),
}

/// Port for persisting in-flight task state.
///
/// Calls happen while the manager holds no locks, but they are synchronous;
/// implementations should keep them short.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
pub trait TaskJournalPort: Send + Sync {
    /// Remember an admitted task.
    fn record(&self, entry: &JournalEntry) -> Result<(), JournalError>;

    /// Forget a task (it reached a terminal status).
    fn remove(&self, task_id: &TaskId) -> Result<(), JournalError>;

    /// All remembered tasks, oldest first.
    fn load(&self) -> Result<Vec<JournalEntry>, JournalError>;

    /// Persist the host's background callback handle.
    fn save_callback_handle(&self, handle: Option<i64>) -> Result<(), JournalError>;

    /// Read back the stored callback handle.
    fn load_callback_handle(&self) -> Result<Option<i64>, JournalError>;
}

/// A journal that remembers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTaskJournal;

impl TaskJournalPort for NoopTaskJournal {
    fn record(&self, _entry: &JournalEntry) -> Result<(), JournalError> {
        Ok(())
    }

    fn remove(&self, _task_id: &TaskId) -> Result<(), JournalError> {
        Ok(())
    }

    fn load(&self) -> Result<Vec<JournalEntry>, JournalError> {
        Ok(Vec::new())
    }

    fn save_callback_handle(&self, _handle: Option<i64>) -> Result<(), JournalError> {
        Ok(())
    }

    fn load_callback_handle(&self) -> Result<Option<i64>, JournalError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_journal_is_empty() {
        let journal = NoopTaskJournal;
        let entry = JournalEntry {
            task_id: TaskId::new("t"),
            session_id: "s".to_string(),
            url: "https://example.com/upload".to_string(),
            method: HttpMethod::Post,
            tag: None,
            created_at: Utc::now(),
        };
        journal.record(&entry).unwrap();
        assert!(journal.load().unwrap().is_empty());
        assert_eq!(journal.load_callback_handle().unwrap(), None);
    }

    #[test]
    fn test_entry_serde_roundtrip() {
        let entry = JournalEntry {
            task_id: TaskId::new("abc"),
            session_id: "hoist.background.session".to_string(),
            url: "https://example.com/upload".to_string(),
            method: HttpMethod::Put,
            tag: Some("photos".to_string()),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""method":"PUT""#));
        let parsed: JournalEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_mock_journal() {
        let mut journal = MockTaskJournalPort::new();
        journal.expect_load_callback_handle().returning(|| Ok(Some(7)));
        assert_eq!(journal.load_callback_handle().unwrap(), Some(7));
    }
}
