//! Upload manager port definition.
//!
//! This port defines the caller-facing interface of the upload subsystem.
//! Transport details (HTTP client, cancellation tokens, temp artifacts) stay
//! behind it; only domain types appear in signatures.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::upload::{FileItem, TaskId, UploadError, UploadTask};

/// Raw parameters for a multipart upload, as received from a host.
///
/// Header and field values arrive as loosely typed JSON; only string values
/// are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnqueueParams {
    /// Destination URL.
    pub url: String,
    /// HTTP method; POST when absent.
    #[serde(default)]
    pub method: Option<String>,
    /// Caller headers.
    #[serde(default)]
    pub headers: Option<IndexMap<String, Value>>,
    /// Form fields.
    #[serde(default)]
    pub data: Option<IndexMap<String, Value>>,
    /// Files to attach.
    #[serde(default)]
    pub files: Vec<FileItem>,
    /// Caller tag echoed on events.
    #[serde(default)]
    pub tag: Option<String>,
    /// Timeout for this request in seconds; the manager default when absent.
    #[serde(default, alias = "requestTimeout")]
    pub timeout_secs: Option<u64>,
}

impl EnqueueParams {
    /// Create params for a URL with no files yet.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Add a string header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(IndexMap::new)
            .insert(name.into(), Value::String(value.into()));
        self
    }

    /// Add a string form field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.data
            .get_or_insert_with(IndexMap::new)
            .insert(name.into(), Value::String(value.into()));
        self
    }

    /// Attach a file.
    #[must_use]
    pub fn with_file(mut self, item: FileItem) -> Self {
        self.files.push(item);
        self
    }

    /// Set the tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Override the transport timeout for this request.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Raw parameters for a binary upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnqueueBinaryParams {
    /// Destination URL.
    pub url: String,
    /// HTTP method; POST when absent.
    #[serde(default)]
    pub method: Option<String>,
    /// Caller headers.
    #[serde(default)]
    pub headers: Option<IndexMap<String, Value>>,
    /// The single file whose bytes form the body.
    #[serde(default)]
    pub file: Option<FileItem>,
    /// Caller tag echoed on events.
    #[serde(default)]
    pub tag: Option<String>,
    /// Timeout for this request in seconds; the manager default when absent.
    #[serde(default, alias = "requestTimeout")]
    pub timeout_secs: Option<u64>,
}

impl EnqueueBinaryParams {
    /// Create params for a URL and file.
    pub fn new(url: impl Into<String>, file: FileItem) -> Self {
        Self {
            url: url.into(),
            file: Some(file),
            ..Default::default()
        }
    }

    /// Set the method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Add a string header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(IndexMap::new)
            .insert(name.into(), Value::String(value.into()));
        self
    }

    /// Set the tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Override the transport timeout for this request.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Inclusive range of HTTP status codes treated as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessStatusRange {
    /// Lowest success code.
    pub start: u16,
    /// Highest success code.
    pub end: u16,
}

impl SuccessStatusRange {
    /// Create a range.
    #[must_use]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Whether `status` counts as success.
    #[must_use]
    pub const fn contains(&self, status: u16) -> bool {
        status >= self.start && status <= self.end
    }
}

impl Default for SuccessStatusRange {
    fn default() -> Self {
        Self::new(200, 299)
    }
}

/// Default background session identifier.
pub const DEFAULT_SESSION_IDENTIFIER: &str = "hoist.background.session";

/// Default transport timeout (one hour).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 3600;

/// Configuration for creating an upload manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadManagerConfig {
    /// Where multipart artifacts are written.
    pub temp_directory: PathBuf,
    /// Transport timeout in seconds.
    pub request_timeout_secs: u64,
    /// Status codes treated as success.
    pub success_status: SuccessStatusRange,
    /// Minimum percent delta between progress events (0 reports every change).
    pub progress_step: u8,
    /// Single-file multipart bodies at or under this many bytes stay in memory.
    /// Zero always writes an artifact.
    pub in_memory_threshold: u64,
    /// Terminal tasks kept for lookup.
    pub finished_retention: usize,
    /// Progress events buffered while no observer is attached.
    pub progress_backlog: usize,
    /// Directory for the resumption journal.
    pub state_directory: Option<PathBuf>,
    /// User-Agent sent by the transport.
    pub user_agent: String,
    /// Background session identifier.
    pub session_identifier: String,
}

impl Default for UploadManagerConfig {
    fn default() -> Self {
        Self {
            temp_directory: std::env::temp_dir(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            success_status: SuccessStatusRange::default(),
            progress_step: 0,
            in_memory_threshold: 0,
            finished_retention: 100,
            progress_backlog: 1024,
            state_directory: None,
            user_agent: concat!("hoist/", env!("CARGO_PKG_VERSION")).to_string(),
            session_identifier: DEFAULT_SESSION_IDENTIFIER.to_string(),
        }
    }
}

impl UploadManagerConfig {
    /// Create a config writing artifacts into `temp_directory`.
    #[must_use]
    pub fn new(temp_directory: PathBuf) -> Self {
        Self {
            temp_directory,
            ..Default::default()
        }
    }

    /// Set the transport timeout.
    #[must_use]
    pub const fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Set the success status range.
    #[must_use]
    pub const fn with_success_status(mut self, range: SuccessStatusRange) -> Self {
        self.success_status = range;
        self
    }

    /// Set the progress step.
    #[must_use]
    pub const fn with_progress_step(mut self, step: u8) -> Self {
        self.progress_step = step;
        self
    }

    /// Set the in-memory threshold.
    #[must_use]
    pub const fn with_in_memory_threshold(mut self, bytes: u64) -> Self {
        self.in_memory_threshold = bytes;
        self
    }

    /// Set how many terminal tasks are retained.
    #[must_use]
    pub const fn with_finished_retention(mut self, count: usize) -> Self {
        self.finished_retention = count;
        self
    }

    /// Set the progress backlog size.
    #[must_use]
    pub const fn with_progress_backlog(mut self, count: usize) -> Self {
        self.progress_backlog = count;
        self
    }

    /// Set the journal directory.
    #[must_use]
    pub fn with_state_directory(mut self, dir: Option<PathBuf>) -> Self {
        self.state_directory = dir;
        self
    }

    /// Set the User-Agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the background session identifier.
    #[must_use]
    pub fn with_session_identifier(mut self, id: impl Into<String>) -> Self {
        self.session_identifier = id.into();
        self
    }
}

/// Outcome of handling a background session wake-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundResume {
    /// Handle previously stored with `set_background_handler`.
    pub callback_handle: Option<i64>,
    /// Journaled tasks re-associated with live transfers.
    pub reattached: usize,
    /// Journaled tasks that could not be found and were failed.
    pub interrupted: usize,
}

/// Port for managing uploads.
///
/// # Usage
///
/// ```ignore
/// let manager: Arc<dyn UploadManagerPort> = /* ... */;
///
/// let params = EnqueueParams::new("https://example.com/upload")
///     .with_field("album", "holiday")
///     .with_file(FileItem::new("photo", "/data/img.jpg"));
/// let id = manager.enqueue(params).await?;
///
/// manager.cancel(&id).await;
/// ```
#[async_trait]
pub trait UploadManagerPort: Send + Sync {
    /// Validate, encode, and start a multipart upload.
    ///
    /// Returns the task id once the task is registered; the transfer runs in
    /// the background and reports through the event channels.
    async fn enqueue(&self, params: EnqueueParams) -> Result<TaskId, UploadError>;

    /// Validate and start a binary upload of a single file.
    async fn enqueue_binary(&self, params: EnqueueBinaryParams) -> Result<TaskId, UploadError>;

    /// Cancel a task. No-op for unknown or finished tasks.
    async fn cancel(&self, task_id: &TaskId);

    /// Cancel every active task.
    async fn cancel_all(&self);

    /// Store an opaque host callback handle for background wake-ups.
    async fn set_background_handler(&self, handle: i64);

    /// The stored callback handle, if any.
    async fn background_handler(&self) -> Option<i64>;

    /// Re-associate with a background session that has pending events.
    ///
    /// Returns `None` when `session_identifier` is not this manager's session.
    async fn handle_background_events(&self, session_identifier: &str)
    -> Option<BackgroundResume>;

    /// Drop retained records of finished tasks.
    async fn clear_uploads(&self);

    /// Snapshot of a task (active or recently finished).
    async fn task(&self, task_id: &TaskId) -> Option<UploadTask>;

    /// Number of tasks that have not reached a terminal status.
    async fn active_count(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        let range = SuccessStatusRange::default();
        assert!(range.contains(200));
        assert!(range.contains(299));
        assert!(!range.contains(199));
        assert!(!range.contains(300));
        assert!(SuccessStatusRange::new(200, 399).contains(302));
    }

    #[test]
    fn test_config_defaults() {
        let config = UploadManagerConfig::default();
        assert_eq!(config.request_timeout_secs, 3600);
        assert_eq!(config.success_status, SuccessStatusRange::new(200, 299));
        assert_eq!(config.progress_step, 0);
        assert_eq!(config.session_identifier, DEFAULT_SESSION_IDENTIFIER);
        assert!(config.user_agent.starts_with("hoist/"));
    }

    #[test]
    fn test_config_partial_deserialize() {
        let config: UploadManagerConfig =
            serde_json::from_str(r#"{"progress_step": 10, "request_timeout_secs": 30}"#).unwrap();
        assert_eq!(config.progress_step, 10);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.finished_retention, 100);
    }

    #[test]
    fn test_config_builder() {
        let config = UploadManagerConfig::new(PathBuf::from("/tmp/hoist"))
            .with_progress_step(5)
            .with_in_memory_threshold(4096)
            .with_session_identifier("custom");
        assert_eq!(config.temp_directory, PathBuf::from("/tmp/hoist"));
        assert_eq!(config.progress_step, 5);
        assert_eq!(config.in_memory_threshold, 4096);
        assert_eq!(config.session_identifier, "custom");
    }

    #[test]
    fn test_params_keep_raw_values() {
        let params: EnqueueParams = serde_json::from_str(
            r#"{"url":"https://x.test","data":{"a":"1","n":2},"files":[{"fieldname":"f","path":"/p"}]}"#,
        )
        .unwrap();
        assert_eq!(params.method, None);
        let data = params.data.unwrap();
        assert_eq!(data["a"], Value::String("1".to_string()));
        assert!(data["n"].is_number());
        assert_eq!(params.files.len(), 1);
        assert_eq!(params.timeout_secs, None);
    }

    #[test]
    fn test_params_accept_request_timeout() {
        let params: EnqueueBinaryParams = serde_json::from_str(
            r#"{"url":"https://x.test","file":{"fieldname":"f","path":"/p"},"requestTimeout":30}"#,
        )
        .unwrap();
        assert_eq!(params.timeout_secs, Some(30));

        let params = EnqueueParams::new("https://x.test").with_timeout_secs(5);
        assert_eq!(params.timeout_secs, Some(5));
    }
}
