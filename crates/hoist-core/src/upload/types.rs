//! Core domain types for uploads.
//!
//! Pure data types; the only filesystem access is reading a path's extension.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use super::mime::mime_type_for_path;

/// Opaque identifier for an upload task.
///
/// Assigned by the manager when a request is admitted. Identifiers are
/// random v4 UUIDs, so they stay unique across process restarts and can be
/// journaled and re-associated later.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Mint a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier (e.g. one read back from a journal).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// HTTP methods accepted for uploads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
}

impl HttpMethod {
    /// Parse a method name, ignoring ASCII case.
    ///
    /// Returns `None` for anything other than POST, PUT, or PATCH.
    #[must_use]
    pub fn parse(method: &str) -> Option<Self> {
        match method.trim().to_ascii_uppercase().as_str() {
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            _ => None,
        }
    }

    /// Canonical upper-case method name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the request body is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    /// `multipart/form-data` with form fields and one or more files.
    Multipart,
    /// A single file's raw bytes are the entire body.
    Binary,
}

/// Lifecycle status of an upload task.
///
/// Serialized as its integer code on the wire (`enqueued = 1` through
/// `cancelled = 5`), matching what host event channels expect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UploadStatus {
    /// Admitted and registered, transfer not started yet.
    Enqueued,
    /// Bytes are being sent.
    Running,
    /// The server answered with a success status.
    Completed,
    /// Transport error or non-success status.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl UploadStatus {
    /// Integer code used on event channels.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Enqueued => 1,
            Self::Running => 2,
            Self::Completed => 3,
            Self::Failed => 4,
            Self::Cancelled => 5,
        }
    }

    /// Parse an integer code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Enqueued),
            2 => Some(Self::Running),
            3 => Some(Self::Completed),
            4 => Some(Self::Failed),
            5 => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Lower-case name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition can happen from this status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` goes forward.
    ///
    /// Statuses only advance: enqueued → running → terminal. Enqueued tasks
    /// may also terminate directly (cancelled before start, or a transport
    /// that fails to open the body).
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Enqueued, Self::Running) => true,
            (Self::Enqueued | Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for UploadStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for UploadStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown upload status code {code}")))
    }
}

/// A file entry as supplied by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileItem {
    /// Form field name the file is attached under.
    #[serde(rename = "fieldname")]
    pub field_name: String,
    /// Local filesystem path.
    pub path: String,
}

impl FileItem {
    /// Create a file entry.
    pub fn new(field_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            path: path.into(),
        }
    }
}

/// A validated file reference with its derived MIME type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadFileInfo {
    /// Form field name.
    pub field_name: String,
    /// Local filesystem path.
    pub path: PathBuf,
    /// MIME type inferred from the extension.
    pub mime_type: String,
}

impl UploadFileInfo {
    /// Build file info from a caller entry, deriving the MIME type.
    #[must_use]
    pub fn from_item(item: &FileItem) -> Self {
        let path = PathBuf::from(&item.path);
        let mime_type = mime_type_for_path(&path).to_string();
        Self {
            field_name: item.field_name.clone(),
            path,
            mime_type,
        }
    }

    /// The last path component, used as the part's `filename`.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned())
    }

    /// Borrow the path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A validated upload request, ready for encoding.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    /// Absolute destination URL.
    pub url: Url,
    /// HTTP method.
    pub method: HttpMethod,
    /// Body mode.
    pub mode: UploadMode,
    /// Caller headers, string values only, in caller order.
    pub headers: IndexMap<String, String>,
    /// Form fields, string values only (empty for binary uploads).
    pub form_fields: IndexMap<String, String>,
    /// Files to send. Non-empty; exactly one in binary mode.
    pub files: Vec<UploadFileInfo>,
    /// Caller tag echoed on events.
    pub tag: Option<String>,
    /// Per-request transport timeout, overriding the manager default.
    pub timeout: Option<Duration>,
}

/// Snapshot of a task's state as kept by the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTask {
    /// Task identifier.
    pub task_id: TaskId,
    /// Current status.
    pub status: UploadStatus,
    /// Last reported progress percentage (0-100).
    pub last_progress: u8,
    /// Caller tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl UploadTask {
    /// A freshly admitted task.
    #[must_use]
    pub const fn enqueued(task_id: TaskId, tag: Option<String>) -> Self {
        Self {
            task_id,
            status: UploadStatus::Enqueued,
            last_progress: 0,
            tag,
        }
    }
}
