//! Upload domain types, events, errors, and helpers.
//!
//! This module contains pure data types for the upload system. No networking
//! or runtime dependencies allowed; the only I/O is the filesystem lookups
//! done when deriving file metadata.
//!
//! # Structure
//!
//! - `types` - Identifiers, statuses, and request data (`TaskId`, `UploadRequest`)
//! - `events` - Progress and result events (`TaskEvent`)
//! - `errors` - Submission errors and transport failure payloads
//! - `mime` - MIME type inference from file extensions

pub mod errors;
pub mod events;
pub mod mime;
pub mod types;

// Re-export commonly used types
pub use errors::{TransportFailure, UploadError, UploadResult};
pub use events::{CompletedEvent, FailedEvent, ProgressEvent, TaskEvent};
pub use mime::mime_type_for_path;
pub use types::{
    FileItem, HttpMethod, TaskId, UploadFileInfo, UploadMode, UploadRequest, UploadStatus,
    UploadTask,
};
