//! Core domain types and port definitions for hoist.
//!
//! This crate holds everything the upload manager and its hosts agree on:
//! task identifiers and statuses, the event union delivered to observers,
//! the submission-time error taxonomy, and the port traits that adapters
//! implement. It performs no networking.
//!
//! # Structure
//!
//! - `upload` - Pure data types, events, errors, and MIME inference
//! - `ports` - Trait abstractions (manager API, event emission, task journal)

pub mod ports;
pub mod upload;

// Re-export commonly used types for convenience
pub use ports::{
    BackgroundResume, EnqueueBinaryParams, EnqueueParams, JournalEntry, JournalError,
    NoopTaskJournal, NoopUploadEmitter, SuccessStatusRange, TaskJournalPort,
    UploadEventEmitterPort, UploadManagerConfig, UploadManagerPort,
};
pub use upload::{
    CompletedEvent, FailedEvent, FileItem, HttpMethod, ProgressEvent, TaskEvent, TaskId,
    TransportFailure, UploadError, UploadFileInfo, UploadMode, UploadRequest, UploadResult,
    UploadStatus, UploadTask, mime_type_for_path,
};
