//! Upload task manager for hoist.
//!
//! Turns upload requests into observable, cancellable background tasks:
//!
//! - `validation` - Caller parameters to a typed `UploadRequest`
//! - `encoder` - Streaming multipart/form-data writer
//! - `request` - Headers and body source for the transport
//! - `registry` - Concurrency-safe task map
//! - `transport` - `UploadTransport` port and the reqwest implementation
//! - `fanout` - Progress/result channels with buffering
//! - `journal` - On-disk record of in-flight tasks
//! - `manager` - `UploadManagerImpl`, tying it all together

// Re-export core types for convenience
pub use hoist_core::ports::{
    BackgroundResume, EnqueueBinaryParams, EnqueueParams, SuccessStatusRange, TaskJournalPort,
    UploadEventEmitterPort, UploadManagerConfig, UploadManagerPort,
};
pub use hoist_core::upload::{
    CompletedEvent, FailedEvent, FileItem, HttpMethod, ProgressEvent, TaskEvent, TaskId,
    TransportFailure, UploadError, UploadStatus, UploadTask,
};

// Internal modules (pub(crate) to keep implementation private)
pub(crate) mod progress;
pub(crate) mod registry;

pub mod encoder;
pub mod request;
pub mod transport;
pub mod validation;

mod fanout;
pub use fanout::{EventHub, EventReceiver};

mod journal;
pub use journal::{FileTaskJournal, JOURNAL_FILE};

// Public API - upload manager
mod manager;

pub use manager::{
    JobError, ManagerBuildError, UploadJob, UploadManagerDeps, UploadManagerImpl,
    build_default_upload_manager, build_upload_manager,
};
pub use transport::{ReqwestTransport, UploadTransport};
