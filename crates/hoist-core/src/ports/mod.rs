//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces that the upload manager exposes to hosts and
//! expects from infrastructure. They contain no implementation details and
//! use only domain types.
//!
//! # Design Rules
//!
//! - No `reqwest` or `tokio` types in any signature
//! - No filesystem layout details (the journal decides where it stores data)
//! - Event emission never blocks

pub mod task_journal;
pub mod upload_event_emitter;
pub mod upload_manager;

pub use task_journal::{JournalEntry, JournalError, NoopTaskJournal, TaskJournalPort};
pub use upload_event_emitter::{NoopUploadEmitter, UploadEventEmitterPort};
pub use upload_manager::{
    BackgroundResume, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SESSION_IDENTIFIER,
    EnqueueBinaryParams, EnqueueParams, SuccessStatusRange, UploadManagerConfig,
    UploadManagerPort,
};

#[cfg(any(test, feature = "test-utils"))]
pub use task_journal::MockTaskJournalPort;
