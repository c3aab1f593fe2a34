//! Upload event emitter port.
//!
//! This port abstracts event emission, allowing the upload manager to report
//! progress and results without coupling to how a host delivers them
//! (channels, platform event sinks, IPC).

use crate::upload::TaskEvent;

/// Port for emitting upload events.
///
/// Implementations handle the actual event delivery. The manager calls
/// `emit` from whichever task or thread produced the event, with none of its
/// own locks held, so implementations must not block. Calling back into the
/// manager from `emit` is allowed: events raised that way are delivered
/// after the current one, in order.
pub trait UploadEventEmitterPort: Send + Sync {
    /// Emit an upload event.
    fn emit(&self, event: TaskEvent);

    /// Clone this emitter into a boxed trait object.
    ///
    /// This enables cloning of `Arc<dyn UploadEventEmitterPort>` without
    /// requiring the underlying type to implement Clone.
    fn clone_box(&self) -> Box<dyn UploadEventEmitterPort>;
}

/// A no-op emitter for tests and fire-and-forget contexts.
#[derive(Debug, Clone, Default)]
pub struct NoopUploadEmitter;

impl NoopUploadEmitter {
    /// Create a new no-op emitter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl UploadEventEmitterPort for NoopUploadEmitter {
    fn emit(&self, _event: TaskEvent) {}

    fn clone_box(&self) -> Box<dyn UploadEventEmitterPort> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{TaskId, UploadStatus};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture {
        events: Arc<Mutex<Vec<TaskEvent>>>,
    }

    impl UploadEventEmitterPort for Capture {
        fn emit(&self, event: TaskEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn clone_box(&self) -> Box<dyn UploadEventEmitterPort> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn test_noop_emitter() {
        let emitter: Arc<dyn UploadEventEmitterPort> = Arc::new(NoopUploadEmitter::new());
        emitter.emit(TaskEvent::progress(
            TaskId::new("t"),
            UploadStatus::Enqueued,
            0,
            None,
        ));
        let _boxed = emitter.clone_box();
    }

    #[test]
    fn test_boxed_clone_shares_sink() {
        let capture = Capture::default();
        let boxed = capture.clone_box();
        boxed.emit(TaskEvent::progress(
            TaskId::new("t"),
            UploadStatus::Running,
            10,
            None,
        ));
        assert_eq!(capture.events.lock().unwrap().len(), 1);
    }
}
