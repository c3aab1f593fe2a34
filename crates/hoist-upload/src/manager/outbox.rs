//! Ordered event delivery.
//!
//! Events are queued while the registry lock is held and handed to the
//! emitter after it is released. One caller at a time drains the queue, so
//! events reach the emitter in queue order. An emitter that calls back into
//! the manager only queues more events; the drain already in progress
//! delivers them.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hoist_core::ports::UploadEventEmitterPort;
use hoist_core::upload::TaskEvent;

#[derive(Default)]
struct OutboxState {
    events: VecDeque<TaskEvent>,
    draining: bool,
}

/// FIFO of events waiting for the emitter.
#[derive(Default)]
pub(super) struct Outbox {
    state: Mutex<OutboxState>,
}

impl Outbox {
    fn lock(&self) -> MutexGuard<'_, OutboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event. Never calls the emitter.
    pub(super) fn push(&self, event: TaskEvent) {
        self.lock().events.push_back(event);
    }

    /// Deliver queued events, unless another caller is already draining.
    ///
    /// The emitter runs with no lock held.
    pub(super) fn flush(&self, emitter: &dyn UploadEventEmitterPort) {
        let mut next = {
            let mut state = self.lock();
            if state.draining {
                return;
            }
            let Some(event) = state.events.pop_front() else {
                return;
            };
            state.draining = true;
            event
        };

        loop {
            emitter.emit(next);

            let mut state = self.lock();
            match state.events.pop_front() {
                Some(event) => next = event,
                None => {
                    state.draining = false;
                    return;
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoist_core::upload::{TaskId, UploadStatus};
    use std::sync::Arc;

    fn progress(pct: u8) -> TaskEvent {
        TaskEvent::progress(TaskId::new("a"), UploadStatus::Running, pct, None)
    }

    /// Records events and queues one more from inside the first `emit`.
    #[derive(Clone)]
    struct Reentrant {
        outbox: Arc<Outbox>,
        seen: Arc<Mutex<Vec<u8>>>,
    }

    impl UploadEventEmitterPort for Reentrant {
        fn emit(&self, event: TaskEvent) {
            let TaskEvent::Progress(p) = event else {
                return;
            };
            let first = {
                let mut seen = self.seen.lock().unwrap();
                seen.push(p.progress);
                seen.len() == 1
            };
            if first {
                self.outbox.push(progress(99));
                self.outbox.flush(self);
            }
        }

        fn clone_box(&self) -> Box<dyn UploadEventEmitterPort> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn test_flush_delivers_in_order() {
        let outbox = Arc::new(Outbox::default());
        let emitter = Reentrant {
            outbox: Arc::clone(&outbox),
            seen: Arc::default(),
        };
        outbox.push(progress(1));
        outbox.push(progress(2));
        outbox.flush(&emitter);

        assert_eq!(*emitter.seen.lock().unwrap(), vec![1, 2, 99]);
        assert_eq!(outbox.len(), 0);
    }

    #[test]
    fn test_flush_on_empty_queue_is_noop() {
        let outbox = Arc::new(Outbox::default());
        let emitter = Reentrant {
            outbox: Arc::clone(&outbox),
            seen: Arc::default(),
        };
        outbox.flush(&emitter);
        assert!(emitter.seen.lock().unwrap().is_empty());
    }
}
