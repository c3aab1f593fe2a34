//! Event fan-out.
//!
//! [`EventHub`] splits the manager's events into a progress channel and a
//! result channel. Each channel has at most one subscriber; events emitted
//! while nobody listens are buffered and handed to the next subscriber.
//! Result events are never dropped. Progress events are bounded, dropping
//! the oldest.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexSet;
use tokio::sync::mpsc;

use hoist_core::ports::UploadEventEmitterPort;
use hoist_core::upload::{TaskEvent, TaskId};

/// Tasks remembered as terminated, for duplicate suppression.
const TERMINATED_MEMORY: usize = 4096;

/// Receiving end of a channel subscription.
pub type EventReceiver = mpsc::UnboundedReceiver<TaskEvent>;

#[derive(Default)]
struct Channel {
    subscriber: Option<mpsc::UnboundedSender<TaskEvent>>,
    backlog: VecDeque<TaskEvent>,
}

impl Channel {
    /// Deliver or buffer. Returns the event if it had to be buffered.
    fn deliver(&mut self, event: TaskEvent) -> Option<TaskEvent> {
        let Some(tx) = &self.subscriber else {
            return Some(event);
        };
        match tx.send(event) {
            Ok(()) => None,
            Err(mpsc::error::SendError(event)) => {
                // Receiver went away without unsubscribing.
                self.subscriber = None;
                Some(event)
            }
        }
    }

    fn subscribe(&mut self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in self.backlog.drain(..) {
            let _ = tx.send(event);
        }
        self.subscriber = Some(tx);
        rx
    }
}

struct HubState {
    progress: Channel,
    results: Channel,
    progress_backlog: usize,
    terminated: IndexSet<TaskId>,
}

/// Two-channel event hub with buffering for absent observers.
///
/// Cloning yields another handle to the same hub.
#[derive(Clone)]
pub struct EventHub {
    state: Arc<Mutex<HubState>>,
}

impl EventHub {
    /// Create a hub buffering up to `progress_backlog` progress events.
    pub fn new(progress_backlog: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                progress: Channel::default(),
                results: Channel::default(),
                progress_backlog,
                terminated: IndexSet::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the progress observer, replacing any previous one.
    ///
    /// Buffered progress events are delivered first, in order.
    pub fn subscribe_progress(&self) -> EventReceiver {
        self.lock().progress.subscribe()
    }

    /// Attach the result observer, replacing any previous one.
    pub fn subscribe_results(&self) -> EventReceiver {
        self.lock().results.subscribe()
    }

    /// Detach the progress observer; later events are buffered.
    pub fn unsubscribe_progress(&self) {
        self.lock().progress.subscriber = None;
    }

    /// Detach the result observer; later events are buffered.
    pub fn unsubscribe_results(&self) {
        self.lock().results.subscriber = None;
    }

    /// Number of buffered (progress, result) events.
    pub fn backlog_len(&self) -> (usize, usize) {
        let state = self.lock();
        (state.progress.backlog.len(), state.results.backlog.len())
    }
}

impl UploadEventEmitterPort for EventHub {
    fn emit(&self, event: TaskEvent) {
        let mut state = self.lock();

        if state.terminated.contains(event.task_id()) {
            tracing::debug!(
                target: "hoist.upload",
                task_id = %event.task_id(),
                status = %event.status(),
                "Dropping event for terminated task"
            );
            return;
        }

        if event.is_terminal() {
            state.terminated.insert(event.task_id().clone());
            while state.terminated.len() > TERMINATED_MEMORY {
                state.terminated.shift_remove_index(0);
            }
            if let Some(event) = state.results.deliver(event) {
                state.results.backlog.push_back(event);
            }
            return;
        }

        if let Some(event) = state.progress.deliver(event) {
            let cap = state.progress_backlog;
            if cap == 0 {
                return;
            }
            while state.progress.backlog.len() >= cap {
                state.progress.backlog.pop_front();
            }
            state.progress.backlog.push_back(event);
        }
    }

    fn clone_box(&self) -> Box<dyn UploadEventEmitterPort> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoist_core::upload::{FailedEvent, TransportFailure, UploadStatus};

    fn progress(id: &str, pct: u8) -> TaskEvent {
        TaskEvent::progress(TaskId::new(id), UploadStatus::Running, pct, None)
    }

    fn failed(id: &str) -> TaskEvent {
        TaskEvent::Failed(FailedEvent::from_failure(
            TaskId::new(id),
            UploadStatus::Failed,
            TransportFailure::http_status(500, "boom"),
            None,
        ))
    }

    #[tokio::test]
    async fn test_backlog_delivered_on_subscribe() {
        let hub = EventHub::new(16);
        hub.emit(progress("a", 10));
        hub.emit(progress("a", 20));
        hub.emit(failed("a"));
        assert_eq!(hub.backlog_len(), (2, 1));

        let mut rx = hub.subscribe_progress();
        assert_eq!(rx.recv().await.unwrap(), progress("a", 10));
        assert_eq!(rx.recv().await.unwrap(), progress("a", 20));

        let mut results = hub.subscribe_results();
        assert!(results.recv().await.unwrap().is_terminal());
        assert_eq!(hub.backlog_len(), (0, 0));
    }

    #[tokio::test]
    async fn test_live_delivery_splits_channels() {
        let hub = EventHub::new(16);
        let mut progress_rx = hub.subscribe_progress();
        let mut result_rx = hub.subscribe_results();

        hub.emit(progress("a", 50));
        hub.emit(failed("a"));

        assert_eq!(progress_rx.recv().await.unwrap(), progress("a", 50));
        assert_eq!(result_rx.recv().await.unwrap(), failed("a"));
        assert!(progress_rx.try_recv().is_err());
    }

    #[test]
    fn test_results_delivered_outside_runtime() {
        let hub = EventHub::new(4);
        let mut rx = hub.subscribe_results();
        hub.emit(failed("a"));
        assert_eq!(tokio_test::block_on(rx.recv()), Some(failed("a")));
    }

    #[test]
    fn test_terminal_event_delivered_once() {
        let hub = EventHub::new(16);
        hub.emit(failed("a"));
        hub.emit(failed("a"));
        hub.emit(progress("a", 90));
        assert_eq!(hub.backlog_len(), (0, 1));
    }

    #[test]
    fn test_progress_backlog_drops_oldest() {
        let hub = EventHub::new(2);
        hub.emit(progress("a", 1));
        hub.emit(progress("a", 2));
        hub.emit(progress("a", 3));

        let mut rx = hub.subscribe_progress();
        assert_eq!(rx.try_recv().unwrap(), progress("a", 2));
        assert_eq!(rx.try_recv().unwrap(), progress("a", 3));
    }

    #[test]
    fn test_dropped_receiver_falls_back_to_buffer() {
        let hub = EventHub::new(16);
        drop(hub.subscribe_results());
        hub.emit(failed("a"));
        assert_eq!(hub.backlog_len(), (0, 1));

        hub.unsubscribe_progress();
        hub.emit(progress("b", 5));
        assert_eq!(hub.backlog_len(), (1, 1));
    }

    #[test]
    fn test_new_subscriber_replaces_old() {
        let hub = EventHub::new(16);
        let mut first = hub.subscribe_progress();
        let mut second = hub.subscribe_progress();
        hub.emit(progress("a", 5));

        assert_eq!(second.try_recv().unwrap(), progress("a", 5));
        assert!(matches!(
            first.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
