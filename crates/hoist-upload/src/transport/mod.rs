//! Transport abstraction.
//!
//! The manager hands a [`Transfer`] to an [`UploadTransport`] and gets back
//! the server's response or a [`TransportFailure`]. Progress flows through a
//! `watch` channel so the transport never emits events itself.
//!
//! `ReqwestTransport` is the production implementation; tests use the
//! scripted fake in `testing`.

mod http;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::watch;

use hoist_core::upload::{TaskId, TransportFailure};

use crate::request::PreparedRequest;

pub use http::ReqwestTransport;

/// Progress update sent through the watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Bytes handed to the connection so far.
    pub sent: u64,
    /// Total body size.
    pub total: u64,
    /// Monotonically increasing sequence number for change detection.
    pub seq: u64,
}

impl ProgressUpdate {
    /// Create a progress update with a sequence number.
    pub const fn new(sent: u64, total: u64, seq: u64) -> Self {
        Self { sent, total, seq }
    }
}

/// Write side of a transfer's progress channel.
#[derive(Clone)]
pub struct ProgressSink {
    tx: watch::Sender<ProgressUpdate>,
}

impl ProgressSink {
    /// Create a sink and the receiver the manager's bridge listens on.
    pub fn channel() -> (Self, watch::Receiver<ProgressUpdate>) {
        let (tx, rx) = watch::channel(ProgressUpdate::default());
        (Self { tx }, rx)
    }

    /// Report the cumulative byte count.
    pub fn report(&self, sent: u64, total: u64) {
        // send_modify avoids clone and is infallible
        self.tx.send_modify(|state| {
            state.sent = sent;
            state.total = total;
            state.seq += 1;
        });
    }
}

/// One upload handed to the transport.
pub struct Transfer {
    /// Task the transfer belongs to.
    pub task_id: TaskId,
    /// Method, URL, headers, and body.
    pub request: PreparedRequest,
    /// Where to report byte progress.
    pub progress: ProgressSink,
}

/// The server's answer, whatever its status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers (non-UTF-8 values skipped).
    pub headers: IndexMap<String, String>,
    /// Response body text.
    pub body: String,
}

/// A transfer started by an earlier process and still owned by the
/// transport's background session.
pub struct ReattachedTransfer {
    /// Resolves when the transfer finishes.
    pub outcome: BoxFuture<'static, Result<TransferResponse, TransportFailure>>,
    /// Progress of the transfer, when the session reports it.
    pub progress: Option<watch::Receiver<ProgressUpdate>>,
}

/// Port for sending prepared requests.
///
/// Dropping the future returned by `send` must abort the transfer; that is
/// how cancellation reaches the network.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Send a request and wait for the response.
    ///
    /// Non-success statuses are returned as responses; only failures to get
    /// a response at all are errors.
    async fn send(&self, transfer: Transfer) -> Result<TransferResponse, TransportFailure>;

    /// Find a transfer an earlier process started under `task_id`.
    ///
    /// Returns `None` when the transport has no knowledge of it.
    fn reattach(&self, task_id: &TaskId) -> Option<ReattachedTransfer>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_update_new_creates_with_seq() {
        let update = ProgressUpdate::new(100, 1000, 5);
        assert_eq!(update.sent, 100);
        assert_eq!(update.total, 1000);
        assert_eq!(update.seq, 5);
    }

    #[test]
    fn progress_sink_bumps_seq() {
        let (sink, rx) = ProgressSink::channel();
        sink.report(10, 100);
        sink.report(20, 100);
        assert_eq!(*rx.borrow(), ProgressUpdate::new(20, 100, 2));
    }
}
