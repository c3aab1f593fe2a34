//! Upload worker.
//!
//! Runs one transfer to completion or cancellation. The worker never emits
//! events and never touches the registry; it only reports bytes through the
//! job's `ProgressSink` and returns what happened.

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use hoist_core::upload::{TaskId, TransportFailure};

use crate::request::PreparedRequest;
use crate::transport::{ProgressSink, Transfer, TransferResponse, UploadTransport};

/// An upload ready to hand to the transport.
pub struct UploadJob {
    /// Task the job runs for.
    pub task_id: TaskId,
    /// Encoded request.
    pub request: PreparedRequest,
    /// Fired by `cancel`, `cancel_all`, or shutdown.
    pub cancel: CancellationToken,
    /// Byte progress sink.
    pub progress: ProgressSink,
}

/// Why a job produced no response.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job's token fired before the transfer finished.
    #[error("upload cancelled")]
    Cancelled,

    /// The transport could not obtain a response.
    #[error("{0}")]
    Transport(TransportFailure),
}

/// Send the job's request, racing it against cancellation.
///
/// Losing the race drops the transport future, which aborts the transfer
/// and releases its body (including any temporary artifact).
pub async fn run_job(
    job: UploadJob,
    transport: &dyn UploadTransport,
) -> Result<TransferResponse, JobError> {
    let UploadJob {
        task_id,
        request,
        cancel,
        progress,
    } = job;

    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }

    let transfer = Transfer {
        task_id,
        request,
        progress,
    };

    tokio::select! {
        biased;

        () = cancel.cancelled() => Err(JobError::Cancelled),
        result = transport.send(transfer) => result.map_err(JobError::Transport),
    }
}

/// Wait for a transfer re-associated from an earlier session.
pub async fn await_reattached(
    outcome: BoxFuture<'static, Result<TransferResponse, TransportFailure>>,
    cancel: CancellationToken,
) -> Result<TransferResponse, JobError> {
    tokio::select! {
        biased;

        () = cancel.cancelled() => Err(JobError::Cancelled),
        result = outcome => result.map_err(JobError::Transport),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{BodySource, build_headers};
    use crate::transport::testing::{Script, ScriptedTransport};
    use bytes::Bytes;
    use hoist_core::upload::HttpMethod;
    use indexmap::IndexMap;

    fn job(cancel: CancellationToken) -> UploadJob {
        let (progress, _rx) = ProgressSink::channel();
        UploadJob {
            task_id: TaskId::new("job"),
            request: PreparedRequest {
                method: HttpMethod::Post,
                url: url::Url::parse("http://localhost/upload").unwrap(),
                headers: build_headers("text/plain", 2, &IndexMap::new()),
                body: BodySource::Memory(Bytes::from_static(b"hi")),
                content_type: "text/plain".to_string(),
                content_length: 2,
                timeout: None,
            },
            cancel,
            progress,
        }
    }

    #[tokio::test]
    async fn test_returns_transport_response() {
        let transport = ScriptedTransport::new();
        transport.push(Script::ok("done"));

        let response = run_job(job(CancellationToken::new()), &transport)
            .await
            .unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "done");
        assert_eq!(transport.requests()[0].body, b"hi");
    }

    #[tokio::test]
    async fn test_cancel_interrupts_hanging_transfer() {
        let transport = ScriptedTransport::new();
        transport.push(Script::Hang);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        let result = run_job(job(cancel), &transport).await;
        assert!(matches!(result, Err(JobError::Cancelled)));
    }

    #[tokio::test]
    async fn test_precancelled_job_never_sends() {
        let transport = ScriptedTransport::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_job(job(cancel), &transport).await;
        assert!(matches!(result, Err(JobError::Cancelled)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_passed_through() {
        let transport = ScriptedTransport::new();
        transport.push(Script::Fail(TransportFailure::local(
            "connection_failed",
            "refused",
        )));

        match run_job(job(CancellationToken::new()), &transport).await {
            Err(JobError::Transport(failure)) => assert_eq!(failure.code, "connection_failed"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
