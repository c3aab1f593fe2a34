//! Scripted transport for manager tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Notify;

use hoist_core::upload::{HttpMethod, TaskId, TransportFailure};

use super::{ProgressSink, ReattachedTransfer, Transfer, TransferResponse, UploadTransport};
use crate::request::BodySource;

/// What a scripted send does.
#[derive(Clone)]
pub enum Script {
    /// Report the given byte counts, then answer with `status` and `body`.
    Respond {
        status: u16,
        body: String,
        progress: Vec<u64>,
    },
    /// Wait until released, then answer 200.
    Hold(Arc<Notify>),
    /// Never finish.
    Hang,
    /// Fail without a response.
    Fail(TransportFailure),
}

impl Script {
    /// A plain 200 with a body and no progress.
    pub fn ok(body: &str) -> Self {
        Self::Respond {
            status: 200,
            body: body.to_string(),
            progress: Vec::new(),
        }
    }
}

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub task_id: TaskId,
    pub method: HttpMethod,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub content_length: u64,
    /// Body bytes, read at send time.
    pub body: Vec<u8>,
    /// Whether the body came from an owned temporary artifact.
    pub had_artifact: bool,
}

/// Transport that follows a script instead of touching the network.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    fallback: Arc<Mutex<Option<Script>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    sessions: Arc<Mutex<HashMap<TaskId, Script>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a script for the next send.
    pub fn push(&self, script: Script) -> &Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }

    /// Script used once the queue is empty (default: `ok("")`).
    pub fn set_fallback(&self, script: Script) {
        *self.fallback.lock().unwrap() = Some(script);
    }

    /// Pretend a previous process left `task_id` running in the session.
    pub fn leave_in_session(&self, task_id: TaskId, script: Script) {
        self.sessions.lock().unwrap().insert(task_id, script);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_script(&self) -> Script {
        self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            self.fallback
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Script::ok(""))
        })
    }
}

async fn play(
    script: Script,
    total: u64,
    progress: Option<&ProgressSink>,
) -> Result<TransferResponse, TransportFailure> {
    match script {
        Script::Respond {
            status,
            body,
            progress: steps,
        } => {
            for sent in steps {
                if let Some(sink) = progress {
                    sink.report(sent, total);
                }
                tokio::task::yield_now().await;
            }
            Ok(TransferResponse {
                status_code: status,
                headers: IndexMap::from([("x-scripted".to_string(), "1".to_string())]),
                body,
            })
        }
        Script::Hold(release) => {
            release.notified().await;
            Ok(TransferResponse {
                status_code: 200,
                headers: IndexMap::new(),
                body: String::new(),
            })
        }
        Script::Hang => std::future::pending().await,
        Script::Fail(failure) => Err(failure),
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    async fn send(&self, transfer: Transfer) -> Result<TransferResponse, TransportFailure> {
        let Transfer {
            task_id,
            mut request,
            progress,
        } = transfer;

        let artifact = request.body.take_artifact();
        let had_artifact = artifact.is_some();
        let body = match &request.body {
            BodySource::Memory(bytes) => bytes.to_vec(),
            BodySource::File { path, .. } => std::fs::read(path)
                .map_err(|e| TransportFailure::from_error("io_error", &e))?,
        };
        if let Some(artifact) = artifact {
            let _ = artifact.close();
        }

        self.requests.lock().unwrap().push(RecordedRequest {
            task_id,
            method: request.method,
            url: request.url.to_string(),
            headers: request.headers.clone(),
            content_length: request.content_length,
            body,
            had_artifact,
        });

        let script = self.next_script();
        play(script, request.content_length, Some(&progress)).await
    }

    fn reattach(&self, task_id: &TaskId) -> Option<ReattachedTransfer> {
        let script = self.sessions.lock().unwrap().remove(task_id)?;
        let (sink, rx) = ProgressSink::channel();
        let outcome = Box::pin(async move { play(script, 100, Some(&sink)).await });
        Some(ReattachedTransfer {
            outcome,
            progress: Some(rx),
        })
    }
}
