//! Upload manager implementation.
//!
//! This module provides the concrete implementation of `UploadManagerPort`.
//! Submission validates and encodes on the caller's task, registers the
//! task, and spawns one transfer task per upload.
//!
//! # Architecture
//!
//! - **Manager**: validation, encoding, registration, cancellation
//! - **Worker**: runs the transfer, writes only to the progress `watch` channel
//! - **Bridge task**: turns byte counts into gated progress events
//!
//! # Event ordering
//!
//! Enqueued, running, and progress events are queued on the outbox from
//! inside the registry's critical section after a status check. Terminal
//! transitions go through `TaskRegistry::finish`, which has exactly one
//! winner per task, and only the winner queues the terminal event. The
//! outbox hands events to the emitter in queue order with no lock held, so
//! every task gets one terminal event with nothing after it and the emitter
//! may call back into the manager.

mod outbox;
mod worker;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hoist_core::ports::{
    BackgroundResume, EnqueueBinaryParams, EnqueueParams, JournalEntry, JournalError,
    NoopTaskJournal, TaskJournalPort, UploadEventEmitterPort, UploadManagerConfig,
    UploadManagerPort,
};
use hoist_core::upload::{
    CompletedEvent, FailedEvent, TaskEvent, TaskId, TransportFailure, UploadError,
    UploadRequest, UploadStatus, UploadTask,
};

use crate::fanout::EventHub;
use crate::journal::FileTaskJournal;
use crate::progress::{ProgressGate, percent};
use crate::registry::TaskRegistry;
use crate::request::{EncodeOptions, PreparedRequest, prepare};
use crate::transport::{
    ProgressSink, ProgressUpdate, ReattachedTransfer, ReqwestTransport, TransferResponse,
    UploadTransport,
};
use crate::validation::{validate_binary, validate_multipart};

use outbox::Outbox;

pub use worker::{JobError, UploadJob, await_reattached, run_job};

/// Dependencies for creating an upload manager.
pub struct UploadManagerDeps<T, E, J>
where
    T: UploadTransport + 'static,
    E: UploadEventEmitterPort + 'static,
    J: TaskJournalPort + 'static,
{
    /// Transport that performs the HTTP requests.
    pub transport: Arc<T>,
    /// Port for emitting task events.
    pub event_emitter: Arc<E>,
    /// Port for remembering in-flight tasks across restarts.
    pub journal: Arc<J>,
    /// Configuration for the upload manager.
    pub config: UploadManagerConfig,
}

/// Build an upload manager from its dependencies.
///
/// Returns an implementation of `UploadManagerPort` that can be stored as
/// `Arc<dyn UploadManagerPort>` in hosts.
pub fn build_upload_manager<T, E, J>(deps: UploadManagerDeps<T, E, J>) -> UploadManagerImpl
where
    T: UploadTransport + 'static,
    E: UploadEventEmitterPort + 'static,
    J: TaskJournalPort + 'static,
{
    UploadManagerImpl::new(deps.transport, deps.event_emitter, deps.journal, deps.config)
}

/// Errors from [`build_default_upload_manager`].
#[derive(Debug, Error)]
pub enum ManagerBuildError {
    /// The HTTP client could not be created.
    #[error("failed to build HTTP client: {0}")]
    Transport(#[from] reqwest::Error),

    /// The journal in `state_directory` could not be opened.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Build a manager wired to `ReqwestTransport` and an [`EventHub`].
///
/// Uses a `FileTaskJournal` when `config.state_directory` is set and keeps
/// nothing across restarts otherwise. The returned hub is where observers
/// subscribe.
pub fn build_default_upload_manager(
    config: UploadManagerConfig,
) -> Result<(UploadManagerImpl, EventHub), ManagerBuildError> {
    let transport = Arc::new(ReqwestTransport::from_config(&config)?);
    let hub = EventHub::new(config.progress_backlog);
    let event_emitter = Arc::new(hub.clone());

    let manager = match config.state_directory.clone() {
        Some(dir) => build_upload_manager(UploadManagerDeps {
            transport,
            event_emitter,
            journal: Arc::new(FileTaskJournal::open(&dir)?),
            config,
        }),
        None => build_upload_manager(UploadManagerDeps {
            transport,
            event_emitter,
            journal: Arc::new(NoopTaskJournal),
            config,
        }),
    };
    Ok((manager, hub))
}

/// Waiting state for a background session wake-up.
#[derive(Default)]
struct BackgroundWake {
    /// A session was handled and its resumed tasks may still be running.
    pending: bool,
    /// Runs once no resumed task is left.
    on_finished: Option<Box<dyn FnOnce() + Send>>,
}

/// State shared between the manager handle and its transfer tasks.
struct Shared {
    transport: Arc<dyn UploadTransport>,
    event_emitter: Arc<dyn UploadEventEmitterPort>,
    outbox: Outbox,
    journal: Arc<dyn TaskJournalPort>,
    registry: TaskRegistry,
    config: UploadManagerConfig,
    callback_handle: Mutex<Option<i64>>,
    background: Mutex<BackgroundWake>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cancelled_event(task: UploadTask) -> TaskEvent {
    TaskEvent::Failed(FailedEvent::from_failure(
        task.task_id,
        UploadStatus::Cancelled,
        TransportFailure::cancelled(),
        task.tag,
    ))
}

/// Concrete implementation of the upload manager.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct UploadManagerImpl {
    shared: Arc<Shared>,
}

impl UploadManagerImpl {
    fn new<T, E, J>(
        transport: Arc<T>,
        event_emitter: Arc<E>,
        journal: Arc<J>,
        config: UploadManagerConfig,
    ) -> Self
    where
        T: UploadTransport + 'static,
        E: UploadEventEmitterPort + 'static,
        J: TaskJournalPort + 'static,
    {
        let callback_handle = journal.load_callback_handle().unwrap_or_else(|e| {
            tracing::warn!(
                target: "hoist.upload",
                error = %e,
                "Failed to load background callback handle"
            );
            None
        });

        Self {
            shared: Arc::new(Shared {
                transport,
                event_emitter,
                outbox: Outbox::default(),
                journal,
                registry: TaskRegistry::new(config.finished_retention),
                config,
                callback_handle: Mutex::new(callback_handle),
                background: Mutex::new(BackgroundWake::default()),
            }),
        }
    }

    /// The manager's configuration.
    pub fn config(&self) -> &UploadManagerConfig {
        &self.shared.config
    }

    /// Run `callback` once every task resumed by `handle_background_events`
    /// has reached a terminal status.
    ///
    /// Replaces a previously registered callback that has not run yet.
    pub fn on_background_events_finished(&self, callback: impl FnOnce() + Send + 'static) {
        lock(&self.shared.background).on_finished = Some(Box::new(callback));
        self.shared.maybe_finish_background();
    }

    /// Abort every active transfer.
    ///
    /// Meant for process exit: statuses are left alone, no events are
    /// emitted, and journal entries are kept so the next process can account
    /// for the tasks. Returns how many transfers were aborted.
    pub fn shutdown(&self) -> usize {
        let aborted = self.shared.registry.abort_all();
        tracing::info!(target: "hoist.upload", aborted, "Upload manager shut down");
        aborted
    }

    async fn submit(&self, request: UploadRequest) -> Result<TaskId, UploadError> {
        let options = EncodeOptions {
            temp_directory: self.shared.config.temp_directory.clone(),
            in_memory_threshold: self.shared.config.in_memory_threshold,
        };

        let (request, prepared) = tokio::task::spawn_blocking(move || {
            let prepared = prepare(&request, &options);
            (request, prepared)
        })
        .await
        .map_err(|e| {
            UploadError::io(
                &self.shared.config.temp_directory,
                format!("encoder task failed: {e}"),
            )
        })?;
        let prepared = prepared?;

        Ok(self.shared.start(&request, prepared))
    }
}

impl Shared {
    /// Register a prepared request and spawn its transfer task.
    fn start(self: &Arc<Self>, request: &UploadRequest, prepared: PreparedRequest) -> TaskId {
        let cancel = CancellationToken::new();
        let task_id = self
            .registry
            .register(request.tag.clone(), cancel.clone(), |task| {
                self.queue_progress(task, UploadStatus::Enqueued, 0);
            });
        self.flush_events();

        self.journal_record(&JournalEntry {
            task_id: task_id.clone(),
            session_id: self.config.session_identifier.clone(),
            url: request.url.to_string(),
            method: request.method,
            tag: request.tag.clone(),
            created_at: Utc::now(),
        });
        // Finished before the entry landed. A finished task may already be
        // gone from the registry, so anything not still active counts.
        if self
            .registry
            .lookup(&task_id)
            .is_none_or(|t| t.status.is_terminal())
        {
            self.journal_remove(&task_id);
        }

        tracing::info!(
            target: "hoist.upload",
            task_id = %task_id,
            method = %request.method,
            url = %request.url,
            mode = ?request.mode,
            files = request.files.len(),
            content_length = prepared.content_length,
            "Upload enqueued"
        );

        let shared = Arc::clone(self);
        let id = task_id.clone();
        tokio::spawn(async move { shared.run_task(id, prepared, cancel).await });

        task_id
    }

    async fn run_task(
        self: Arc<Self>,
        task_id: TaskId,
        prepared: PreparedRequest,
        cancel: CancellationToken,
    ) {
        let running = self.registry.mark_running(&task_id, |task| {
            self.queue_progress(task, UploadStatus::Running, 0);
        });
        self.flush_events();
        if !running {
            tracing::debug!(
                target: "hoist.upload",
                task_id = %task_id,
                "Task finished before its transfer started"
            );
            return;
        }

        let (progress, rx) = ProgressSink::channel();
        let done = CancellationToken::new();
        let bridge = self.spawn_progress_bridge(&task_id, rx, cancel.clone(), done.clone());
        let empty_body = prepared.content_length == 0;

        let job = UploadJob {
            task_id: task_id.clone(),
            request: prepared,
            cancel,
            progress,
        };
        let result = run_job(job, self.transport.as_ref()).await;

        done.cancel();
        let _ = bridge.await;
        // No chunk ever goes out for an empty body.
        let succeeded = result
            .as_ref()
            .is_ok_and(|r| self.config.success_status.contains(r.status_code));
        if empty_body && succeeded {
            self.record_progress(&task_id, 100);
        }
        self.finalize(&task_id, result);
    }

    async fn run_reattached(
        self: Arc<Self>,
        task_id: TaskId,
        transfer: ReattachedTransfer,
        cancel: CancellationToken,
    ) {
        let ReattachedTransfer { outcome, progress } = transfer;
        let done = CancellationToken::new();
        let bridge = progress
            .map(|rx| self.spawn_progress_bridge(&task_id, rx, cancel.clone(), done.clone()));

        let result = await_reattached(outcome, cancel).await;

        done.cancel();
        if let Some(bridge) = bridge {
            let _ = bridge.await;
        }
        self.finalize(&task_id, result);
    }

    /// Spawn a bridge task that turns byte counts into progress events.
    fn spawn_progress_bridge(
        self: &Arc<Self>,
        task_id: &TaskId,
        mut rx: watch::Receiver<ProgressUpdate>,
        cancel: CancellationToken,
        done: CancellationToken,
    ) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        let task_id = task_id.clone();

        tokio::spawn(async move {
            let mut gate = ProgressGate::new(shared.config.progress_step, 0);
            let mut last_seq = 0u64;

            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => break,

                    changed = rx.changed() => {
                        let current = rx.borrow_and_update().clone();
                        shared.report_progress(&task_id, &current, &mut gate, &mut last_seq);
                        if changed.is_err() {
                            break;
                        }
                    }

                    () = done.cancelled() => {
                        let current = rx.borrow().clone();
                        shared.report_progress(&task_id, &current, &mut gate, &mut last_seq);
                        break;
                    }
                }
            }
        })
    }

    fn report_progress(
        &self,
        task_id: &TaskId,
        update: &ProgressUpdate,
        gate: &mut ProgressGate,
        last_seq: &mut u64,
    ) {
        if update.seq <= *last_seq {
            return;
        }
        *last_seq = update.seq;

        let pct = percent(update.sent, update.total);
        if !gate.should_emit(pct) {
            tracing::debug!(
                target: "hoist.upload",
                task_id = %task_id,
                progress = pct,
                last = gate.last(),
                "Progress gated"
            );
            return;
        }
        self.record_progress(task_id, pct);
    }

    fn record_progress(&self, task_id: &TaskId, pct: u8) {
        let recorded = self.registry.update_progress(task_id, pct, |task| {
            self.queue_progress(task, UploadStatus::Running, pct);
        });
        self.flush_events();
        if !recorded {
            tracing::debug!(
                target: "hoist.upload",
                task_id = %task_id,
                progress = pct,
                "Progress dropped for inactive task"
            );
        }
    }

    /// Queue a non-terminal event. Called under the registry lock.
    fn queue_progress(&self, task: &UploadTask, status: UploadStatus, pct: u8) {
        self.outbox.push(TaskEvent::progress(
            task.task_id.clone(),
            status,
            pct,
            task.tag.clone(),
        ));
    }

    fn flush_events(&self) {
        self.outbox.flush(self.event_emitter.as_ref());
    }

    /// Map a transfer outcome to the task's terminal event.
    fn finalize(&self, task_id: &TaskId, result: Result<TransferResponse, JobError>) {
        match result {
            Ok(response) if self.config.success_status.contains(response.status_code) => {
                let Some(task) = self.registry.finish(task_id, UploadStatus::Completed) else {
                    return;
                };
                tracing::info!(
                    target: "hoist.upload",
                    task_id = %task_id,
                    status_code = response.status_code,
                    "Upload completed"
                );
                self.after_terminal(TaskEvent::Completed(CompletedEvent {
                    task_id: task.task_id,
                    status_code: response.status_code,
                    message: response.body,
                    headers: response.headers,
                    tag: task.tag,
                }));
            }
            Ok(response) => {
                self.fail(
                    task_id,
                    TransportFailure::http_status(response.status_code, response.body),
                );
            }
            Err(JobError::Transport(failure)) => self.fail(task_id, failure),
            Err(JobError::Cancelled) => {
                // Acknowledged by `cancel`, or aborted by shutdown.
                tracing::debug!(target: "hoist.upload", task_id = %task_id, "Transfer stopped");
            }
        }
    }

    fn fail(&self, task_id: &TaskId, failure: TransportFailure) {
        let Some(task) = self.registry.finish(task_id, UploadStatus::Failed) else {
            return;
        };
        tracing::warn!(
            target: "hoist.upload",
            task_id = %task_id,
            status_code = failure.status_code,
            code = %failure.code,
            message = %failure.message,
            "Upload failed"
        );
        self.after_terminal(TaskEvent::Failed(FailedEvent::from_failure(
            task.task_id,
            UploadStatus::Failed,
            failure,
            task.tag,
        )));
    }

    fn cancel(&self, task_id: &TaskId) {
        let Some(task) = self.registry.cancel(task_id) else {
            tracing::debug!(
                target: "hoist.upload",
                task_id = %task_id,
                "Cancel ignored for unknown or finished task"
            );
            return;
        };
        tracing::info!(target: "hoist.upload", task_id = %task_id, "Upload cancelled");
        self.after_terminal(cancelled_event(task));
    }

    fn cancel_all(&self) {
        let cancelled = self.registry.cancel_all();
        tracing::info!(
            target: "hoist.upload",
            count = cancelled.len(),
            "Cancelled all uploads"
        );
        for task in cancelled {
            self.after_terminal(cancelled_event(task));
        }
    }

    /// Bookkeeping after the caller won a terminal transition.
    fn after_terminal(&self, event: TaskEvent) {
        let task_id = event.task_id().clone();
        self.outbox.push(event);
        self.flush_events();
        self.journal_remove(&task_id);
        self.maybe_finish_background();
    }

    fn resume_session(self: &Arc<Self>, session_identifier: &str) -> Option<BackgroundResume> {
        if session_identifier != self.config.session_identifier {
            tracing::debug!(
                target: "hoist.upload",
                session = session_identifier,
                "Ignoring events for another session"
            );
            return None;
        }

        let entries = self.journal.load().unwrap_or_else(|e| {
            tracing::warn!(target: "hoist.upload", error = %e, "Failed to load task journal");
            Vec::new()
        });

        let mut resume = BackgroundResume {
            callback_handle: *lock(&self.callback_handle),
            ..BackgroundResume::default()
        };

        for entry in entries {
            if entry.session_id != session_identifier || self.registry.lookup(&entry.task_id).is_some()
            {
                continue;
            }
            match self.transport.reattach(&entry.task_id) {
                Some(transfer) => {
                    if self.reattach(entry, transfer) {
                        resume.reattached += 1;
                    }
                }
                None => {
                    self.interrupt(entry);
                    resume.interrupted += 1;
                }
            }
        }

        tracing::info!(
            target: "hoist.upload",
            reattached = resume.reattached,
            interrupted = resume.interrupted,
            "Handled background session events"
        );

        lock(&self.background).pending = true;
        self.maybe_finish_background();
        Some(resume)
    }

    fn reattach(self: &Arc<Self>, entry: JournalEntry, transfer: ReattachedTransfer) -> bool {
        let cancel = CancellationToken::new();
        if !self
            .registry
            .register_resumed(&entry.task_id, entry.tag, cancel.clone())
        {
            return false;
        }
        tracing::info!(
            target: "hoist.upload",
            task_id = %entry.task_id,
            url = %entry.url,
            "Re-associated upload with background session"
        );

        let shared = Arc::clone(self);
        let task_id = entry.task_id;
        tokio::spawn(async move { shared.run_reattached(task_id, transfer, cancel).await });
        true
    }

    fn interrupt(&self, entry: JournalEntry) {
        tracing::warn!(
            target: "hoist.upload",
            task_id = %entry.task_id,
            url = %entry.url,
            created_at = %entry.created_at,
            "Journaled upload is gone from its session"
        );
        self.after_terminal(TaskEvent::Failed(FailedEvent::from_failure(
            entry.task_id,
            UploadStatus::Failed,
            TransportFailure::interrupted(),
            entry.tag,
        )));
    }

    fn maybe_finish_background(&self) {
        let callback = {
            let mut wake = lock(&self.background);
            if !wake.pending || self.registry.resumed_active_count() > 0 {
                return;
            }
            let Some(callback) = wake.on_finished.take() else {
                return;
            };
            wake.pending = false;
            callback
        };
        tracing::debug!(target: "hoist.upload", "Background session drained");
        callback();
    }

    fn set_callback_handle(&self, handle: i64) {
        *lock(&self.callback_handle) = Some(handle);
        if let Err(e) = self.journal.save_callback_handle(Some(handle)) {
            tracing::warn!(
                target: "hoist.upload",
                error = %e,
                "Failed to persist background callback handle"
            );
        }
    }

    fn journal_record(&self, entry: &JournalEntry) {
        if let Err(e) = self.journal.record(entry) {
            tracing::warn!(
                target: "hoist.upload",
                task_id = %entry.task_id,
                error = %e,
                "Failed to journal upload"
            );
        }
    }

    fn journal_remove(&self, task_id: &TaskId) {
        if let Err(e) = self.journal.remove(task_id) {
            tracing::warn!(
                target: "hoist.upload",
                task_id = %task_id,
                error = %e,
                "Failed to drop upload from journal"
            );
        }
    }
}

#[async_trait]
impl UploadManagerPort for UploadManagerImpl {
    async fn enqueue(&self, params: EnqueueParams) -> Result<TaskId, UploadError> {
        let request = validate_multipart(params)?;
        self.submit(request).await
    }

    async fn enqueue_binary(&self, params: EnqueueBinaryParams) -> Result<TaskId, UploadError> {
        let request = validate_binary(params)?;
        self.submit(request).await
    }

    async fn cancel(&self, task_id: &TaskId) {
        self.shared.cancel(task_id);
    }

    async fn cancel_all(&self) {
        self.shared.cancel_all();
    }

    async fn set_background_handler(&self, handle: i64) {
        self.shared.set_callback_handle(handle);
    }

    async fn background_handler(&self) -> Option<i64> {
        *lock(&self.shared.callback_handle)
    }

    async fn handle_background_events(
        &self,
        session_identifier: &str,
    ) -> Option<BackgroundResume> {
        self.shared.resume_session(session_identifier)
    }

    async fn clear_uploads(&self) {
        let cleared = self.shared.registry.clear_finished();
        tracing::debug!(target: "hoist.upload", cleared, "Cleared finished uploads");
    }

    async fn task(&self, task_id: &TaskId) -> Option<UploadTask> {
        self.shared.registry.lookup(task_id)
    }

    async fn active_count(&self) -> usize {
        self.shared.registry.active_count()
    }
}
