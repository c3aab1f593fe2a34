//! Task registry.
//!
//! In-memory map from task id to the live task and its cancellation token.
//! Every mutation goes through one mutex, so the caller's thread and the
//! transfer tasks always observe a consistent status. Critical sections are
//! short and never await.
//!
//! Non-terminal notifications (`on_*` callbacks) run under the lock, after
//! the status check. Since a terminal transition takes the same lock, no
//! such notification can follow a task's terminal event. Callbacks only
//! queue work and must not call back into the registry.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use hoist_core::upload::{TaskId, UploadStatus, UploadTask};

struct ActiveTask {
    task: UploadTask,
    cancel: CancellationToken,
    /// Re-associated from a previous process's session.
    resumed: bool,
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<TaskId, ActiveTask>,
    /// Terminal tasks, oldest first.
    finished: IndexMap<TaskId, UploadTask>,
}

/// Concurrency-safe registry of upload tasks.
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
    retention: usize,
}

impl TaskRegistry {
    /// Create a registry keeping up to `retention` finished tasks for lookup.
    pub fn new(retention: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an enqueued task under a fresh identifier.
    pub fn register(
        &self,
        tag: Option<String>,
        cancel: CancellationToken,
        on_registered: impl FnOnce(&UploadTask),
    ) -> TaskId {
        let mut state = self.lock();
        let mut task_id = TaskId::generate();
        while state.active.contains_key(&task_id) || state.finished.contains_key(&task_id) {
            task_id = TaskId::generate();
        }
        let task = UploadTask::enqueued(task_id.clone(), tag);
        on_registered(&task);
        state.active.insert(
            task_id.clone(),
            ActiveTask {
                task,
                cancel,
                resumed: false,
            },
        );
        task_id
    }

    /// Re-register a task from a previous session under its original id.
    ///
    /// The task starts out running. Returns `false` if the id is already
    /// known.
    pub fn register_resumed(
        &self,
        task_id: &TaskId,
        tag: Option<String>,
        cancel: CancellationToken,
    ) -> bool {
        let mut state = self.lock();
        if state.active.contains_key(task_id) || state.finished.contains_key(task_id) {
            return false;
        }
        let mut task = UploadTask::enqueued(task_id.clone(), tag);
        task.status = UploadStatus::Running;
        state.active.insert(
            task_id.clone(),
            ActiveTask {
                task,
                cancel,
                resumed: true,
            },
        );
        true
    }

    /// Snapshot of an active or retained finished task.
    pub fn lookup(&self, task_id: &TaskId) -> Option<UploadTask> {
        let state = self.lock();
        state
            .active
            .get(task_id)
            .map(|a| a.task.clone())
            .or_else(|| state.finished.get(task_id).cloned())
    }

    /// Move an enqueued task to running. Returns `false` if that transition
    /// is not allowed (cancelled meanwhile, or unknown).
    pub fn mark_running(&self, task_id: &TaskId, on_running: impl FnOnce(&UploadTask)) -> bool {
        let mut state = self.lock();
        match state.active.get_mut(task_id) {
            Some(active) if active.task.status.can_transition_to(UploadStatus::Running) => {
                active.task.status = UploadStatus::Running;
                on_running(&active.task);
                true
            }
            _ => false,
        }
    }

    /// Record a progress percentage for a running task.
    ///
    /// Only increases are accepted; returns whether the value was recorded.
    pub fn update_progress(
        &self,
        task_id: &TaskId,
        percent: u8,
        on_recorded: impl FnOnce(&UploadTask),
    ) -> bool {
        let mut state = self.lock();
        match state.active.get_mut(task_id) {
            Some(active)
                if active.task.status == UploadStatus::Running
                    && percent > active.task.last_progress =>
            {
                active.task.last_progress = percent.min(100);
                on_recorded(&active.task);
                true
            }
            _ => false,
        }
    }

    /// Move a task to a terminal status.
    ///
    /// Returns the final snapshot, or `None` if the task was unknown or had
    /// already finished. Exactly one caller wins for any task, which is what
    /// keeps terminal events unique.
    pub fn finish(&self, task_id: &TaskId, status: UploadStatus) -> Option<UploadTask> {
        let mut state = self.lock();
        let allowed = state
            .active
            .get(task_id)
            .is_some_and(|a| a.task.status.can_transition_to(status));
        if !allowed {
            return None;
        }
        let mut active = state.active.remove(task_id)?;
        active.task.status = status;
        if status == UploadStatus::Completed {
            active.task.last_progress = 100;
        }

        if self.retention > 0 {
            state
                .finished
                .insert(task_id.clone(), active.task.clone());
            while state.finished.len() > self.retention {
                state.finished.shift_remove_index(0);
            }
        }
        Some(active.task)
    }

    /// Cancel one task: mark it cancelled and fire its token.
    ///
    /// Returns `None` for unknown or already-finished tasks.
    pub fn cancel(&self, task_id: &TaskId) -> Option<UploadTask> {
        let token = self.lock().active.get(task_id).map(|a| a.cancel.clone())?;
        let task = self.finish(task_id, UploadStatus::Cancelled)?;
        token.cancel();
        Some(task)
    }

    /// Cancel every active task.
    pub fn cancel_all(&self) -> Vec<UploadTask> {
        self.active_ids()
            .iter()
            .filter_map(|id| self.cancel(id))
            .collect()
    }

    /// Fire every active task's token without changing statuses.
    ///
    /// Used at process exit, when nobody is left to observe events.
    pub fn abort_all(&self) -> usize {
        let state = self.lock();
        for active in state.active.values() {
            active.cancel.cancel();
        }
        state.active.len()
    }

    /// Identifiers of all active tasks.
    pub fn active_ids(&self) -> Vec<TaskId> {
        self.lock().active.keys().cloned().collect()
    }

    /// Number of active tasks.
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Number of active tasks re-associated from a previous session.
    pub fn resumed_active_count(&self) -> usize {
        self.lock().active.values().filter(|a| a.resumed).count()
    }

    /// Drop all retained finished tasks. Returns how many were dropped.
    pub fn clear_finished(&self) -> usize {
        let mut state = self.lock();
        let count = state.finished.len();
        state.finished.clear();
        count
    }
}
