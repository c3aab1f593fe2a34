//! File-backed task journal.
//!
//! Keeps in-flight tasks and the host callback handle in
//! `<state_dir>/tasks.json`. Changes apply to memory at once. The file is
//! rewritten atomically (write to a sibling temp file, then rename) on the
//! blocking pool when called from inside a tokio runtime, and inline
//! otherwise. [`FileTaskJournal::flush`] writes the latest state on the
//! calling thread.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use hoist_core::ports::{JournalEntry, JournalError, TaskJournalPort};
use hoist_core::upload::TaskId;

/// Journal file name inside the state directory.
pub const JOURNAL_FILE: &str = "tasks.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalFile {
    #[serde(default)]
    callback_handle: Option<i64>,
    #[serde(default)]
    tasks: Vec<JournalEntry>,
}

struct JournalState {
    file: JournalFile,
    /// Bumped on every change.
    generation: u64,
}

struct JournalInner {
    dir: PathBuf,
    path: PathBuf,
    state: Mutex<JournalState>,
    /// Held for the whole write; guards the generation last on disk.
    written: Mutex<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JournalInner {
    fn io_err(&self, e: &std::io::Error) -> JournalError {
        JournalError::Io(format!("{}: {e}", self.path.display()))
    }

    /// Write the current state unless it is already on disk.
    fn write_current(&self) -> Result<(), JournalError> {
        let mut written = lock(&self.written);
        let (bytes, generation) = {
            let state = lock(&self.state);
            if state.generation <= *written {
                return Ok(());
            }
            let bytes = serde_json::to_vec_pretty(&state.file)
                .map_err(|e| JournalError::Io(e.to_string()))?;
            (bytes, state.generation)
        };

        let tmp = NamedTempFile::new_in(&self.dir).map_err(|e| self.io_err(&e))?;
        {
            let mut out = BufWriter::new(tmp.as_file());
            out.write_all(&bytes).map_err(|e| self.io_err(&e))?;
            out.flush().map_err(|e| self.io_err(&e))?;
        }
        tmp.persist(&self.path).map_err(|e| self.io_err(&e.error))?;
        *written = generation;
        Ok(())
    }
}

impl Drop for JournalInner {
    fn drop(&mut self) {
        if let Err(e) = self.write_current() {
            tracing::warn!(target: "hoist.upload", error = %e, "Failed to write task journal");
        }
    }
}

/// [`TaskJournalPort`] stored as a JSON file.
pub struct FileTaskJournal {
    inner: Arc<JournalInner>,
}

impl FileTaskJournal {
    /// Open (or create) the journal in `dir`.
    pub fn open(dir: &Path) -> Result<Self, JournalError> {
        fs::create_dir_all(dir).map_err(|e| JournalError::Io(format!("{}: {e}", dir.display())))?;
        let path = dir.join(JOURNAL_FILE);

        let file = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => JournalFile::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| JournalError::Corrupt(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => JournalFile::default(),
            Err(e) => return Err(JournalError::Io(format!("{}: {e}", path.display()))),
        };

        tracing::debug!(
            target: "hoist.upload",
            path = %path.display(),
            tasks = file.tasks.len(),
            "Opened task journal"
        );

        Ok(Self {
            inner: Arc::new(JournalInner {
                dir: dir.to_path_buf(),
                path,
                state: Mutex::new(JournalState {
                    file,
                    generation: 0,
                }),
                written: Mutex::new(0),
            }),
        })
    }

    /// Location of the journal file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Write the latest state to disk now, on the calling thread.
    pub fn flush(&self) -> Result<(), JournalError> {
        self.inner.write_current()
    }

    /// Apply `change` in memory, then schedule a write if it reports one is
    /// needed.
    fn update(&self, change: impl FnOnce(&mut JournalFile) -> bool) -> Result<(), JournalError> {
        {
            let mut state = lock(&self.inner.state);
            if !change(&mut state.file) {
                return Ok(());
            }
            state.generation += 1;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return self.inner.write_current();
        };
        let inner = Arc::clone(&self.inner);
        handle.spawn_blocking(move || {
            if let Err(e) = inner.write_current() {
                tracing::warn!(target: "hoist.upload", error = %e, "Failed to write task journal");
            }
        });
        Ok(())
    }
}

impl TaskJournalPort for FileTaskJournal {
    fn record(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        self.update(|file| {
            file.tasks.retain(|t| t.task_id != entry.task_id);
            file.tasks.push(entry.clone());
            true
        })
    }

    fn remove(&self, task_id: &TaskId) -> Result<(), JournalError> {
        self.update(|file| {
            let before = file.tasks.len();
            file.tasks.retain(|t| &t.task_id != task_id);
            file.tasks.len() != before
        })
    }

    fn load(&self) -> Result<Vec<JournalEntry>, JournalError> {
        Ok(lock(&self.inner.state).file.tasks.clone())
    }

    fn save_callback_handle(&self, handle: Option<i64>) -> Result<(), JournalError> {
        self.update(|file| {
            file.callback_handle = handle;
            true
        })
    }

    fn load_callback_handle(&self) -> Result<Option<i64>, JournalError> {
        Ok(lock(&self.inner.state).file.callback_handle)
    }
}
