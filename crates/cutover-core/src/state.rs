//! Migration checkpoint state and its durable store.
//!
//! [`MigrationState`] is a value: every transition returns a new state, and
//! [`StateStore::commit`] persists it before the caller moves on. On restart
//! the last persisted document is authoritative.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// A completed phase. Never removed once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    /// Phase id.
    pub id: String,
    /// When the phase completed.
    pub completed_at: DateTime<Utc>,
}

/// A recorded error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    /// Phase that was current when the error occurred.
    pub phase: Option<String>,
    pub error: String,
}

/// A recorded warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningEntry {
    pub timestamp: DateTime<Utc>,
    /// Phase that was current when the warning occurred.
    pub phase: Option<String>,
    pub warning: String,
}

/// A rollback applied after the migration ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRecord {
    /// When the rollback finished.
    pub rolled_back_at: DateTime<Utc>,
    /// Generation of the snapshot that was restored.
    pub snapshot: DateTime<Utc>,
    /// Final rollback status, e.g. `succeeded` or `partially_failed`.
    pub status: String,
}

/// Persistent migration progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationState {
    /// When the first run started.
    pub started_at: Option<DateTime<Utc>>,
    /// Completed phases in completion order.
    pub completed_phases: Vec<PhaseRecord>,
    /// Phase currently executing, if any.
    pub current_phase: Option<String>,
    /// Time of the last phase transition.
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub errors: Vec<ErrorEntry>,
    pub warnings: Vec<WarningEntry>,
    /// Rollbacks in the order they ran.
    pub rollbacks: Vec<RollbackRecord>,
}

impl MigrationState {
    /// The most recent rollback, if any.
    pub fn last_rollback(&self) -> Option<&RollbackRecord> {
        self.rollbacks.last()
    }

    /// Completions that still count: those recorded after the last rollback.
    fn effective_phases(&self) -> impl Iterator<Item = &PhaseRecord> {
        let since = self.last_rollback().map(|r| r.rolled_back_at);
        self.completed_phases
            .iter()
            .filter(move |p| since.map_or(true, |at| p.completed_at > at))
    }

    /// Check whether a phase has completed since the last rollback.
    pub fn is_phase_complete(&self, id: &str) -> bool {
        self.effective_phases().any(|p| p.id == id)
    }

    /// Ids of phases completed since the last rollback, in completion order.
    pub fn completed_ids(&self) -> Vec<&str> {
        self.effective_phases().map(|p| p.id.as_str()).collect()
    }

    /// Record the run start. Keeps the original start time on resume.
    pub fn started(&self, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.started_at.get_or_insert(at);
        next
    }

    /// Enter a phase.
    pub fn with_current_phase(&self, id: &str, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.current_phase = Some(id.to_string());
        next.last_checkpoint = Some(at);
        next
    }

    /// Record a phase as complete and leave it. Completing twice is a no-op.
    pub fn with_phase_complete(&self, id: &str, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if !next.is_phase_complete(id) {
            next.completed_phases.push(PhaseRecord {
                id: id.to_string(),
                completed_at: at,
            });
        }
        next.current_phase = None;
        next.last_checkpoint = Some(at);
        next
    }

    /// Record an error against the current phase.
    pub fn with_error(&self, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.errors.push(ErrorEntry {
            timestamp: at,
            phase: self.current_phase.clone(),
            error: error.into(),
        });
        next
    }

    /// Record a rollback. Earlier completions stay in the history but no
    /// longer count, so the next run executes every phase again.
    pub fn with_rollback(&self, snapshot: DateTime<Utc>, status: impl Into<String>, at: DateTime<Utc>) -> Self {
        let status = status.into();
        let mut next = self.clone();
        next.warnings.push(WarningEntry {
            timestamp: at,
            phase: self.current_phase.clone(),
            warning: format!("rolled back to snapshot {} ({status})", snapshot.to_rfc3339()),
        });
        next.rollbacks.push(RollbackRecord {
            rolled_back_at: at,
            snapshot,
            status,
        });
        next.current_phase = None;
        next.last_checkpoint = Some(at);
        next
    }

    /// Record a warning against the current phase.
    pub fn with_warning(&self, warning: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.warnings.push(WarningEntry {
            timestamp: at,
            phase: self.current_phase.clone(),
            warning: warning.into(),
        });
        next
    }
}

/// JSON-file backed store for [`MigrationState`].
///
/// Every mutator writes synchronously; that disk write is the checkpoint.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: MigrationState,
}

impl StateStore {
    /// Open the store, loading the persisted state or the default if none exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let state = Self::load(&path)?;
        Ok(Self { path, state })
    }

    /// Read a state file. A missing file yields the default state.
    pub fn load(path: &Path) -> Result<MigrationState, StateError> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupted {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MigrationState::default()),
            Err(source) => Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write a state atomically: temp file, fsync, rename.
    pub fn save(&self, state: &MigrationState) -> Result<(), StateError> {
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(&bytes).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err)
    }

    /// Persist `next` and adopt it as the current state.
    pub fn commit(&mut self, next: MigrationState) -> Result<&MigrationState, StateError> {
        self.save(&next)?;
        self.state = next;
        Ok(&self.state)
    }

    fn transition<F>(&mut self, f: F) -> Result<&MigrationState, StateError>
    where
        F: FnOnce(&MigrationState) -> MigrationState,
    {
        let next = f(&self.state);
        self.commit(next)
    }

    /// The current in-memory state (always equal to the last persisted one).
    pub fn state(&self) -> &MigrationState {
        &self.state
    }

    /// Path of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_phase_complete(&self, id: &str) -> bool {
        self.state.is_phase_complete(id)
    }

    pub fn mark_started(&mut self) -> Result<&MigrationState, StateError> {
        self.transition(|s| s.started(Utc::now()))
    }

    pub fn set_current_phase(&mut self, id: &str) -> Result<&MigrationState, StateError> {
        self.transition(|s| s.with_current_phase(id, Utc::now()))
    }

    pub fn mark_phase_complete(&mut self, id: &str) -> Result<&MigrationState, StateError> {
        self.transition(|s| s.with_phase_complete(id, Utc::now()))
    }

    pub fn add_error(&mut self, error: impl Into<String>) -> Result<&MigrationState, StateError> {
        let error = error.into();
        self.transition(|s| s.with_error(error, Utc::now()))
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) -> Result<&MigrationState, StateError> {
        let warning = warning.into();
        self.transition(|s| s.with_warning(warning, Utc::now()))
    }

    pub fn record_rollback(
        &mut self,
        snapshot: DateTime<Utc>,
        status: impl Into<String>,
    ) -> Result<&MigrationState, StateError> {
        let status = status.into();
        self.transition(|s| s.with_rollback(snapshot, status, Utc::now()))
    }
}
