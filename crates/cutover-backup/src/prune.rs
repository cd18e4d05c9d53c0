//! Manifest retention.
//!
//! A manifest is deleted only when it is both outside the newest
//! `keep_latest` and older than `max_age_days`. Manifests whose file name
//! carries no readable timestamp are always kept.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use cutover_core::EventLog;
use serde_json::json;

use crate::error::BackupError;
use crate::manifest::{list_manifests, timestamp_from_name};

/// Default number of newest manifests always kept.
pub const DEFAULT_KEEP_LATEST: usize = 3;

/// Default minimum age, in days, before a manifest may be deleted.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 30;

/// Retention policy for backup manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_latest: usize,
    pub max_age_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_latest: DEFAULT_KEEP_LATEST,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }
}

impl RetentionPolicy {
    pub fn with_keep_latest(mut self, keep_latest: usize) -> Self {
        self.keep_latest = keep_latest;
        self
    }

    pub fn with_max_age_days(mut self, max_age_days: i64) -> Self {
        self.max_age_days = max_age_days;
        self
    }
}

/// Which manifests a prune would keep and delete, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    pub keep: Vec<PathBuf>,
    pub delete: Vec<PathBuf>,
}

/// Decide what to delete from `dir` under `policy` at `now`.
pub fn plan_prune(dir: &Path, policy: RetentionPolicy, now: DateTime<Utc>) -> Result<PrunePlan, BackupError> {
    let cutoff = now - TimeDelta::days(policy.max_age_days);
    let mut plan = PrunePlan::default();

    for (index, path) in list_manifests(dir)?.into_iter().enumerate() {
        let created = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(timestamp_from_name);
        let expired = created.is_some_and(|t| t < cutoff);
        if index >= policy.keep_latest && expired {
            plan.delete.push(path);
        } else {
            plan.keep.push(path);
        }
    }
    Ok(plan)
}

/// Delete the manifests in `plan`. Returns the paths removed.
pub fn apply_prune(plan: &PrunePlan, log: &EventLog) -> Result<Vec<PathBuf>, BackupError> {
    let mut removed = Vec::with_capacity(plan.delete.len());
    for path in &plan.delete {
        fs::remove_file(path).map_err(|source| BackupError::Io {
            path: path.clone(),
            source,
        })?;
        log.info_with("Deleted manifest", json!({ "manifest": path.display().to_string() }));
        removed.push(path.clone());
    }
    Ok(removed)
}
