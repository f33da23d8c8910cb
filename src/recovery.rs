//! Local recovery hints
//!
//! Advisory record of where a run was, kept per project with a TTL so a
//! restarted process can tell the operator what was interrupted. The chapter
//! store stays authoritative; a missing or stale hint changes nothing.

use crate::error::StorageError;
use crate::generation::progress::{PendingApproval, ProgressSnapshot, RunStatus};
use crate::types::{now_millis, ProjectId};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::time::Duration;

const TREE_RECOVERY_HINTS: &str = "recovery_hints";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryHint {
    pub project_id: ProjectId,
    pub status: RunStatus,
    pub chapter_index: Option<usize>,
    pub chapter_title: Option<String>,
    pub unit_index: Option<usize>,
    pub completed_units: usize,
    pub total_units: usize,
    #[serde(default)]
    pub checkpoint: bool,
    #[serde(default)]
    pub pending_approval: Option<PendingApproval>,
    #[serde(default)]
    pub error: Option<String>,
    pub written_at_ms: u64,
}

impl RecoveryHint {
    pub fn from_snapshot(project_id: &ProjectId, snapshot: &ProgressSnapshot, checkpoint: bool) -> Self {
        Self {
            project_id: project_id.clone(),
            status: snapshot.status,
            chapter_index: snapshot.current_chapter_index,
            chapter_title: snapshot.current_chapter_title.clone(),
            unit_index: snapshot.current_unit_index,
            completed_units: snapshot.completed_units,
            total_units: snapshot.total_units,
            checkpoint,
            pending_approval: snapshot.pending_approval.clone(),
            error: snapshot.error.clone(),
            written_at_ms: now_millis(),
        }
    }

    /// The writing process stopped without reaching a resting state.
    pub fn was_interrupted(&self) -> bool {
        self.status.is_active()
    }
}

/// Sled tree of JSON-encoded hints keyed by project id.
pub struct RecoveryHintStore {
    tree: Tree,
    ttl: Duration,
}

impl RecoveryHintStore {
    pub fn open(db: &Db, ttl: Duration) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree(TREE_RECOVERY_HINTS)?,
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn put(&self, hint: &RecoveryHint) -> Result<(), StorageError> {
        let value = serde_json::to_vec(hint)?;
        self.tree.insert(hint.project_id.as_str().as_bytes(), value)?;
        Ok(())
    }

    pub fn get(&self, project_id: &ProjectId) -> Result<Option<RecoveryHint>, StorageError> {
        self.get_at(project_id, now_millis())
    }

    /// Read a hint as of `now_ms`. Expired hints are removed and read as absent.
    pub fn get_at(
        &self,
        project_id: &ProjectId,
        now_ms: u64,
    ) -> Result<Option<RecoveryHint>, StorageError> {
        let key = project_id.as_str().as_bytes();
        let Some(raw) = self.tree.get(key)? else {
            return Ok(None);
        };
        let hint: RecoveryHint = match serde_json::from_slice(&raw) {
            Ok(hint) => hint,
            Err(_) => {
                self.tree.remove(key)?;
                return Ok(None);
            }
        };
        if self.is_expired(&hint, now_ms) {
            self.tree.remove(key)?;
            return Ok(None);
        }
        Ok(Some(hint))
    }

    pub fn clear(&self, project_id: &ProjectId) -> Result<(), StorageError> {
        self.tree.remove(project_id.as_str().as_bytes())?;
        Ok(())
    }

    /// Drop every expired hint; returns how many were removed.
    pub fn prune_expired(&self, now_ms: u64) -> Result<usize, StorageError> {
        let mut removed = 0;
        for item in self.tree.iter() {
            let (key, value) = item?;
            let expired = serde_json::from_slice::<RecoveryHint>(&value)
                .map(|hint| self.is_expired(&hint, now_ms))
                .unwrap_or(true);
            if expired {
                self.tree.remove(key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn is_expired(&self, hint: &RecoveryHint, now_ms: u64) -> bool {
        now_ms.saturating_sub(hint.written_at_ms) > self.ttl.as_millis() as u64
    }
}
