//! Progress model
//!
//! In-memory view of a run: counters rebuilt from the store on every reload,
//! the current position, and a rolling window of unit durations for ETA.

use crate::store::{Chapter, UnitStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    GeneratingOutline,
    Writing,
    Paused,
    AwaitingApproval,
    Completed,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::GeneratingOutline => "generating_outline",
            RunStatus::Writing => "writing",
            RunStatus::Paused => "paused",
            RunStatus::AwaitingApproval => "awaiting_approval",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }

    /// A run loop is (or was, if the process died) executing.
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::GeneratingOutline | RunStatus::Writing)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chapter waiting for an operator decision in checkpoint mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub chapter_id: crate::types::ChapterId,
    pub chapter_title: String,
    pub word_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: RunStatus,
    pub total_units: usize,
    pub completed_units: usize,
    pub failed_units: usize,
    pub skipped_units: usize,
    pub total_words: u64,
    pub target_words: u64,
    pub current_chapter_index: Option<usize>,
    pub current_chapter_title: Option<String>,
    pub current_unit_index: Option<usize>,
    pub current_unit_title: Option<String>,
    pub avg_unit_secs: Option<f64>,
    pub eta_secs: Option<u64>,
    pub error: Option<String>,
    pub pending_approval: Option<PendingApproval>,
}

impl ProgressSnapshot {
    /// Units not yet in a terminal state.
    pub fn remaining_units(&self) -> usize {
        self.total_units
            .saturating_sub(self.completed_units + self.failed_units + self.skipped_units)
    }

    /// Words at which remaining units are skipped; `None` without a target.
    pub fn budget_cutoff(&self, ratio: f64) -> Option<u64> {
        (self.target_words > 0).then(|| (self.target_words as f64 * ratio).round() as u64)
    }

    pub fn budget_reached(&self, ratio: f64) -> bool {
        self.budget_cutoff(ratio)
            .map(|cutoff| self.total_words >= cutoff)
            .unwrap_or(false)
    }
}

/// Last `capacity` unit durations.
#[derive(Debug, Clone)]
pub struct DurationWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl DurationWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn eta(&self, remaining_units: usize) -> Option<Duration> {
        self.average()
            .map(|avg| avg.mul_f64(remaining_units as f64))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Mutable progress state owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    snapshot: ProgressSnapshot,
    durations: DurationWindow,
}

impl ProgressTracker {
    pub fn new(duration_window: usize) -> Self {
        Self {
            snapshot: ProgressSnapshot::default(),
            durations: DurationWindow::new(duration_window),
        }
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    pub fn status(&self) -> RunStatus {
        self.snapshot.status
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.snapshot.status = status;
    }

    pub fn set_error(&mut self, message: Option<String>) {
        self.snapshot.error = message;
    }

    pub fn set_pending_approval(&mut self, pending: Option<PendingApproval>) {
        self.snapshot.pending_approval = pending;
    }

    /// Recompute counters from authoritative chapter records. Status, error,
    /// pending approval and the duration window are kept.
    pub fn rebuild(&mut self, chapters: &[Chapter], target_words: u64) {
        let snapshot = &mut self.snapshot;
        snapshot.target_words = target_words;
        snapshot.total_units = chapters.iter().map(|c| c.units.len()).sum();
        snapshot.completed_units = count(chapters, UnitStatus::Done);
        snapshot.failed_units = count(chapters, UnitStatus::Failed);
        snapshot.skipped_units = count(chapters, UnitStatus::Skipped);
        snapshot.total_words = chapters.iter().map(|c| c.word_count).sum();
        self.refresh_eta();
    }

    pub fn unit_started(
        &mut self,
        chapter_index: usize,
        chapter_title: &str,
        unit_index: usize,
        unit_title: &str,
    ) {
        self.snapshot.current_chapter_index = Some(chapter_index);
        self.snapshot.current_chapter_title = Some(chapter_title.to_string());
        self.snapshot.current_unit_index = Some(unit_index);
        self.snapshot.current_unit_title = Some(unit_title.to_string());
    }

    pub fn unit_done(&mut self, words: u64, elapsed: Duration) {
        self.snapshot.completed_units += 1;
        self.snapshot.total_words += words;
        self.durations.record(elapsed);
        self.refresh_eta();
    }

    pub fn unit_failed(&mut self) {
        self.snapshot.failed_units += 1;
        self.refresh_eta();
    }

    pub fn units_skipped(&mut self, count: usize) {
        self.snapshot.skipped_units += count;
        self.refresh_eta();
    }

    pub fn clear_position(&mut self) {
        self.snapshot.current_chapter_index = None;
        self.snapshot.current_chapter_title = None;
        self.snapshot.current_unit_index = None;
        self.snapshot.current_unit_title = None;
    }

    pub fn clear_durations(&mut self) {
        self.durations.clear();
        self.refresh_eta();
    }

    /// Back to a blank idle state.
    pub fn reset(&mut self) {
        self.snapshot = ProgressSnapshot::default();
        self.durations.clear();
    }

    fn refresh_eta(&mut self) {
        let remaining = self.snapshot.remaining_units();
        self.snapshot.avg_unit_secs = self.durations.average().map(|d| d.as_secs_f64());
        self.snapshot.eta_secs = self.durations.eta(remaining).map(|d| d.as_secs());
    }
}

fn count(chapters: &[Chapter], status: UnitStatus) -> usize {
    chapters.iter().map(|c| c.count_status(status)).sum()
}
