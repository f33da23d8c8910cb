//! Generation orchestrator
//!
//! Drives one project through outline generation and sequential unit writing.
//! Every decision is re-derived from the chapter store at the start of a run,
//! so a run can stop at any point (pause, crash, fatal error) and be resumed.

use crate::config::EngineConfig;
use crate::error::{ApiError, RetryError, StorageError};
use crate::generation::blocks::BlockPersister;
use crate::generation::continuity::{CharacterContinuityTracker, CharacterHistory};
use crate::generation::events::{EngineEvent, EventSink};
use crate::generation::outline::OutlineStage;
use crate::generation::progress::{PendingApproval, ProgressSnapshot, ProgressTracker, RunStatus};
use crate::generation::writer::{tail_chars, UnitAssignment, UnitWriterStage};
use crate::provider::Collaborators;
use crate::recovery::{RecoveryHint, RecoveryHintStore};
use crate::store::{Chapter, ChapterStatus, ChapterStore, Project, UnitStatus};
use crate::types::{count_words, ChapterId, ProjectId};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-run switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Stop for approval after every chapter but the last.
    pub checkpoint: bool,
    /// Replay finished units as preview events.
    pub preview: bool,
}

enum RunOutcome {
    Completed,
    Paused,
    AwaitingApproval(PendingApproval),
}

enum ChapterOutcome {
    Resolved,
    Paused,
}

enum UnitOutcome {
    Done { blocks: u32 },
    Failed,
    Paused,
}

pub struct Orchestrator {
    project_id: ProjectId,
    store: Arc<dyn ChapterStore>,
    config: EngineConfig,
    outline: OutlineStage,
    writer: UnitWriterStage,
    persister: BlockPersister,
    continuity: CharacterContinuityTracker,
    hints: Option<Arc<RecoveryHintStore>>,
    events: EventSink,
    progress: Mutex<ProgressTracker>,
    options: Mutex<RunOptions>,
    cancel: Mutex<CancellationToken>,
    run_guard: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        project_id: ProjectId,
        store: Arc<dyn ChapterStore>,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Self {
        let events = EventSink::new();
        Self {
            outline: OutlineStage::new(
                collaborators.outline,
                Arc::clone(&store),
                events.clone(),
                &config,
            ),
            writer: UnitWriterStage::new(collaborators.content, events.clone(), &config),
            persister: BlockPersister::new(Arc::clone(&store)),
            continuity: CharacterContinuityTracker::new(
                collaborators.summary,
                Arc::clone(&store),
                config.character_history_cap,
            ),
            progress: Mutex::new(ProgressTracker::new(config.duration_window)),
            options: Mutex::new(RunOptions::default()),
            cancel: Mutex::new(CancellationToken::new()),
            run_guard: tokio::sync::Mutex::new(()),
            hints: None,
            project_id,
            store,
            config,
            events,
        }
    }

    pub fn with_recovery_hints(mut self, hints: Arc<RecoveryHintStore>) -> Self {
        self.hints = Some(hints);
        self
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.progress.lock().snapshot().clone()
    }

    pub fn status(&self) -> RunStatus {
        self.progress.lock().status()
    }

    pub fn options(&self) -> RunOptions {
        *self.options.lock()
    }

    /// Toggle preview replay for the next run or continuation.
    pub fn set_preview(&self, preview: bool) {
        self.options.lock().preview = preview;
    }

    pub fn character_history(&self) -> CharacterHistory {
        self.continuity.snapshot()
    }

    /// Wait for background chapter summarization to finish.
    pub async fn settle(&self) {
        self.continuity.settle().await;
    }

    /// Recompute counters from the store without running anything.
    pub fn refresh(&self) -> Result<ProgressSnapshot, ApiError> {
        let project = self.load_project()?;
        let chapters = self.store.list_chapters(&self.project_id)?;
        self.progress
            .lock()
            .rebuild(&chapters, project.target_word_count);
        Ok(self.snapshot())
    }

    /// Pick up run options and a pending checkpoint decision recorded by an
    /// earlier process. Only applies while idle.
    pub fn restore_from_hint(&self) -> Result<Option<RecoveryHint>, ApiError> {
        let Some(hints) = &self.hints else {
            return Ok(None);
        };
        let Some(hint) = hints.get(&self.project_id)? else {
            return Ok(None);
        };
        if self.status() != RunStatus::Idle {
            return Ok(Some(hint));
        }

        self.options.lock().checkpoint = hint.checkpoint;
        if hint.status == RunStatus::AwaitingApproval {
            if let Some(pending) = hint.pending_approval.clone() {
                let mut progress = self.progress.lock();
                progress.set_status(RunStatus::AwaitingApproval);
                progress.set_pending_approval(Some(pending));
            }
        }
        Ok(Some(hint))
    }

    /// Fresh run. Clears the character history and duration window.
    /// Rejected while a chapter awaits approval.
    pub async fn start(&self, options: RunOptions) -> Result<ProgressSnapshot, ApiError> {
        let guard = self.acquire()?;
        if self.status() == RunStatus::AwaitingApproval {
            return Err(ApiError::InvalidState(
                "A chapter is awaiting approval; approve it, regenerate it, or reset".to_string(),
            ));
        }
        *self.options.lock() = options;
        self.continuity.clear();
        {
            let mut progress = self.progress.lock();
            progress.clear_durations();
            progress.set_pending_approval(None);
        }
        info!(
            project_id = %self.project_id,
            checkpoint = options.checkpoint,
            preview = options.preview,
            "Starting generation run"
        );
        self.drive(guard).await
    }

    /// Continue from persisted state. Rejected while a chapter awaits approval.
    pub async fn resume(&self) -> Result<ProgressSnapshot, ApiError> {
        let guard = self.acquire()?;
        if self.status() == RunStatus::AwaitingApproval {
            return Err(ApiError::InvalidState(
                "A chapter is awaiting approval; approve or regenerate it".to_string(),
            ));
        }
        info!(project_id = %self.project_id, "Resuming generation run");
        self.drive(guard).await
    }

    /// Cancel the in-flight request and stop before the next unit. Returns
    /// whether a run was active.
    pub fn pause(&self) -> bool {
        self.cancel.lock().cancel();
        let active = self.status().is_active();
        if active {
            info!(project_id = %self.project_id, "Pause requested");
        }
        active
    }

    /// Stop any run, then drop all run-local state and the recovery hint.
    /// Persisted chapters and blocks are untouched.
    pub async fn reset(&self) -> Result<(), ApiError> {
        self.cancel.lock().cancel();
        let _guard = self.run_guard.lock().await;

        self.continuity.clear();
        self.progress.lock().reset();
        *self.options.lock() = RunOptions::default();
        if let Some(hints) = &self.hints {
            hints.clear(&self.project_id)?;
        }
        self.events.emit(EngineEvent::StatusChanged(RunStatus::Idle));
        info!(project_id = %self.project_id, "Run state reset");
        Ok(())
    }

    /// Accept the chapter held at a checkpoint and continue.
    pub async fn approve(&self) -> Result<ProgressSnapshot, ApiError> {
        let guard = self.acquire()?;
        let pending = self.take_pending_approval()?;
        info!(chapter_id = %pending.chapter_id, title = %pending.chapter_title, "Chapter approved");
        self.drive(guard).await
    }

    /// Discard a chapter's text and write it again. Allowed at a checkpoint
    /// and whenever no run is active.
    pub async fn regenerate_chapter(
        &self,
        chapter_id: &ChapterId,
    ) -> Result<ProgressSnapshot, ApiError> {
        let guard = self.acquire()?;
        let chapter = self
            .store
            .get_chapter(chapter_id)?
            .ok_or_else(|| StorageError::ChapterNotFound(chapter_id.clone()))?;
        if chapter.project_id != self.project_id {
            return Err(ApiError::InvalidState(format!(
                "Chapter {} belongs to project {}",
                chapter_id, chapter.project_id
            )));
        }

        self.continuity.chapter_reset(&chapter);
        self.store.reset_chapter(chapter_id)?;
        {
            let mut progress = self.progress.lock();
            progress.set_pending_approval(None);
            if progress.status() == RunStatus::AwaitingApproval {
                progress.set_status(RunStatus::Paused);
            }
        }
        info!(chapter_id = %chapter_id, title = %chapter.title, "Regenerating chapter");
        self.drive(guard).await
    }

    /// Put every failed and skipped unit back to pending and run.
    pub async fn restart_failed(&self) -> Result<ProgressSnapshot, ApiError> {
        let guard = self.acquire()?;
        let reset = self
            .store
            .reset_units(&self.project_id, &[UnitStatus::Failed, UnitStatus::Skipped])?;
        {
            let mut progress = self.progress.lock();
            progress.set_pending_approval(None);
            if progress.status() == RunStatus::AwaitingApproval {
                progress.set_status(RunStatus::Paused);
            }
        }
        info!(project_id = %self.project_id, reset, "Restarting failed units");
        self.drive(guard).await
    }

    fn acquire(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, ApiError> {
        let guard = self
            .run_guard
            .try_lock()
            .map_err(|_| ApiError::RunInProgress(self.project_id.clone()))?;
        *self.cancel.lock() = CancellationToken::new();
        Ok(guard)
    }

    fn take_pending_approval(&self) -> Result<PendingApproval, ApiError> {
        let mut progress = self.progress.lock();
        let pending = progress
            .snapshot()
            .pending_approval
            .clone()
            .filter(|_| progress.status() == RunStatus::AwaitingApproval)
            .ok_or_else(|| ApiError::InvalidState("No chapter is awaiting approval".to_string()))?;
        progress.set_pending_approval(None);
        Ok(pending)
    }

    async fn drive(
        &self,
        _guard: tokio::sync::MutexGuard<'_, ()>,
    ) -> Result<ProgressSnapshot, ApiError> {
        let cancel = self.cancel.lock().clone();
        self.progress.lock().set_error(None);

        let result = self.run_loop(&cancel).await;

        self.progress.lock().clear_position();
        let outcome = match result {
            Ok(RunOutcome::Completed) => {
                info!(project_id = %self.project_id, "Generation completed");
                self.set_status(RunStatus::Completed);
                Ok(())
            }
            Ok(RunOutcome::Paused) => {
                info!(project_id = %self.project_id, "Generation paused");
                self.set_status(RunStatus::Paused);
                Ok(())
            }
            Ok(RunOutcome::AwaitingApproval(pending)) => {
                info!(
                    chapter_id = %pending.chapter_id,
                    title = %pending.chapter_title,
                    "Awaiting approval"
                );
                self.progress.lock().set_pending_approval(Some(pending));
                self.set_status(RunStatus::AwaitingApproval);
                Ok(())
            }
            Err(err) => {
                error!(project_id = %self.project_id, error = %err, "Generation run failed");
                self.progress.lock().set_error(Some(err.to_string()));
                self.set_status(RunStatus::Error);
                Err(err)
            }
        };
        self.publish();
        outcome.map(|_| self.snapshot())
    }

    async fn run_loop(&self, cancel: &CancellationToken) -> Result<RunOutcome, ApiError> {
        let project = self.load_project()?;
        let mut chapters = self.reload(&project)?;

        let mut passes = 0u32;
        loop {
            let missing = chapters.iter().filter(|c| !c.has_outline()).count();
            if missing == 0 {
                break;
            }
            if passes >= self.config.outline_passes {
                return Err(ApiError::OutlineIncomplete { missing, passes });
            }
            passes += 1;
            self.set_status(RunStatus::GeneratingOutline);
            self.publish();

            let report = self.outline.run(&project, &chapters, cancel).await;
            if report.cancelled {
                return Ok(RunOutcome::Paused);
            }
            debug!(
                pass = passes,
                outlined = report.outlined.len(),
                failed = report.failed.len(),
                "Outline pass finished"
            );
            chapters = self.reload(&project)?;
        }

        self.set_status(RunStatus::Writing);
        self.publish();

        let last_index = chapters.len().saturating_sub(1);
        for index in 0..chapters.len() {
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Paused);
            }
            let chapter = &chapters[index];
            if chapter.status == ChapterStatus::Completed && chapter.is_resolved() {
                continue;
            }

            match self.write_chapter(&project, &chapters, index, cancel).await? {
                ChapterOutcome::Paused => return Ok(RunOutcome::Paused),
                ChapterOutcome::Resolved => {}
            }

            let completed = self
                .store
                .set_chapter_status(&chapter.id, ChapterStatus::Completed)?;
            info!(
                chapter_id = %completed.id,
                title = %completed.title,
                words = completed.word_count,
                "Chapter completed"
            );
            self.events.emit(EngineEvent::ChapterCompleted {
                chapter_id: completed.id.clone(),
                title: completed.title.clone(),
                word_count: completed.word_count,
            });
            self.continuity.chapter_completed(&completed);

            let checkpoint = self.options.lock().checkpoint;
            if checkpoint && index < last_index && !self.budget_reached() {
                return Ok(RunOutcome::AwaitingApproval(PendingApproval {
                    chapter_id: completed.id.clone(),
                    chapter_title: completed.title.clone(),
                    word_count: completed.word_count,
                }));
            }
        }

        Ok(RunOutcome::Completed)
    }

    async fn write_chapter(
        &self,
        project: &Project,
        chapters: &[Chapter],
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<ChapterOutcome, ApiError> {
        let chapter = &chapters[index];
        let mut next_position = self.store.block_count(&chapter.id)?;

        for (unit_index, unit) in chapter.units.iter().enumerate() {
            if unit.status.is_terminal() {
                continue;
            }
            if cancel.is_cancelled() {
                return Ok(ChapterOutcome::Paused);
            }

            if self.budget_reached() {
                let remaining: Vec<u32> = chapter.units[unit_index..]
                    .iter()
                    .filter(|u| u.status == UnitStatus::Pending)
                    .map(|u| u.seq)
                    .collect();
                self.store
                    .set_unit_statuses(&chapter.id, &remaining, UnitStatus::Skipped)?;
                self.progress.lock().units_skipped(remaining.len());
                info!(
                    chapter_id = %chapter.id,
                    skipped = remaining.len(),
                    "Word budget reached, skipping remaining units"
                );
                self.publish();
                break;
            }

            match self
                .write_unit(project, chapters, index, unit_index, next_position, cancel)
                .await?
            {
                UnitOutcome::Done { blocks } => {
                    next_position += blocks;
                    let delay = self.config.inter_unit_delay();
                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                UnitOutcome::Failed => {}
                UnitOutcome::Paused => return Ok(ChapterOutcome::Paused),
            }
        }

        let current = self
            .store
            .get_chapter(&chapter.id)?
            .ok_or_else(|| StorageError::ChapterNotFound(chapter.id.clone()))?;
        if current.is_resolved() {
            Ok(ChapterOutcome::Resolved)
        } else if cancel.is_cancelled() {
            Ok(ChapterOutcome::Paused)
        } else {
            Err(ApiError::InvalidState(format!(
                "Chapter '{}' still has unresolved units",
                current.title
            )))
        }
    }

    async fn write_unit(
        &self,
        project: &Project,
        chapters: &[Chapter],
        chapter_index: usize,
        unit_index: usize,
        start_position: u32,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome, ApiError> {
        let chapter = &chapters[chapter_index];
        let unit = &chapter.units[unit_index];

        self.store
            .set_unit_status(&chapter.id, unit.seq, UnitStatus::Writing)?;
        self.progress
            .lock()
            .unit_started(chapter_index, &chapter.title, unit_index, &unit.title);
        self.publish();
        debug!(chapter_id = %chapter.id, unit_seq = unit.seq, title = %unit.title, "Writing unit");

        let started = Instant::now();
        let assignment = UnitAssignment {
            project,
            chapter,
            unit,
            prior_prose: self.prior_prose(chapters, chapter_index)?,
            character_hints: self.continuity.hints(),
        };
        let preview = self.options.lock().preview;

        match self.writer.write(assignment, preview, cancel).await {
            Ok(text) => {
                let blocks = match self
                    .persister
                    .persist(&chapter.id, unit.seq, &text, start_position)
                {
                    Ok(blocks) => blocks,
                    Err(err) => {
                        warn!(chapter_id = %chapter.id, unit_seq = unit.seq, error = %err, "Failed to persist unit");
                        self.fail_unit(chapter, unit.seq, err.to_string())?;
                        return Ok(UnitOutcome::Failed);
                    }
                };

                let words: u64 = blocks.iter().map(|b| count_words(&b.text)).sum();
                let seq = unit.seq;
                self.store.update_chapter(&chapter.id, &mut |record| {
                    record.word_count += words;
                    if let Some(unit) = record.units.iter_mut().find(|u| u.seq == seq) {
                        unit.status = UnitStatus::Done;
                    }
                    Ok(())
                })?;
                self.progress.lock().unit_done(words, started.elapsed());
                debug!(chapter_id = %chapter.id, unit_seq = seq, words, "Unit done");
                self.events.emit(EngineEvent::UnitCompleted {
                    chapter_id: chapter.id.clone(),
                    unit_seq: seq,
                    words,
                });
                self.publish();
                Ok(UnitOutcome::Done {
                    blocks: blocks.len() as u32,
                })
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(
                    chapter_id = %chapter.id,
                    unit_seq = unit.seq,
                    attempts,
                    error = %last,
                    "Unit failed after retries"
                );
                self.fail_unit(chapter, unit.seq, last.to_string())?;
                Ok(UnitOutcome::Failed)
            }
            Err(RetryError::Cancelled) => {
                self.store
                    .set_unit_status(&chapter.id, unit.seq, UnitStatus::Pending)?;
                Ok(UnitOutcome::Paused)
            }
            Err(RetryError::Fatal(err)) => {
                self.store
                    .set_unit_status(&chapter.id, unit.seq, UnitStatus::Pending)?;
                Err(ApiError::ServiceError(err))
            }
        }
    }

    fn fail_unit(&self, chapter: &Chapter, seq: u32, error: String) -> Result<(), ApiError> {
        self.store
            .set_unit_status(&chapter.id, seq, UnitStatus::Failed)?;
        self.progress.lock().unit_failed();
        self.events.emit(EngineEvent::UnitFailed {
            chapter_id: chapter.id.clone(),
            unit_seq: seq,
            error,
        });
        self.publish();
        Ok(())
    }

    fn load_project(&self) -> Result<Project, ApiError> {
        Ok(self
            .store
            .get_project(&self.project_id)?
            .ok_or_else(|| StorageError::ProjectNotFound(self.project_id.clone()))?)
    }

    /// Read chapters and repair what an abrupt stop can leave behind: units
    /// stuck in `writing` go back to pending, units whose blocks landed are
    /// marked done, done units whose blocks are gone are pending again, and
    /// word counts are recomputed from blocks.
    fn reload(&self, project: &Project) -> Result<Vec<Chapter>, ApiError> {
        let mut chapters = self.store.list_chapters(&project.id)?;
        for chapter in chapters.iter_mut() {
            let blocks = self.store.list_blocks(&chapter.id)?;
            let written: BTreeSet<u32> = blocks.iter().map(|b| b.unit_seq).collect();
            let words: u64 = blocks.iter().map(|b| count_words(&b.text)).sum();

            let lost_text = chapter
                .units
                .iter()
                .any(|u| u.status == UnitStatus::Done && !written.contains(&u.seq));
            let needs_repair = lost_text
                || chapter.word_count != words
                || chapter.units.iter().any(|u| {
                    u.status == UnitStatus::Writing
                        || (written.contains(&u.seq) && u.status != UnitStatus::Done)
                });
            if !needs_repair {
                continue;
            }

            debug!(chapter_id = %chapter.id, lost_text, "Repairing interrupted chapter state");
            *chapter = self.store.update_chapter(&chapter.id, &mut |record| {
                for unit in record.units.iter_mut() {
                    if written.contains(&unit.seq) {
                        unit.status = UnitStatus::Done;
                    } else if matches!(unit.status, UnitStatus::Writing | UnitStatus::Done) {
                        unit.status = UnitStatus::Pending;
                    }
                }
                record.word_count = words;
                if lost_text {
                    record.status = ChapterStatus::Pending;
                    record.summary = None;
                    record.characters.clear();
                }
                Ok(())
            })?;
        }
        self.progress
            .lock()
            .rebuild(&chapters, project.target_word_count);
        Ok(chapters)
    }

    /// Tail of everything written up to and including the current chapter.
    fn prior_prose(&self, chapters: &[Chapter], chapter_index: usize) -> Result<String, ApiError> {
        let budget = self.config.context_window_chars;
        if budget == 0 {
            return Ok(String::new());
        }
        let mut pieces: Vec<String> = Vec::new();
        let mut collected = 0usize;
        'chapters: for chapter in chapters[..=chapter_index].iter().rev() {
            for block in self.store.list_blocks(&chapter.id)?.into_iter().rev() {
                collected += block.text.chars().count() + 2;
                pieces.push(block.text);
                if collected >= budget {
                    break 'chapters;
                }
            }
        }
        pieces.reverse();
        let joined = pieces.join("\n\n");
        Ok(tail_chars(&joined, budget).to_string())
    }

    fn budget_reached(&self) -> bool {
        self.progress
            .lock()
            .snapshot()
            .budget_reached(self.config.budget_ratio)
    }

    fn set_status(&self, status: RunStatus) {
        let changed = {
            let mut progress = self.progress.lock();
            let previous = progress.status();
            progress.set_status(status);
            previous != status
        };
        if changed {
            debug!(project_id = %self.project_id, status = %status, "Status changed");
            self.events.emit(EngineEvent::StatusChanged(status));
        }
    }

    /// Broadcast the current snapshot and refresh the recovery hint.
    fn publish(&self) {
        let snapshot = self.snapshot();
        if let Some(hints) = &self.hints {
            let checkpoint = self.options.lock().checkpoint;
            let hint = RecoveryHint::from_snapshot(&self.project_id, &snapshot, checkpoint);
            if let Err(err) = hints.put(&hint) {
                warn!(project_id = %self.project_id, error = %err, "Failed to write recovery hint");
            }
        }
        self.events.emit(EngineEvent::Progress(Box::new(snapshot)));
    }
}
