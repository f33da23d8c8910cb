//! Chapter Store
//!
//! Durable records for projects, chapters (with their unit breakdown) and the
//! append-only paragraph blocks produced by generation. The store is the single
//! source of truth; everything the engine keeps in memory is rebuilt from it.

pub mod persistence;

pub use persistence::SledChapterStore;

use crate::error::StorageError;
use crate::types::{now_millis, ChapterId, ProjectId};
use serde::{Deserialize, Serialize};

/// Kind of document; decides whether units are scenes or sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Fiction,
    NonFiction,
}

impl ContentKind {
    pub fn unit_label(self) -> &'static str {
        match self {
            ContentKind::Fiction => "scene",
            ContentKind::NonFiction => "section",
        }
    }
}

/// Per-unit generation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Writing,
    Done,
    Failed,
    Skipped,
}

impl UnitStatus {
    /// Done, failed and skipped units are never re-executed without a reset.
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitStatus::Done | UnitStatus::Failed | UnitStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Writing => "writing",
            UnitStatus::Done => "done",
            UnitStatus::Failed => "failed",
            UnitStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    pub kind: ContentKind,
    pub premise: String,
    /// Word budget for the whole document.
    pub target_word_count: u64,
    pub created_at_ms: u64,
}

impl Project {
    pub fn new(
        id: ProjectId,
        title: impl Into<String>,
        kind: ContentKind,
        premise: impl Into<String>,
        target_word_count: u64,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            kind,
            premise: premise.into(),
            target_word_count,
            created_at_ms: now_millis(),
        }
    }
}

/// One scene or section of a chapter's breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    /// 1-based sequence number within the chapter.
    pub seq: u32,
    pub title: String,
    pub description: String,
    pub target_words: u32,
    pub status: UnitStatus,
}

impl UnitDescriptor {
    pub fn pending(
        seq: u32,
        title: impl Into<String>,
        description: impl Into<String>,
        target_words: u32,
    ) -> Self {
        Self {
            seq,
            title: title.into(),
            description: description.into(),
            target_words,
            status: UnitStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub project_id: ProjectId,
    pub title: String,
    /// Sort position within the project (0-based).
    pub position: u32,
    pub synopsis: Option<String>,
    pub units: Vec<UnitDescriptor>,
    pub word_count: u64,
    pub status: ChapterStatus,
    pub summary: Option<String>,
    pub characters: Vec<String>,
}

impl Chapter {
    pub fn new(
        project_id: ProjectId,
        title: impl Into<String>,
        position: u32,
        synopsis: Option<String>,
    ) -> Self {
        Self {
            id: ChapterId::generate(),
            project_id,
            title: title.into(),
            position,
            synopsis,
            units: Vec::new(),
            word_count: 0,
            status: ChapterStatus::Pending,
            summary: None,
            characters: Vec::new(),
        }
    }

    pub fn has_outline(&self) -> bool {
        !self.units.is_empty()
    }

    /// True once there is a breakdown and every unit reached a terminal status.
    pub fn is_resolved(&self) -> bool {
        self.has_outline() && self.units.iter().all(|u| u.status.is_terminal())
    }

    pub fn unit(&self, seq: u32) -> Option<&UnitDescriptor> {
        self.units.iter().find(|u| u.seq == seq)
    }

    pub fn count_status(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }
}

/// Immutable paragraph of generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub chapter_id: ChapterId,
    pub position: u32,
    pub unit_seq: u32,
    pub text: String,
    pub written_at_ms: u64,
}

/// Chapter store interface.
///
/// `update_chapter` is the single read-modify-write primitive; the partial
/// update helpers are built on it so sibling fields are never clobbered.
pub trait ChapterStore: Send + Sync {
    fn put_project(&self, project: &Project) -> Result<(), StorageError>;
    fn get_project(&self, project_id: &ProjectId) -> Result<Option<Project>, StorageError>;
    fn list_projects(&self) -> Result<Vec<Project>, StorageError>;

    fn put_chapter(&self, chapter: &Chapter) -> Result<(), StorageError>;
    fn get_chapter(&self, chapter_id: &ChapterId) -> Result<Option<Chapter>, StorageError>;

    /// All chapters of a project, sorted by position.
    fn list_chapters(&self, project_id: &ProjectId) -> Result<Vec<Chapter>, StorageError>;

    /// Atomically apply `apply` to the stored chapter and return the new record.
    /// Nothing is written when `apply` fails.
    fn update_chapter(
        &self,
        chapter_id: &ChapterId,
        apply: &mut dyn FnMut(&mut Chapter) -> Result<(), StorageError>,
    ) -> Result<Chapter, StorageError>;

    /// Append paragraphs as consecutive blocks starting at `start_position`.
    /// All-or-nothing; `start_position` must equal the current block count.
    fn append_blocks(
        &self,
        chapter_id: &ChapterId,
        start_position: u32,
        unit_seq: u32,
        paragraphs: &[String],
    ) -> Result<Vec<Block>, StorageError>;

    /// Blocks of a chapter in position order.
    fn list_blocks(&self, chapter_id: &ChapterId) -> Result<Vec<Block>, StorageError>;

    fn block_count(&self, chapter_id: &ChapterId) -> Result<u32, StorageError>;

    fn delete_blocks(&self, chapter_id: &ChapterId) -> Result<usize, StorageError>;

    fn flush(&self) -> Result<(), StorageError>;

    /// Replace the whole unit breakdown.
    fn set_units(
        &self,
        chapter_id: &ChapterId,
        units: Vec<UnitDescriptor>,
    ) -> Result<Chapter, StorageError> {
        // Cloned per application; update_chapter may re-run on contention.
        self.update_chapter(chapter_id, &mut |chapter| {
            chapter.units = units.clone();
            Ok(())
        })
    }

    fn set_unit_status(
        &self,
        chapter_id: &ChapterId,
        seq: u32,
        status: UnitStatus,
    ) -> Result<Chapter, StorageError> {
        self.set_unit_statuses(chapter_id, &[seq], status)
    }

    fn set_unit_statuses(
        &self,
        chapter_id: &ChapterId,
        seqs: &[u32],
        status: UnitStatus,
    ) -> Result<Chapter, StorageError> {
        self.update_chapter(chapter_id, &mut |chapter| {
            for seq in seqs {
                let unit = chapter
                    .units
                    .iter_mut()
                    .find(|u| u.seq == *seq)
                    .ok_or_else(|| StorageError::UnitNotFound {
                        chapter_id: chapter.id.clone(),
                        seq: *seq,
                    })?;
                unit.status = status;
            }
            Ok(())
        })
    }

    fn set_word_count(&self, chapter_id: &ChapterId, words: u64) -> Result<Chapter, StorageError> {
        self.update_chapter(chapter_id, &mut |chapter| {
            chapter.word_count = words;
            Ok(())
        })
    }

    fn set_chapter_status(
        &self,
        chapter_id: &ChapterId,
        status: ChapterStatus,
    ) -> Result<Chapter, StorageError> {
        self.update_chapter(chapter_id, &mut |chapter| {
            chapter.status = status;
            Ok(())
        })
    }

    fn set_summary(
        &self,
        chapter_id: &ChapterId,
        summary: String,
        characters: Vec<String>,
    ) -> Result<Chapter, StorageError> {
        self.update_chapter(chapter_id, &mut |chapter| {
            chapter.summary = Some(summary.clone());
            chapter.characters = characters.clone();
            Ok(())
        })
    }

    /// Reset every unit whose status is in `statuses` back to pending, across
    /// the whole project. Touched chapters return to pending status.
    fn reset_units(
        &self,
        project_id: &ProjectId,
        statuses: &[UnitStatus],
    ) -> Result<usize, StorageError> {
        let mut reset = 0usize;
        for chapter in self.list_chapters(project_id)? {
            if !chapter.units.iter().any(|u| statuses.contains(&u.status)) {
                continue;
            }
            let mut touched = 0usize;
            self.update_chapter(&chapter.id, &mut |record| {
                touched = 0;
                for unit in record.units.iter_mut() {
                    if statuses.contains(&unit.status) {
                        unit.status = UnitStatus::Pending;
                        touched += 1;
                    }
                }
                if touched > 0 {
                    record.status = ChapterStatus::Pending;
                }
                Ok(())
            })?;
            reset += touched;
        }
        Ok(reset)
    }

    /// Clear a chapter for regeneration: blocks deleted, every unit pending,
    /// word count zeroed, summary dropped. The breakdown itself is kept.
    fn reset_chapter(&self, chapter_id: &ChapterId) -> Result<Chapter, StorageError> {
        self.delete_blocks(chapter_id)?;
        self.update_chapter(chapter_id, &mut |chapter| {
            for unit in chapter.units.iter_mut() {
                unit.status = UnitStatus::Pending;
            }
            chapter.word_count = 0;
            chapter.status = ChapterStatus::Pending;
            chapter.summary = None;
            chapter.characters.clear();
            Ok(())
        })
    }
}
