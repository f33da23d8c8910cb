//! Persistence layer for the Chapter Store

use crate::error::StorageError;
use crate::store::{Block, Chapter, ChapterStore, Project};
use crate::types::{now_millis, ChapterId, ProjectId};
use sled::{Db, Tree};
use std::path::Path;

const TREE_PROJECTS: &str = "projects";
const TREE_CHAPTERS: &str = "chapters";
const TREE_BLOCKS: &str = "blocks";
const BLOCK_KEY_PAD: usize = 10;

/// Sled-based implementation of ChapterStore
///
/// Chapters are keyed by chapter id; blocks by `<chapter>:<padded position>`
/// so a prefix scan yields them in position order.
#[derive(Clone)]
pub struct SledChapterStore {
    db: Db,
    projects: Tree,
    chapters: Tree,
    blocks: Tree,
}

impl SledChapterStore {
    /// Open (or create) a store at the given directory.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open sled database: {}", e),
            ))
        })?;
        Self::from_db(db)
    }

    /// Build a store over an already opened database.
    pub fn from_db(db: Db) -> Result<Self, StorageError> {
        let projects = db.open_tree(TREE_PROJECTS)?;
        let chapters = db.open_tree(TREE_CHAPTERS)?;
        let blocks = db.open_tree(TREE_BLOCKS)?;
        Ok(Self {
            db,
            projects,
            chapters,
            blocks,
        })
    }

    /// Get the underlying sled database (for advanced operations)
    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn encode_block_key(chapter_id: &ChapterId, position: u32) -> String {
        encode_block_key(chapter_id, position)
    }
}

impl ChapterStore for SledChapterStore {
    fn put_project(&self, project: &Project) -> Result<(), StorageError> {
        let value = bincode::serialize(project)?;
        self.projects.insert(project.id.as_str().as_bytes(), value)?;
        Ok(())
    }

    fn get_project(&self, project_id: &ProjectId) -> Result<Option<Project>, StorageError> {
        let Some(raw) = self.projects.get(project_id.as_str().as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(&raw)?))
    }

    fn list_projects(&self) -> Result<Vec<Project>, StorageError> {
        let mut out = Vec::new();
        for item in self.projects.iter() {
            let (_, value) = item?;
            out.push(bincode::deserialize::<Project>(&value)?);
        }
        out.sort_by_key(|p| p.created_at_ms);
        Ok(out)
    }

    fn put_chapter(&self, chapter: &Chapter) -> Result<(), StorageError> {
        let value = bincode::serialize(chapter)?;
        self.chapters.insert(chapter.id.as_str().as_bytes(), value)?;
        Ok(())
    }

    fn get_chapter(&self, chapter_id: &ChapterId) -> Result<Option<Chapter>, StorageError> {
        let Some(raw) = self.chapters.get(chapter_id.as_str().as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(&raw)?))
    }

    fn list_chapters(&self, project_id: &ProjectId) -> Result<Vec<Chapter>, StorageError> {
        let mut out = Vec::new();
        for item in self.chapters.iter() {
            let (_, value) = item?;
            let chapter: Chapter = bincode::deserialize(&value)?;
            if &chapter.project_id == project_id {
                out.push(chapter);
            }
        }
        out.sort_by_key(|c| c.position);
        Ok(out)
    }

    fn update_chapter(
        &self,
        chapter_id: &ChapterId,
        apply: &mut dyn FnMut(&mut Chapter) -> Result<(), StorageError>,
    ) -> Result<Chapter, StorageError> {
        let key = chapter_id.as_str().as_bytes();
        loop {
            let current = self
                .chapters
                .get(key)?
                .ok_or_else(|| StorageError::ChapterNotFound(chapter_id.clone()))?;
            let mut chapter: Chapter = bincode::deserialize(&current)?;
            apply(&mut chapter)?;
            let encoded = bincode::serialize(&chapter)?;
            // Another writer got in between the read and the swap; re-read and re-apply.
            if self
                .chapters
                .compare_and_swap(key, Some(current), Some(encoded))?
                .is_ok()
            {
                return Ok(chapter);
            }
        }
    }

    fn append_blocks(
        &self,
        chapter_id: &ChapterId,
        start_position: u32,
        unit_seq: u32,
        paragraphs: &[String],
    ) -> Result<Vec<Block>, StorageError> {
        let existing = self.block_count(chapter_id)?;
        if existing != start_position {
            return Err(StorageError::BlockPositionConflict {
                chapter_id: chapter_id.clone(),
                expected: existing,
                actual: start_position,
            });
        }

        let written_at_ms = now_millis();
        let mut batch = sled::Batch::default();
        let mut blocks = Vec::with_capacity(paragraphs.len());
        for (offset, text) in paragraphs.iter().enumerate() {
            let block = Block {
                chapter_id: chapter_id.clone(),
                position: start_position + offset as u32,
                unit_seq,
                text: text.clone(),
                written_at_ms,
            };
            let key = encode_block_key(chapter_id, block.position);
            batch.insert(key.as_bytes(), bincode::serialize(&block)?);
            blocks.push(block);
        }

        self.blocks.apply_batch(batch)?;
        Ok(blocks)
    }

    fn list_blocks(&self, chapter_id: &ChapterId) -> Result<Vec<Block>, StorageError> {
        let prefix = format!("{}:", chapter_id);
        let mut out = Vec::new();
        for item in self.blocks.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            out.push(bincode::deserialize::<Block>(&value)?);
        }
        out.sort_by_key(|b| b.position);
        Ok(out)
    }

    fn block_count(&self, chapter_id: &ChapterId) -> Result<u32, StorageError> {
        let prefix = format!("{}:", chapter_id);
        let mut count = 0u32;
        for item in self.blocks.scan_prefix(prefix.as_bytes()).keys() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn delete_blocks(&self, chapter_id: &ChapterId) -> Result<usize, StorageError> {
        let prefix = format!("{}:", chapter_id);
        let mut batch = sled::Batch::default();
        let mut removed = 0usize;
        for key in self.blocks.scan_prefix(prefix.as_bytes()).keys() {
            batch.remove(key?);
            removed += 1;
        }
        self.blocks.apply_batch(batch)?;
        Ok(removed)
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn encode_block_key(chapter_id: &ChapterId, position: u32) -> String {
    format!("{chapter_id}:{position:0BLOCK_KEY_PAD$}")
}
