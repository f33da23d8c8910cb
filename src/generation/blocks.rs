//! Splits unit prose into paragraph blocks and persists them.

use crate::error::ApiError;
use crate::store::{Block, ChapterStore};
use crate::types::ChapterId;
use std::sync::Arc;

/// Split on blank lines (whitespace-only lines included). Paragraphs are
/// trimmed and never empty; single line breaks inside a paragraph are kept.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in normalized.lines() {
        if line.trim().is_empty() {
            flush(&mut current, &mut paragraphs);
        } else {
            current.push(line.trim_end());
        }
    }
    flush(&mut current, &mut paragraphs);
    paragraphs
}

fn flush(current: &mut Vec<&str>, paragraphs: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    let joined = current.join("\n");
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        paragraphs.push(trimmed.to_string());
    }
    current.clear();
}

pub struct BlockPersister {
    store: Arc<dyn ChapterStore>,
}

impl BlockPersister {
    pub fn new(store: Arc<dyn ChapterStore>) -> Self {
        Self { store }
    }

    /// Persist `text` as consecutive blocks from `start_position`. Either all
    /// paragraphs land or none do.
    pub fn persist(
        &self,
        chapter_id: &ChapterId,
        unit_seq: u32,
        text: &str,
        start_position: u32,
    ) -> Result<Vec<Block>, ApiError> {
        let paragraphs = split_paragraphs(text);
        if paragraphs.is_empty() {
            return Err(ApiError::GenerationFailed(format!(
                "Unit {} of chapter {} produced no paragraphs",
                unit_seq, chapter_id
            )));
        }
        Ok(self
            .store
            .append_blocks(chapter_id, start_position, unit_seq, &paragraphs)?)
    }
}
