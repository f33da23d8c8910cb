//! Outline stage: request unit breakdowns for chapters that lack one.
//!
//! Requests go out in batches; chapters within a batch run concurrently and
//! fail independently. A failed chapter simply stays without a breakdown.

use crate::config::EngineConfig;
use crate::generation::events::{EngineEvent, EventSink};
use crate::provider::{OutlineRequest, OutlineService, UnitDraft};
use crate::store::{Chapter, ChapterStore, Project, UnitDescriptor};
use crate::types::ChapterId;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct OutlinePassReport {
    pub outlined: Vec<ChapterId>,
    pub failed: Vec<ChapterId>,
    /// The pass stopped early because the run was paused.
    pub cancelled: bool,
}

pub struct OutlineStage {
    service: Arc<dyn OutlineService>,
    store: Arc<dyn ChapterStore>,
    events: EventSink,
    batch_size: usize,
    batch_delay: Duration,
}

impl OutlineStage {
    pub fn new(
        service: Arc<dyn OutlineService>,
        store: Arc<dyn ChapterStore>,
        events: EventSink,
        config: &EngineConfig,
    ) -> Self {
        Self {
            service,
            store,
            events,
            batch_size: config.outline_batch_size.max(1),
            batch_delay: config.outline_batch_delay(),
        }
    }

    /// One pass over every chapter (of `chapters`, sorted by position) that
    /// has no breakdown yet.
    pub async fn run(
        &self,
        project: &Project,
        chapters: &[Chapter],
        cancel: &CancellationToken,
    ) -> OutlinePassReport {
        let mut report = OutlinePassReport::default();
        let missing: Vec<&Chapter> = chapters.iter().filter(|c| !c.has_outline()).collect();
        if missing.is_empty() {
            return report;
        }
        info!(
            project_id = %project.id,
            chapters = missing.len(),
            batch_size = self.batch_size,
            "Generating outlines"
        );

        for (batch_index, batch) in missing.chunks(self.batch_size).enumerate() {
            if batch_index > 0 && !self.batch_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.batch_delay) => {}
                }
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let requests = batch
                .iter()
                .map(|chapter| self.outline_chapter(project, chapters, chapter));
            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                results = join_all(requests) => results,
            };

            for (chapter, result) in batch.iter().zip(results) {
                match result {
                    Ok(units) => {
                        debug!(chapter_id = %chapter.id, units, "Chapter outlined");
                        report.outlined.push(chapter.id.clone());
                    }
                    Err(error) => {
                        warn!(chapter_id = %chapter.id, error = %error, "Outline generation failed");
                        self.events.emit(EngineEvent::OutlineFailed {
                            chapter_id: chapter.id.clone(),
                            error,
                        });
                        report.failed.push(chapter.id.clone());
                    }
                }
            }
        }

        report
    }

    async fn outline_chapter(
        &self,
        project: &Project,
        chapters: &[Chapter],
        chapter: &Chapter,
    ) -> Result<usize, String> {
        let request = build_request(project, chapters, chapter);
        let chapter_budget = request.target_words;
        let response = self
            .service
            .generate_outline(request)
            .await
            .map_err(|e| e.to_string())?;

        let units = normalize_units(response.units, chapter_budget);
        if units.is_empty() {
            return Err("outline contained no usable units".to_string());
        }
        let count = units.len();
        self.store
            .set_units(&chapter.id, units)
            .map_err(|e| e.to_string())?;
        Ok(count)
    }
}

pub fn build_request(project: &Project, chapters: &[Chapter], chapter: &Chapter) -> OutlineRequest {
    let prior_chapters_summary = chapters
        .iter()
        .filter(|c| c.position < chapter.position)
        .map(|c| {
            let gist = c
                .summary
                .as_deref()
                .or(c.synopsis.as_deref())
                .unwrap_or(c.title.as_str());
            format!("Chapter {} ({}): {}", c.position + 1, c.title, gist)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let next_chapter_title = chapters
        .iter()
        .filter(|c| c.position > chapter.position)
        .min_by_key(|c| c.position)
        .map(|c| c.title.clone());

    let chapter_count = chapters.len().max(1) as u64;
    let target_words = u32::try_from(project.target_word_count / chapter_count).unwrap_or(u32::MAX);

    OutlineRequest {
        project_title: project.title.clone(),
        kind: project.kind,
        premise: project.premise.clone(),
        chapter_title: chapter.title.clone(),
        chapter_number: chapter.position + 1,
        chapter_synopsis: chapter.synopsis.clone(),
        prior_chapters_summary,
        next_chapter_title,
        target_words,
    }
}

/// Drop unreadable or untitled entries and number the rest from 1. Entries
/// without a word target get an even share of the chapter budget.
pub fn normalize_units(drafts: Vec<Option<UnitDraft>>, chapter_budget: u32) -> Vec<UnitDescriptor> {
    let valid: Vec<UnitDraft> = drafts
        .into_iter()
        .flatten()
        .filter(|d| !d.title.trim().is_empty())
        .collect();
    if valid.is_empty() {
        return Vec::new();
    }
    let share = chapter_budget / valid.len() as u32;

    valid
        .into_iter()
        .enumerate()
        .map(|(index, draft)| {
            let target = if draft.target_words == 0 {
                share
            } else {
                draft.target_words
            };
            UnitDescriptor::pending(
                index as u32 + 1,
                draft.title.trim(),
                draft.description.trim(),
                target,
            )
        })
        .collect()
}
