//! Unit writer stage: one content request per unit, with classified retries.

use crate::config::{EngineConfig, PreviewConfig};
use crate::error::{RetryError, ServiceError};
use crate::generation::events::{EngineEvent, EventSink};
use crate::generation::retry::RetryPolicy;
use crate::provider::{CharacterHint, ContentRequest, ContentService};
use crate::store::{Chapter, Project, UnitDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything the content service needs for one unit.
pub struct UnitAssignment<'a> {
    pub project: &'a Project,
    pub chapter: &'a Chapter,
    pub unit: &'a UnitDescriptor,
    pub prior_prose: String,
    pub character_hints: Vec<CharacterHint>,
}

pub struct UnitWriterStage {
    service: Arc<dyn ContentService>,
    policy: RetryPolicy,
    events: EventSink,
    min_content_chars: usize,
    preview: PreviewConfig,
}

impl UnitWriterStage {
    pub fn new(service: Arc<dyn ContentService>, events: EventSink, config: &EngineConfig) -> Self {
        Self {
            service,
            policy: RetryPolicy::from_config(&config.retry),
            events,
            min_content_chars: config.min_content_chars,
            preview: config.preview.clone(),
        }
    }

    /// Generate the prose for one unit. Replies shorter than the minimum
    /// length count as transient failures and are retried.
    pub async fn write(
        &self,
        assignment: UnitAssignment<'_>,
        preview: bool,
        cancel: &CancellationToken,
    ) -> Result<String, RetryError> {
        let UnitAssignment {
            project,
            chapter,
            unit,
            prior_prose,
            character_hints,
        } = assignment;

        let request = ContentRequest {
            project_title: project.title.clone(),
            kind: project.kind,
            premise: project.premise.clone(),
            chapter_title: chapter.title.clone(),
            chapter_number: chapter.position + 1,
            unit: unit.clone(),
            unit_count: chapter.units.len(),
            prior_prose,
            character_hints,
        };
        let label = format!("{} / {}", chapter.title, unit.title);
        let minimum = self.min_content_chars;

        let text = self
            .policy
            .run(&label, cancel, &self.events, |_attempt| {
                let service = Arc::clone(&self.service);
                let request = request.clone();
                async move {
                    let response = service.generate_content(request).await?;
                    let text = response.text.trim().to_string();
                    let length = text.chars().count();
                    if length < minimum {
                        return Err(ServiceError::Degenerate { length, minimum });
                    }
                    Ok::<String, ServiceError>(text)
                }
            })
            .await?;

        if preview || self.preview.enabled {
            self.replay_preview(chapter, unit.seq, &text, cancel).await;
        }
        Ok(text)
    }

    /// Re-emit the finished text in word chunks for live display.
    async fn replay_preview(
        &self,
        chapter: &Chapter,
        unit_seq: u32,
        text: &str,
        cancel: &CancellationToken,
    ) {
        let words: Vec<&str> = text.split_whitespace().collect();
        let chunk = self.preview.chunk_words.max(1);
        let delay = Duration::from_millis(self.preview.chunk_delay_ms);
        let mut shown = 0usize;

        while shown < words.len() {
            if cancel.is_cancelled() {
                return;
            }
            shown = (shown + chunk).min(words.len());
            self.events.emit(EngineEvent::Preview {
                chapter_id: chapter.id.clone(),
                unit_seq,
                text: words[..shown].join(" "),
            });
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Last `max_chars` characters of `text`, cut on a character boundary.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((index, _)) => &text[index..],
        None => text,
    }
}
