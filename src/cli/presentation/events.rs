//! Live rendering of engine events on the terminal.

use crate::error::RetryClass;
use crate::generation::{EngineEvent, ProgressSnapshot};
use crate::types::ChapterId;
use owo_colors::OwoColorize;

/// Turns engine events into terminal text. Preview events arrive as the
/// cumulative text of a unit; only the new tail is printed.
#[derive(Default)]
pub struct EventPrinter {
    last: Option<ProgressSnapshot>,
    preview: Option<(ChapterId, u32, usize)>,
}

impl EventPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to print for `event`, already newline-terminated except for
    /// preview fragments.
    pub fn render(&mut self, event: &EngineEvent) -> Option<String> {
        match event {
            EngineEvent::Progress(snapshot) => {
                self.last = Some((**snapshot).clone());
                None
            }
            EngineEvent::Preview {
                chapter_id,
                unit_seq,
                text,
            } => {
                let shown = match &self.preview {
                    Some((id, seq, shown)) if id == chapter_id && seq == unit_seq => *shown,
                    _ => 0,
                };
                if text.len() <= shown {
                    return None;
                }
                let fragment = text[shown..].trim_start().to_string();
                let prefix = if shown == 0 { "\n" } else { " " };
                self.preview = Some((chapter_id.clone(), *unit_seq, text.len()));
                Some(format!("{}{}", prefix, fragment.dimmed()))
            }
            other => {
                let line = self.render_line(other)?;
                let prefix = if self.preview.take().is_some() { "\n" } else { "" };
                Some(format!("{}{}\n", prefix, line))
            }
        }
    }

    fn render_line(&self, event: &EngineEvent) -> Option<String> {
        match event {
            EngineEvent::StatusChanged(status) => Some(format!("{} {}", "status:".dimmed(), status)),
            EngineEvent::Waiting(notice) => {
                let reason = match notice.class {
                    RetryClass::RateLimited => "rate limited",
                    RetryClass::Transient => "transient error",
                    RetryClass::Fatal => "error",
                };
                Some(format!(
                    "{} {} (attempt {}), retrying '{}' in {:.1}s",
                    "waiting:".yellow(),
                    reason,
                    notice.attempt,
                    notice.label,
                    notice.delay.as_secs_f64()
                ))
            }
            EngineEvent::UnitCompleted { unit_seq, words, .. } => {
                let (chapter, counts) = match &self.last {
                    Some(s) => (
                        s.current_chapter_title.clone().unwrap_or_default(),
                        format!(" [{}/{}]", s.completed_units, s.total_units),
                    ),
                    None => (String::new(), String::new()),
                };
                Some(format!(
                    "{} {} unit {}: {} words{}",
                    "done".green(),
                    chapter,
                    unit_seq,
                    words,
                    counts
                ))
            }
            EngineEvent::UnitFailed { unit_seq, error, .. } => {
                Some(format!("{} unit {}: {}", "failed".red(), unit_seq, error))
            }
            EngineEvent::OutlineFailed { chapter_id, error } => Some(format!(
                "{} outline for chapter {}: {}",
                "failed".red(),
                chapter_id,
                error
            )),
            EngineEvent::ChapterCompleted { title, word_count, .. } => Some(format!(
                "{}",
                format!("Chapter '{}' complete ({} words)", title, word_count).bold()
            )),
            EngineEvent::Progress(_) | EngineEvent::Preview { .. } => None,
        }
    }
}
