//! Status presentation: project progress, chapter table, run outcomes.

use crate::error::{ApiError, StorageError};
use crate::generation::{ProgressSnapshot, RunStatus};
use crate::recovery::RecoveryHint;
use crate::store::{Chapter, ChapterStatus, Project, UnitStatus};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde::Serialize;

/// Everything `folio status` reports for one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub project: Project,
    pub progress: ProgressSnapshot,
    pub budget_cutoff: Option<u64>,
    pub chapters: Vec<ChapterRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_hint: Option<RecoveryHint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterRow {
    pub number: u32,
    pub title: String,
    pub status: ChapterStatus,
    pub units: usize,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    pub words: u64,
}

impl From<&Chapter> for ChapterRow {
    fn from(chapter: &Chapter) -> Self {
        Self {
            number: chapter.position + 1,
            title: chapter.title.clone(),
            status: chapter.status,
            units: chapter.units.len(),
            done: chapter.count_status(UnitStatus::Done),
            failed: chapter.count_status(UnitStatus::Failed),
            skipped: chapter.count_status(UnitStatus::Skipped),
            words: chapter.word_count,
        }
    }
}

fn colored_status(status: RunStatus) -> String {
    match status {
        RunStatus::Completed => status.as_str().green().to_string(),
        RunStatus::Error => status.as_str().red().to_string(),
        RunStatus::Paused | RunStatus::AwaitingApproval => status.as_str().yellow().to_string(),
        RunStatus::GeneratingOutline | RunStatus::Writing => status.as_str().cyan().to_string(),
        RunStatus::Idle => status.as_str().to_string(),
    }
}

fn format_duration(secs: u64) -> String {
    match secs {
        s if s >= 3600 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s if s >= 60 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}s", s),
    }
}

fn format_timestamp(millis: u64) -> String {
    chrono::DateTime::from_timestamp_millis(millis as i64)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

pub fn format_status_text(status: &ProjectStatus) -> String {
    let progress = &status.progress;
    let project = &status.project;
    let mut out = format!("{}\n", project.title.bold().underline());
    out.push_str(&format!(
        "Project: {} ({})\nStatus: {}\n",
        project.id,
        project.kind.unit_label(),
        colored_status(progress.status)
    ));
    out.push_str(&format!(
        "Units: {}/{} done, {} failed, {} skipped\n",
        progress.completed_units, progress.total_units, progress.failed_units, progress.skipped_units
    ));
    match status.budget_cutoff {
        Some(cutoff) => out.push_str(&format!(
            "Words: {} of {} target (cutoff {})\n",
            progress.total_words, progress.target_words, cutoff
        )),
        None => out.push_str(&format!("Words: {}\n", progress.total_words)),
    }
    if let (Some(eta), Some(avg)) = (progress.eta_secs, progress.avg_unit_secs) {
        out.push_str(&format!(
            "ETA: {} ({:.0}s per unit)\n",
            format_duration(eta),
            avg
        ));
    }
    if let Some(pending) = &progress.pending_approval {
        out.push_str(&format!(
            "Awaiting approval: '{}' ({} words). Continue with `folio approve` or `folio regenerate <n>`.\n",
            pending.chapter_title, pending.word_count
        ));
    }
    if let Some(error) = &progress.error {
        out.push_str(&format!("Error: {}\n", error.red()));
    }
    if let Some(hint) = status.recovery_hint.as_ref().filter(|h| h.was_interrupted()) {
        let position = match (&hint.chapter_title, hint.unit_index) {
            (Some(title), Some(unit)) => format!(" at '{}', unit {}", title, unit + 1),
            (Some(title), None) => format!(" at '{}'", title),
            _ => String::new(),
        };
        out.push_str(&format!(
            "Last run was interrupted while {}{} ({}). Continue with `folio resume`.\n",
            hint.status,
            position,
            format_timestamp(hint.written_at_ms)
        ));
    }

    if status.chapters.is_empty() {
        return out;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["#", "Chapter", "Status", "Units", "Failed", "Skipped", "Words"]);
    for row in &status.chapters {
        let chapter_status = match row.status {
            ChapterStatus::Completed => "completed",
            ChapterStatus::Pending if row.units == 0 => "no outline",
            ChapterStatus::Pending => "pending",
        };
        table.add_row(vec![
            row.number.to_string(),
            row.title.clone(),
            chapter_status.to_string(),
            format!("{}/{}", row.done, row.units),
            row.failed.to_string(),
            row.skipped.to_string(),
            row.words.to_string(),
        ]);
    }
    out.push('\n');
    out.push_str(&table.to_string());
    out
}

pub fn format_status_json(status: &ProjectStatus) -> Result<String, ApiError> {
    serde_json::to_string_pretty(status).map_err(|e| ApiError::StorageError(StorageError::from(e)))
}

pub fn format_projects_text(projects: &[Project]) -> String {
    if projects.is_empty() {
        return "No projects found.\n\nUse 'folio import <outline.toml>' to create one.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Id", "Title", "Kind", "Target words", "Created"]);
    for project in projects {
        table.add_row(vec![
            project.id.to_string(),
            project.title.clone(),
            project.kind.unit_label().to_string(),
            project.target_word_count.to_string(),
            format_timestamp(project.created_at_ms),
        ]);
    }
    format!("{}\n\nTotal: {} project(s)", table, projects.len())
}

pub fn format_projects_json(projects: &[Project]) -> Result<String, ApiError> {
    let out = serde_json::json!({ "projects": projects, "total": projects.len() });
    serde_json::to_string_pretty(&out).map_err(|e| ApiError::StorageError(StorageError::from(e)))
}

/// One-paragraph summary of where a run stopped and what to do next.
pub fn format_run_outcome(snapshot: &ProgressSnapshot) -> String {
    let mut out = match snapshot.status {
        RunStatus::Completed => format!(
            "Generation complete: {}/{} units, {} words.",
            snapshot.completed_units, snapshot.total_units, snapshot.total_words
        ),
        RunStatus::Paused => format!(
            "Paused after {}/{} units. Continue with `folio resume`.",
            snapshot.completed_units, snapshot.total_units
        ),
        RunStatus::AwaitingApproval => match &snapshot.pending_approval {
            Some(pending) => format!(
                "Chapter '{}' ({} words) is awaiting approval. Continue with `folio approve` or `folio regenerate <n>`.",
                pending.chapter_title, pending.word_count
            ),
            None => "Awaiting approval.".to_string(),
        },
        status => format!("Run ended in state {}.", status),
    };
    if snapshot.failed_units > 0 {
        out.push_str(&format!(
            "\n{} unit(s) failed. Retry them with `folio restart-failed`.",
            snapshot.failed_units
        ));
    }
    if snapshot.skipped_units > 0 {
        out.push_str(&format!(
            "\n{} unit(s) skipped after reaching the word budget.",
            snapshot.skipped_units
        ));
    }
    out
}
