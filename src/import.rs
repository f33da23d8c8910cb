//! Outline import: create a project and its chapters from a TOML file.
//!
//! ```toml
//! title = "The Lighthouse Keeper"
//! kind = "fiction"
//! premise = "A keeper finds a letter in the lamp room."
//! target_word_count = 40000
//!
//! [[chapters]]
//! title = "Arrival"
//! synopsis = "Mara takes the post."
//!
//! [[chapters.units]]
//! title = "The pier"
//! description = "Mara meets the outgoing keeper."
//! target_words = 900
//! ```
//!
//! Chapters listing `units` skip outline generation.

use crate::error::{ApiError, StorageError};
use crate::store::{Chapter, ChapterStore, ContentKind, Project, UnitDescriptor};
use crate::types::ProjectId;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct OutlineFile {
    /// Project id; derived from the title when absent.
    pub id: Option<String>,
    pub title: String,
    #[serde(default = "default_kind")]
    pub kind: ContentKind,
    #[serde(default)]
    pub premise: String,
    #[serde(default)]
    pub target_word_count: u64,
    pub chapters: Vec<OutlineChapter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutlineChapter {
    pub title: String,
    pub synopsis: Option<String>,
    #[serde(default)]
    pub units: Vec<OutlineUnit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutlineUnit {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target_words: u32,
}

fn default_kind() -> ContentKind {
    ContentKind::Fiction
}

impl OutlineFile {
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let raw = std::fs::read_to_string(path).map_err(StorageError::from)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let file: OutlineFile = toml::from_str(raw)
            .map_err(|e| ApiError::ConfigError(format!("Invalid outline file: {}", e)))?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<(), ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::ConfigError("Outline title cannot be empty".to_string()));
        }
        if self.chapters.is_empty() {
            return Err(ApiError::ConfigError(
                "Outline must list at least one chapter".to_string(),
            ));
        }
        if let Some(index) = self.chapters.iter().position(|c| c.title.trim().is_empty()) {
            return Err(ApiError::ConfigError(format!(
                "Chapter {} has an empty title",
                index + 1
            )));
        }
        if self.project_id().as_str().is_empty() {
            return Err(ApiError::ConfigError(
                "Could not derive a project id; set `id` explicitly".to_string(),
            ));
        }
        Ok(())
    }

    pub fn project_id(&self) -> ProjectId {
        match self.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => ProjectId::new(id),
            None => ProjectId::new(slugify(&self.title)),
        }
    }

    /// Write the project and its chapters. An existing project id is refused.
    pub fn import(&self, store: &dyn ChapterStore) -> Result<(Project, Vec<Chapter>), ApiError> {
        let project_id = self.project_id();
        if store.get_project(&project_id)?.is_some() {
            return Err(ApiError::InvalidState(format!(
                "Project '{}' already exists",
                project_id
            )));
        }

        let project = Project::new(
            project_id.clone(),
            self.title.trim(),
            self.kind,
            self.premise.trim(),
            self.target_word_count,
        );

        let chapters: Vec<Chapter> = self
            .chapters
            .iter()
            .enumerate()
            .map(|(index, outline)| {
                let synopsis = outline
                    .synopsis
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                let mut chapter =
                    Chapter::new(project_id.clone(), outline.title.trim(), index as u32, synopsis);
                chapter.units = outline
                    .units
                    .iter()
                    .filter(|u| !u.title.trim().is_empty())
                    .enumerate()
                    .map(|(seq, unit)| {
                        UnitDescriptor::pending(
                            seq as u32 + 1,
                            unit.title.trim(),
                            unit.description.trim(),
                            unit.target_words,
                        )
                    })
                    .collect();
                chapter
            })
            .collect();

        for chapter in &chapters {
            store.put_chapter(chapter)?;
        }
        store.put_project(&project)?;
        store.flush()?;

        info!(
            project_id = %project.id,
            chapters = chapters.len(),
            "Imported outline"
        );
        Ok((project, chapters))
    }
}

/// Lowercase ASCII alphanumerics joined by single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
