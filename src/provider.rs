//! Generation collaborators
//!
//! The engine talks to three services: outline generation, content generation
//! and chapter summarization. Each is an async trait so the orchestrator can be
//! driven by the chat-completions client in production and by scripted mocks
//! in tests.

pub mod chat;
pub mod prompts;

pub use chat::ChatCompletionsClient;

use crate::error::ServiceError;
use crate::store::{ContentKind, UnitDescriptor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request for a chapter's unit breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineRequest {
    pub project_title: String,
    pub kind: ContentKind,
    pub premise: String,
    pub chapter_title: String,
    /// 1-based chapter number.
    pub chapter_number: u32,
    pub chapter_synopsis: Option<String>,
    /// One line per earlier chapter.
    pub prior_chapters_summary: String,
    pub next_chapter_title: Option<String>,
    /// Word budget for the whole chapter.
    pub target_words: u32,
}

/// One entry of a returned breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target_words: u32,
}

/// Breakdown as returned by the service. `None` marks an entry that could not
/// be read at all; the outline stage drops it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutlineResponse {
    pub units: Vec<Option<UnitDraft>>,
}

/// Recent actions of one character, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterHint {
    pub name: String,
    pub recent_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentRequest {
    pub project_title: String,
    pub kind: ContentKind,
    pub premise: String,
    pub chapter_title: String,
    pub chapter_number: u32,
    pub unit: UnitDescriptor,
    pub unit_count: usize,
    /// Tail of the prose written so far.
    pub prior_prose: String,
    pub character_hints: Vec<CharacterHint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentResponse {
    pub text: String,
    pub word_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRequest {
    pub chapter_title: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterActions {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub summary: String,
    #[serde(default)]
    pub characters: Vec<CharacterActions>,
}

#[async_trait]
pub trait OutlineService: Send + Sync {
    async fn generate_outline(&self, request: OutlineRequest)
        -> Result<OutlineResponse, ServiceError>;
}

#[async_trait]
pub trait ContentService: Send + Sync {
    async fn generate_content(&self, request: ContentRequest)
        -> Result<ContentResponse, ServiceError>;
}

#[async_trait]
pub trait SummaryService: Send + Sync {
    async fn summarize(&self, request: SummaryRequest) -> Result<SummaryResponse, ServiceError>;
}

/// The three services handed to the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub outline: Arc<dyn OutlineService>,
    pub content: Arc<dyn ContentService>,
    pub summary: Arc<dyn SummaryService>,
}

impl Collaborators {
    pub fn new(
        outline: Arc<dyn OutlineService>,
        content: Arc<dyn ContentService>,
        summary: Arc<dyn SummaryService>,
    ) -> Self {
        Self {
            outline,
            content,
            summary,
        }
    }

    /// Use one client for all three roles.
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: OutlineService + ContentService + SummaryService + 'static,
    {
        Self {
            outline: client.clone(),
            content: client.clone(),
            summary: client,
        }
    }
}
