//! Shared fixtures for integration tests: scripted collaborators, a seeded
//! store, and isolated XDG directories.

use async_trait::async_trait;
use folio::config::EngineConfig;
use folio::error::ServiceError;
use folio::generation::{EngineEvent, Orchestrator};
use folio::provider::{
    CharacterActions, Collaborators, ContentRequest, ContentResponse, ContentService,
    OutlineRequest, OutlineResponse, OutlineService, SummaryRequest, SummaryResponse,
    SummaryService, UnitDraft,
};
use folio::recovery::RecoveryHintStore;
use folio::store::{
    Chapter, ChapterStore, ContentKind, Project, SledChapterStore, UnitDescriptor,
};
use folio::types::{count_words, ProjectId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, Notify, Semaphore};

/// Prose of exactly `words` words split over two paragraphs.
pub fn prose(words: usize) -> String {
    let first = words / 2;
    let body: Vec<String> = (0..words).map(|i| format!("w{}", i)).collect();
    if first == 0 {
        return body.join(" ");
    }
    format!("{}.\n\n{}.", body[..first].join(" "), body[first..].join(" "))
}

pub fn engine() -> EngineConfig {
    let mut config = EngineConfig {
        min_content_chars: 10,
        ..EngineConfig::without_delays()
    };
    config.preview.chunk_delay_ms = 0;
    config
}

// ---------------------------------------------------------------- outline

pub struct MockOutline {
    units_per_chapter: usize,
    /// Remaining failures per chapter title.
    failures: Mutex<HashMap<String, usize>>,
    pub calls: Mutex<Vec<OutlineRequest>>,
}

impl MockOutline {
    pub fn new(units_per_chapter: usize) -> Arc<Self> {
        Arc::new(Self {
            units_per_chapter,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn fail(&self, chapter_title: &str, times: usize) {
        self.failures.lock().insert(chapter_title.to_string(), times);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl OutlineService for MockOutline {
    async fn generate_outline(
        &self,
        request: OutlineRequest,
    ) -> Result<OutlineResponse, ServiceError> {
        let title = request.chapter_title.clone();
        self.calls.lock().push(request);
        if let Some(remaining) = self.failures.lock().get_mut(&title) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ServiceError::Server {
                    status: 502,
                    message: "bad gateway".to_string(),
                });
            }
        }
        Ok(OutlineResponse {
            units: (1..=self.units_per_chapter)
                .map(|i| {
                    Some(UnitDraft {
                        title: format!("{} scene {}", title, i),
                        description: format!("Scene {} of {}", i, title),
                        target_words: 500,
                    })
                })
                .collect(),
        })
    }
}

// ---------------------------------------------------------------- content

pub struct MockContent {
    words_per_unit: usize,
    script: Mutex<VecDeque<Result<String, ServiceError>>>,
    /// Zero-based call index that never returns.
    hang_on_call: Mutex<Option<usize>>,
    pub entered_hang: Arc<Notify>,
    pub calls: Mutex<Vec<ContentRequest>>,
}

impl MockContent {
    pub fn new(words_per_unit: usize) -> Arc<Self> {
        Arc::new(Self {
            words_per_unit,
            script: Mutex::new(VecDeque::new()),
            hang_on_call: Mutex::new(None),
            entered_hang: Arc::new(Notify::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Replies used before falling back to generated prose.
    pub fn script(&self, replies: Vec<Result<String, ServiceError>>) {
        self.script.lock().extend(replies);
    }

    pub fn hang_on_call(&self, index: usize) {
        *self.hang_on_call.lock() = Some(index);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn unit_titles(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.unit.title.clone()).collect()
    }
}

#[async_trait]
impl ContentService for MockContent {
    async fn generate_content(
        &self,
        request: ContentRequest,
    ) -> Result<ContentResponse, ServiceError> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push(request);
            calls.len() - 1
        };
        if *self.hang_on_call.lock() == Some(index) {
            self.entered_hang.notify_one();
            std::future::pending::<()>().await;
        }
        let scripted = self.script.lock().pop_front();
        let text = match scripted {
            Some(reply) => reply?,
            None => prose(self.words_per_unit),
        };
        Ok(ContentResponse {
            word_count: count_words(&text),
            text,
        })
    }
}

// ---------------------------------------------------------------- summary

pub struct MockSummary {
    gate: Option<Arc<Semaphore>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockSummary {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every call waits for a permit on `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SummaryService for MockSummary {
    async fn summarize(&self, request: SummaryRequest) -> Result<SummaryResponse, ServiceError> {
        self.calls.lock().push(request.chapter_title.clone());
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| ServiceError::Cancelled)?;
            permit.forget();
        }
        Ok(SummaryResponse {
            summary: format!("Summary of {}", request.chapter_title),
            characters: vec![CharacterActions {
                name: "Mara".to_string(),
                actions: vec![format!("survived {}", request.chapter_title)],
            }],
        })
    }
}

// ---------------------------------------------------------------- harness

pub struct Harness {
    pub _dir: TempDir,
    pub store: Arc<SledChapterStore>,
    pub hints: Arc<RecoveryHintStore>,
    pub project: Project,
    pub outline: Arc<MockOutline>,
    pub content: Arc<MockContent>,
    pub summary: Arc<MockSummary>,
}

impl Harness {
    /// Empty store with one project of `chapters` chapters and no outlines.
    pub fn new(chapters: usize, target_words: u64) -> Self {
        Self::with_summary(chapters, target_words, MockSummary::new())
    }

    pub fn with_summary(chapters: usize, target_words: u64, summary: Arc<MockSummary>) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SledChapterStore::new(dir.path().join("store")).unwrap());
        let hints = Arc::new(
            RecoveryHintStore::open(store.db(), engine().recovery_hint_ttl()).unwrap(),
        );
        let project = Project::new(
            ProjectId::new("novel"),
            "The Lighthouse Keeper",
            ContentKind::Fiction,
            "A keeper finds a letter in the lamp room.",
            target_words,
        );
        store.put_project(&project).unwrap();
        for position in 0..chapters {
            let chapter = Chapter::new(
                project.id.clone(),
                format!("Chapter {}", position + 1),
                position as u32,
                Some(format!("Synopsis {}", position + 1)),
            );
            store.put_chapter(&chapter).unwrap();
        }
        Self {
            _dir: dir,
            store,
            hints,
            project,
            outline: MockOutline::new(3),
            content: MockContent::new(100),
            summary,
        }
    }

    /// Give every chapter `units` pending units up front.
    pub fn pre_outline(&self, units: usize) {
        for chapter in self.chapters() {
            let descriptors = (1..=units as u32)
                .map(|seq| {
                    UnitDescriptor::pending(seq, format!("{} scene {}", chapter.title, seq), "", 500)
                })
                .collect();
            self.store.set_units(&chapter.id, descriptors).unwrap();
        }
    }

    pub fn chapters(&self) -> Vec<Chapter> {
        self.store.list_chapters(&self.project.id).unwrap()
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(engine())
    }

    pub fn orchestrator_with(&self, config: EngineConfig) -> Orchestrator {
        let store: Arc<dyn ChapterStore> = self.store.clone();
        Orchestrator::new(
            self.project.id.clone(),
            store,
            Collaborators::new(
                self.outline.clone(),
                self.content.clone(),
                self.summary.clone(),
            ),
            config,
        )
        .with_recovery_hints(Arc::clone(&self.hints))
    }
}

/// Everything currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

// ---------------------------------------------------------------- xdg

static XDG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Run `f` with XDG config/data homes pointing into a temp dir, restoring
/// the environment afterwards. Serialized across tests.
pub fn with_xdg_env<F, R>(f: F) -> R
where
    F: FnOnce(&std::path::Path) -> R,
{
    let _guard = XDG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let saved: Vec<(&str, Option<String>)> = ["XDG_CONFIG_HOME", "XDG_DATA_HOME", "FOLIO_ENV"]
        .into_iter()
        .map(|key| (key, std::env::var(key).ok()))
        .collect();

    std::env::set_var("XDG_CONFIG_HOME", dir.path().join("config"));
    std::env::set_var("XDG_DATA_HOME", dir.path().join("data"));
    std::env::remove_var("FOLIO_ENV");

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(dir.path())));

    for (key, value) in saved {
        match value {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }
    }
    match result {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
