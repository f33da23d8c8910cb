//! Character continuity
//!
//! After a chapter resolves, its text is summarized in the background and each
//! character's new actions are folded into a bounded history. The main loop
//! never waits for this, so hints can lag one chapter behind.

use crate::provider::{CharacterActions, CharacterHint, SummaryRequest, SummaryService};
use crate::store::{Chapter, ChapterStore};
use crate::types::ChapterId;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Per-character action lists, oldest first, each at most `cap` long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterHistory {
    cap: usize,
    entries: BTreeMap<String, VecDeque<String>>,
}

impl CharacterHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            entries: BTreeMap::new(),
        }
    }

    /// Append each character's actions as `"<chapter title>: <action>"`,
    /// dropping the oldest entries past the cap.
    pub fn fold(&mut self, chapter_title: &str, characters: &[CharacterActions]) {
        for character in characters {
            let name = character.name.trim();
            if name.is_empty() {
                continue;
            }
            let actions: Vec<&str> = character
                .actions
                .iter()
                .map(|a| a.trim())
                .filter(|a| !a.is_empty())
                .collect();
            if actions.is_empty() {
                continue;
            }
            let list = self.entries.entry(name.to_string()).or_default();
            for action in actions {
                list.push_back(format!("{}: {}", chapter_title, action));
                while list.len() > self.cap {
                    list.pop_front();
                }
            }
        }
    }

    pub fn actions(&self, name: &str) -> Option<Vec<String>> {
        self.entries
            .get(name)
            .map(|list| list.iter().cloned().collect())
    }

    pub fn hints(&self) -> Vec<CharacterHint> {
        self.entries
            .iter()
            .map(|(name, list)| CharacterHint {
                name: name.clone(),
                recent_actions: list.iter().cloned().collect(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every action recorded for `chapter_title`; returns how many.
    pub fn forget_chapter(&mut self, chapter_title: &str) -> usize {
        let prefix = format!("{}: ", chapter_title);
        let mut removed = 0;
        for list in self.entries.values_mut() {
            let before = list.len();
            list.retain(|action| !action.starts_with(&prefix));
            removed += before - list.len();
        }
        self.entries.retain(|_, list| !list.is_empty());
        removed
    }
}

pub struct CharacterContinuityTracker {
    summarizer: Arc<dyn SummaryService>,
    store: Arc<dyn ChapterStore>,
    history: Arc<RwLock<CharacterHistory>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    epochs: Arc<Mutex<Epochs>>,
}

/// Generation counters checked under the history lock before a task folds.
/// `session` is bumped by `clear`, a chapter's entry by `chapter_reset`.
#[derive(Debug, Default)]
struct Epochs {
    session: u64,
    chapters: HashMap<ChapterId, u64>,
}

impl Epochs {
    fn stamp(&self, chapter_id: &ChapterId) -> (u64, u64) {
        (
            self.session,
            self.chapters.get(chapter_id).copied().unwrap_or(0),
        )
    }
}

impl CharacterContinuityTracker {
    pub fn new(
        summarizer: Arc<dyn SummaryService>,
        store: Arc<dyn ChapterStore>,
        cap: usize,
    ) -> Self {
        Self {
            summarizer,
            store,
            history: Arc::new(RwLock::new(CharacterHistory::new(cap))),
            tasks: Mutex::new(Vec::new()),
            epochs: Arc::new(Mutex::new(Epochs::default())),
        }
    }

    pub fn snapshot(&self) -> CharacterHistory {
        self.history.read().clone()
    }

    pub fn hints(&self) -> Vec<CharacterHint> {
        self.history.read().hints()
    }

    pub fn clear(&self) {
        let mut history = self.history.write();
        self.epochs.lock().session += 1;
        history.clear();
    }

    /// Forget what a chapter contributed before its text is discarded.
    /// Summaries of that chapter still in flight are dropped when they land.
    pub fn chapter_reset(&self, chapter: &Chapter) {
        let mut history = self.history.write();
        *self
            .epochs
            .lock()
            .chapters
            .entry(chapter.id.clone())
            .or_insert(0) += 1;
        let removed = history.forget_chapter(&chapter.title);
        debug!(chapter_id = %chapter.id, removed, "Dropped character actions of reset chapter");
    }

    /// Summarize a resolved chapter in the background. Chapters without
    /// text are skipped inside the task.
    pub fn chapter_completed(&self, chapter: &Chapter) {
        let chapter_id = chapter.id.clone();
        let chapter_title = chapter.title.clone();
        let summarizer = Arc::clone(&self.summarizer);
        let store = Arc::clone(&self.store);
        let history = Arc::clone(&self.history);
        let epochs = Arc::clone(&self.epochs);
        let started = epochs.lock().stamp(&chapter_id);

        let handle = tokio::spawn(async move {
            let blocks = match store.list_blocks(&chapter_id) {
                Ok(blocks) => blocks,
                Err(err) => {
                    warn!(chapter_id = %chapter_id, error = %err, "Could not read chapter text for summary");
                    return;
                }
            };
            if blocks.is_empty() {
                debug!(chapter_id = %chapter_id, "No text to summarize");
                return;
            }
            let text = blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");

            let request = SummaryRequest {
                chapter_title: chapter_title.clone(),
                text,
            };
            let response = match summarizer.summarize(request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(chapter_id = %chapter_id, error = %err, "Chapter summarization failed");
                    return;
                }
            };

            // Held through the store write so a reset cannot interleave.
            let mut history = history.write();
            if epochs.lock().stamp(&chapter_id) != started {
                debug!(chapter_id = %chapter_id, "Discarding summary of discarded text");
                return;
            }
            history.fold(&chapter_title, &response.characters);

            let names = response
                .characters
                .iter()
                .map(|c| c.name.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect();
            if let Err(err) = store.set_summary(&chapter_id, response.summary, names) {
                warn!(chapter_id = %chapter_id, error = %err, "Failed to persist chapter summary");
            }
            debug!(chapter_id = %chapter_id, "Chapter summary folded");
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Wait for every outstanding summarization.
    pub async fn settle(&self) {
        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "Summarization task aborted");
            }
        }
    }
}
