//! Engine events broadcast to observers (CLI, tests).

use crate::error::RetryClass;
use crate::generation::progress::{ProgressSnapshot, RunStatus};
use crate::types::ChapterId;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 256;

/// A backoff wait about to happen.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitingNotice {
    pub label: String,
    pub class: RetryClass,
    /// Failed attempts so far.
    pub attempt: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    StatusChanged(RunStatus),
    Waiting(WaitingNotice),
    /// Text of the unit replayed so far; display only.
    Preview {
        chapter_id: ChapterId,
        unit_seq: u32,
        text: String,
    },
    UnitCompleted {
        chapter_id: ChapterId,
        unit_seq: u32,
        words: u64,
    },
    UnitFailed {
        chapter_id: ChapterId,
        unit_seq: u32,
        error: String,
    },
    OutlineFailed {
        chapter_id: ChapterId,
        error: String,
    },
    ChapterCompleted {
        chapter_id: ChapterId,
        title: String,
        word_count: u64,
    },
    Progress(Box<ProgressSnapshot>),
}

/// Cloneable broadcast handle. Emitting never fails; events without
/// subscribers are dropped.
#[derive(Clone)]
pub struct EventSink {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            trace!("Engine event dropped: no subscribers");
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
