//! Generation engine: outline passes, unit writing, and the run state machine.

pub mod blocks;
pub mod continuity;
pub mod events;
pub mod orchestrator;
pub mod outline;
pub mod progress;
pub mod retry;
pub mod writer;

pub use blocks::BlockPersister;
pub use continuity::{CharacterContinuityTracker, CharacterHistory};
pub use events::{EngineEvent, EventSink, WaitingNotice};
pub use orchestrator::{Orchestrator, RunOptions};
pub use outline::{OutlinePassReport, OutlineStage};
pub use progress::{PendingApproval, ProgressSnapshot, ProgressTracker, RunStatus};
pub use retry::RetryPolicy;
pub use writer::{UnitAssignment, UnitWriterStage};
