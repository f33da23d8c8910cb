//! CLI presentation: text and json formatters per command family.

mod events;
mod export;
mod status;

pub use events::EventPrinter;
pub use export::render_markdown;
pub use status::{
    format_projects_json, format_projects_text, format_run_outcome, format_status_json,
    format_status_text, ChapterRow, ProjectStatus,
};
