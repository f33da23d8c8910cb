//! CLI domain: parse, route, help, output, and presentation only.
//! No domain orchestration; single route table dispatches to domain services.

mod help;
mod output;
mod parse;
mod presentation;
mod route;

pub use help::{command_name, drives_generation};
pub use output::map_error;
pub use parse::{Cli, Commands};
pub use presentation::{
    format_projects_json, format_projects_text, format_run_outcome, format_status_json,
    format_status_text, render_markdown, ChapterRow, EventPrinter, ProjectStatus,
};
pub use route::RunContext;
