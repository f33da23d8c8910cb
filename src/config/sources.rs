//! File sources layered by `ConfigLoader`.

pub mod global_file;
pub mod workspace_file;
