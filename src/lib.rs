//! Folio: resumable long-form document generation
//!
//! Turns a project outline into a finished manuscript one unit at a time,
//! persisting every paragraph so a run can stop anywhere and pick up again.

pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod import;
pub mod logging;
pub mod provider;
pub mod recovery;
pub mod store;
pub mod types;
