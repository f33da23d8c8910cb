//! Integration tests for the folio generation engine

mod cli_commands;
mod orchestrator_flows;
mod store_integration;
mod support;
