//! CLI help: stable command names for logging.

use crate::cli::parse::Commands;

/// Command name used in log fields (e.g. "run", "restart_failed").
pub fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Import { .. } => "import",
        Commands::Projects { .. } => "projects",
        Commands::Run { .. } => "run",
        Commands::Resume { .. } => "resume",
        Commands::Approve => "approve",
        Commands::Regenerate { .. } => "regenerate",
        Commands::RestartFailed => "restart_failed",
        Commands::Reset => "reset",
        Commands::Status { .. } => "status",
        Commands::Export { .. } => "export",
    }
}

/// Commands that call the generation services.
pub fn drives_generation(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Run { .. }
            | Commands::Resume { .. }
            | Commands::Approve
            | Commands::Regenerate { .. }
            | Commands::RestartFailed
    )
}
