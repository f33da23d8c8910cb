//! CLI route: single route table and run context. Dispatches to domain services and presentation.

use crate::cli::help::command_name;
use crate::cli::output::write_output_file;
use crate::cli::parse::Commands;
use crate::cli::presentation::{
    format_projects_json, format_projects_text, format_run_outcome, format_status_json,
    format_status_text, render_markdown, ChapterRow, EventPrinter, ProjectStatus,
};
use crate::config::{ConfigLoader, FolioConfig};
use crate::error::{ApiError, StorageError};
use crate::generation::{Orchestrator, PendingApproval, ProgressSnapshot, RunOptions, RunStatus};
use crate::import::OutlineFile;
use crate::provider::{ChatCompletionsClient, Collaborators};
use crate::recovery::RecoveryHintStore;
use crate::store::{ChapterStore, Project, SledChapterStore};
use crate::types::{now_millis, ChapterId, ProjectId};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a generation command asks the orchestrator to do.
enum GenerationAction {
    Start(RunOptions),
    Resume { preview: bool },
    Approve,
    Regenerate(ChapterId),
    RestartFailed,
}

enum CheckpointChoice {
    Approve,
    Regenerate,
    Stop,
}

/// Runtime context for CLI execution: workspace, config, and the opened store.
/// Built from workspace path and optional config path using ConfigLoader only.
pub struct RunContext {
    workspace_root: PathBuf,
    config: FolioConfig,
    store: Arc<SledChapterStore>,
    hints: Arc<RecoveryHintStore>,
    project: Option<String>,
}

impl RunContext {
    /// Create run context from workspace root, optional config path, and
    /// optional project selection.
    pub fn new(
        workspace_root: PathBuf,
        config_path: Option<PathBuf>,
        project: Option<String>,
    ) -> Result<Self, ApiError> {
        let config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        config.ensure_valid()?;

        let store_path = config.storage.resolve_store_path(&workspace_root)?;
        std::fs::create_dir_all(&store_path).map_err(StorageError::from)?;
        let store = Arc::new(SledChapterStore::new(&store_path)?);
        let hints = Arc::new(RecoveryHintStore::open(
            store.db(),
            config.engine.recovery_hint_ttl(),
        )?);
        match hints.prune_expired(now_millis()) {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Pruned expired recovery hints"),
            Err(e) => warn!(error = %e, "Failed to prune recovery hints"),
        }
        debug!(store = %store_path.display(), "Opened chapter store");

        Ok(Self {
            workspace_root,
            config,
            store,
            hints,
            project,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config(&self) -> &FolioConfig {
        &self.config
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let started = Instant::now();
        let name = command_name(command);
        info!(command = name, "Executing command");

        let result = self.execute_inner(command);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(command = name, elapsed_ms, "Command completed"),
            Err(e) => warn!(command = name, elapsed_ms, error = %e, "Command failed"),
        }
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "Failed to flush chapter store");
        }
        result
    }

    fn execute_inner(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Import { outline } => self.handle_import(outline),
            Commands::Projects { format } => self.handle_projects(format),
            Commands::Run {
                checkpoint,
                preview,
            } => self.handle_generation(GenerationAction::Start(RunOptions {
                checkpoint: *checkpoint,
                preview: *preview,
            })),
            Commands::Resume { preview } => {
                self.handle_generation(GenerationAction::Resume { preview: *preview })
            }
            Commands::Approve => self.handle_generation(GenerationAction::Approve),
            Commands::Regenerate { chapter } => {
                let project = self.selected_project()?;
                let chapter_id = self.chapter_by_number(&project, *chapter)?;
                self.handle_generation(GenerationAction::Regenerate(chapter_id))
            }
            Commands::RestartFailed => self.handle_generation(GenerationAction::RestartFailed),
            Commands::Reset => self.handle_reset(),
            Commands::Status { format } => self.handle_status(format),
            Commands::Export { output } => self.handle_export(output.as_deref()),
        }
    }

    fn handle_import(&self, path: &Path) -> Result<String, ApiError> {
        let file = OutlineFile::load(path)?;
        let (project, chapters) = file.import(self.store.as_ref())?;
        let outlined = chapters.iter().filter(|c| c.has_outline()).count();
        Ok(format!(
            "Imported project '{}' with {} chapter(s) ({} already outlined).\nStart writing with `folio run`.",
            project.id,
            chapters.len(),
            outlined
        ))
    }

    fn handle_projects(&self, format: &str) -> Result<String, ApiError> {
        let projects = self.store.list_projects()?;
        match format {
            "json" => format_projects_json(&projects),
            _ => Ok(format_projects_text(&projects)),
        }
    }

    fn handle_generation(&self, action: GenerationAction) -> Result<String, ApiError> {
        let project = self.selected_project()?;
        if self.config.provider.resolve_api_key().is_none() {
            warn!(endpoint = %self.config.provider.endpoint, "No API key configured for the provider");
        }
        let orchestrator = Arc::new(self.orchestrator(project.id.clone())?);
        orchestrator.restore_from_hint()?;

        let interactive = std::io::stdin().is_terminal() && std::io::stderr().is_terminal();
        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| ApiError::ConfigError(format!("Failed to create runtime: {}", e)))?;
        let snapshot = rt.block_on(drive(orchestrator, action, interactive))?;
        Ok(format_run_outcome(&snapshot))
    }

    fn handle_reset(&self) -> Result<String, ApiError> {
        let project = self.selected_project()?;
        let orchestrator = self.orchestrator(project.id.clone())?;
        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| ApiError::ConfigError(format!("Failed to create runtime: {}", e)))?;
        rt.block_on(orchestrator.reset())?;
        Ok(format!(
            "Run state for '{}' cleared. Written chapters are kept.",
            project.id
        ))
    }

    fn handle_status(&self, format: &str) -> Result<String, ApiError> {
        let project = self.selected_project()?;
        let orchestrator = self.orchestrator(project.id.clone())?;
        let hint = orchestrator.restore_from_hint()?;
        let mut progress = orchestrator.refresh()?;
        if let Some(hint) = &hint {
            if progress.status == RunStatus::Idle {
                progress.status = hint.status;
                progress.error = hint.error.clone();
            }
        }

        let chapters = self.store.list_chapters(&project.id)?;
        let status = ProjectStatus {
            budget_cutoff: progress.budget_cutoff(self.config.engine.budget_ratio),
            chapters: chapters.iter().map(ChapterRow::from).collect(),
            recovery_hint: hint,
            progress,
            project,
        };
        match format {
            "json" => format_status_json(&status),
            _ => Ok(format_status_text(&status)),
        }
    }

    fn handle_export(&self, output: Option<&Path>) -> Result<String, ApiError> {
        let project = self.selected_project()?;
        let mut chapters = Vec::new();
        for chapter in self.store.list_chapters(&project.id)? {
            let blocks = self.store.list_blocks(&chapter.id)?;
            chapters.push((chapter, blocks));
        }
        let markdown = render_markdown(&project, &chapters);

        match output {
            Some(path) => {
                write_output_file(path, &markdown)?;
                let words: u64 = chapters.iter().map(|(c, _)| c.word_count).sum();
                Ok(format!(
                    "Exported {} chapter(s), {} words, to {}",
                    chapters.len(),
                    words,
                    path.display()
                ))
            }
            None => Ok(markdown),
        }
    }

    fn orchestrator(&self, project_id: ProjectId) -> Result<Orchestrator, ApiError> {
        let client = Arc::new(ChatCompletionsClient::new(&self.config.provider)?);
        let store: Arc<dyn ChapterStore> = self.store.clone();
        Ok(Orchestrator::new(
            project_id,
            store,
            Collaborators::from_client(client),
            self.config.engine.clone(),
        )
        .with_recovery_hints(Arc::clone(&self.hints)))
    }

    /// The `--project` selection, or the only project in the store.
    fn selected_project(&self) -> Result<Project, ApiError> {
        if let Some(id) = &self.project {
            let id = ProjectId::new(id.as_str());
            return self
                .store
                .get_project(&id)?
                .ok_or_else(|| StorageError::ProjectNotFound(id).into());
        }

        let mut projects = self.store.list_projects()?;
        match projects.len() {
            0 => Err(ApiError::InvalidState(
                "No projects found; create one with `folio import <outline.toml>`".to_string(),
            )),
            1 => Ok(projects.remove(0)),
            _ => {
                let ids: Vec<String> = projects.iter().map(|p| p.id.to_string()).collect();
                Err(ApiError::InvalidState(format!(
                    "Several projects found ({}); choose one with --project",
                    ids.join(", ")
                )))
            }
        }
    }

    fn chapter_by_number(&self, project: &Project, number: u32) -> Result<ChapterId, ApiError> {
        self.store
            .list_chapters(&project.id)?
            .into_iter()
            .find(|c| c.position + 1 == number)
            .map(|c| c.id)
            .ok_or_else(|| {
                ApiError::InvalidState(format!(
                    "Project '{}' has no chapter {}",
                    project.id, number
                ))
            })
    }
}

/// Run one generation command with live output, Ctrl-C pausing, and the
/// interactive checkpoint prompt.
async fn drive(
    orchestrator: Arc<Orchestrator>,
    action: GenerationAction,
    interactive: bool,
) -> Result<ProgressSnapshot, ApiError> {
    let stop = CancellationToken::new();
    let printer = {
        let mut events = orchestrator.subscribe();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut printer = EventPrinter::new();
            loop {
                let event = tokio::select! {
                    biased;
                    event = events.recv() => event,
                    _ = stop.cancelled() => break,
                };
                match event {
                    Ok(event) => {
                        if let Some(text) = printer.render(&event) {
                            eprint!("{}", text);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event printer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };
    let interrupt = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if orchestrator.pause() {
                eprintln!("\nPausing after the current request. Press Ctrl-C again to quit now.");
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        })
    };

    let mut result = match action {
        GenerationAction::Start(options) => orchestrator.start(options).await,
        GenerationAction::Resume { preview } => {
            orchestrator.set_preview(preview);
            orchestrator.resume().await
        }
        GenerationAction::Approve => orchestrator.approve().await,
        GenerationAction::Regenerate(chapter_id) => {
            orchestrator.regenerate_chapter(&chapter_id).await
        }
        GenerationAction::RestartFailed => orchestrator.restart_failed().await,
    };

    while interactive {
        let pending = match &result {
            Ok(snapshot) if snapshot.status == RunStatus::AwaitingApproval => {
                snapshot.pending_approval.clone()
            }
            _ => None,
        };
        let Some(pending) = pending else {
            break;
        };
        result = match prompt_checkpoint(&pending)? {
            CheckpointChoice::Approve => orchestrator.approve().await,
            CheckpointChoice::Regenerate => {
                orchestrator.regenerate_chapter(&pending.chapter_id).await
            }
            CheckpointChoice::Stop => break,
        };
    }

    orchestrator.settle().await;
    interrupt.abort();
    // Buffered events are still drained; recv wins the biased select.
    stop.cancel();
    if let Err(e) = printer.await {
        debug!(error = %e, "Event printer ended abnormally");
    }
    result
}

fn prompt_checkpoint(pending: &PendingApproval) -> Result<CheckpointChoice, ApiError> {
    use dialoguer::Select;

    let selection = Select::new()
        .with_prompt(format!(
            "Chapter '{}' is done ({} words)",
            pending.chapter_title, pending.word_count
        ))
        .items(&["Approve and continue", "Regenerate this chapter", "Stop here"])
        .default(0)
        .interact()
        .map_err(|e| ApiError::ConfigError(format!("Failed to get user input: {}", e)))?;

    Ok(match selection {
        0 => CheckpointChoice::Approve,
        1 => CheckpointChoice::Regenerate,
        _ => CheckpointChoice::Stop,
    })
}
