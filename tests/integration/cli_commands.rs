//! Integration tests for the CLI route: import, projects, status, export,
//! reset, and the binary's default log file.

use super::support::with_xdg_env;
use folio::cli::{Commands, RunContext};
use folio::config::paths;
use folio::error::ApiError;
use folio::store::{ChapterStore, SledChapterStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const OUTLINE: &str = r#"
title = "The Lighthouse Keeper"
premise = "A keeper finds a letter in the lamp room."
target_word_count = 4000

[[chapters]]
title = "Arrival"
synopsis = "Mara takes the post."

[[chapters.units]]
title = "The boat"
description = "Crossing in bad weather."

[[chapters]]
title = "The Letter"
"#;

fn workspace(root: &Path) -> PathBuf {
    let ws = root.join("ws");
    fs::create_dir_all(&ws).unwrap();
    fs::write(ws.join("outline.toml"), OUTLINE).unwrap();
    ws
}

fn context(ws: &Path, project: Option<&str>) -> RunContext {
    RunContext::new(ws.to_path_buf(), None, project.map(str::to_string)).unwrap()
}

fn import(ctx: &RunContext, ws: &Path) -> String {
    ctx.execute(&Commands::Import {
        outline: ws.join("outline.toml"),
    })
    .unwrap()
}

#[test]
fn import_then_list_projects() {
    with_xdg_env(|root| {
        let ws = workspace(root);
        let ctx = context(&ws, None);

        let out = import(&ctx, &ws);
        assert!(out.contains("the-lighthouse-keeper"));
        assert!(out.contains("2 chapter(s) (1 already outlined)"));

        let err = ctx
            .execute(&Commands::Import {
                outline: ws.join("outline.toml"),
            })
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));

        let json = ctx
            .execute(&Commands::Projects {
                format: "json".to_string(),
            })
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(value["projects"][0]["id"], "the-lighthouse-keeper");
    });
}

#[test]
fn status_reports_chapters_as_json() {
    with_xdg_env(|root| {
        let ws = workspace(root);
        let ctx = context(&ws, None);
        import(&ctx, &ws);

        let json = ctx
            .execute(&Commands::Status {
                format: "json".to_string(),
            })
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["project"]["title"], "The Lighthouse Keeper");
        assert_eq!(value["progress"]["status"], "idle");
        assert_eq!(value["progress"]["total_units"], 1);
        assert_eq!(value["budget_cutoff"], 4400);
        assert_eq!(value["chapters"][0]["number"], 1);
        assert_eq!(value["chapters"][1]["units"], 0);
        assert!(value.get("recovery_hint").is_none());

        let text = ctx
            .execute(&Commands::Status {
                format: "text".to_string(),
            })
            .unwrap();
        assert!(text.contains("Arrival"));
        assert!(text.contains("The Letter"));
    });
}

#[test]
fn export_writes_markdown_file() {
    with_xdg_env(|root| {
        let ws = workspace(root);
        let ctx = context(&ws, None);
        import(&ctx, &ws);

        let target = ws.join("out").join("book.md");
        let out = ctx
            .execute(&Commands::Export {
                output: Some(target.clone()),
            })
            .unwrap();
        assert!(out.contains("Exported 2 chapter(s), 0 words"));

        let markdown = fs::read_to_string(&target).unwrap();
        assert!(markdown.starts_with("# The Lighthouse Keeper"));
        assert!(markdown.contains("## 1. Arrival"));
        assert!(markdown.contains("## 2. The Letter"));
        assert!(markdown.contains("_Not written yet._"));
    });
}

#[test]
fn project_selection_rules() {
    with_xdg_env(|root| {
        let ws = workspace(root);
        let ctx = context(&ws, None);

        let err = ctx
            .execute(&Commands::Status {
                format: "text".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));

        import(&ctx, &ws);
        fs::write(
            ws.join("second.toml"),
            "id = \"guide\"\ntitle = \"Guide\"\n\n[[chapters]]\ntitle = \"One\"\n",
        )
        .unwrap();
        ctx.execute(&Commands::Import {
            outline: ws.join("second.toml"),
        })
        .unwrap();

        let err = ctx.execute(&Commands::Reset).unwrap_err();
        let ApiError::InvalidState(message) = err else {
            panic!("expected an ambiguous project error");
        };
        assert!(message.contains("--project"));
        drop(ctx);

        let ctx = context(&ws, Some("guide"));
        let out = ctx.execute(&Commands::Reset).unwrap();
        assert!(out.contains("'guide'"));

        let err = ctx.execute(&Commands::Regenerate { chapter: 4 }).unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));
    });
}

#[test]
fn store_lands_in_workspace_data_dir() {
    with_xdg_env(|root| {
        let ws = workspace(root);
        {
            let ctx = context(&ws, None);
            import(&ctx, &ws);
        }

        let store_path = paths::workspace_data_dir(&ws).unwrap().join("store");
        let store = SledChapterStore::new(&store_path).unwrap();
        assert_eq!(store.list_projects().unwrap().len(), 1);
    });
}

#[test]
fn binary_logs_to_default_file() {
    let temp_dir = TempDir::new().unwrap();
    let data_home = temp_dir.path().join("data");
    let config_home = temp_dir.path().join("config");
    let ws = temp_dir.path().join("ws");
    fs::create_dir_all(&ws).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_folio"))
        .env("XDG_DATA_HOME", &data_home)
        .env("XDG_CONFIG_HOME", &config_home)
        .env_remove("FOLIO_ENV")
        .arg("--workspace")
        .arg(&ws)
        .arg("--verbose")
        .arg("--log-output")
        .arg("file")
        .arg("projects")
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "folio projects should succeed: stderr={:?}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("No projects found"));

    let log_path = data_home
        .join("folio")
        .join("workspaces")
        .join(paths::workspace_key(&ws))
        .join("folio.log");
    let log = fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("Folio CLI starting"));
}
