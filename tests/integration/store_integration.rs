//! Chapter store durability and concurrent updates through the public API.

use super::support::{engine, MockContent, MockOutline, MockSummary};
use folio::generation::{Orchestrator, RunOptions, RunStatus};
use folio::import::OutlineFile;
use folio::provider::Collaborators;
use folio::recovery::{RecoveryHint, RecoveryHintStore};
use folio::store::{
    Chapter, ChapterStatus, ChapterStore, ContentKind, Project, SledChapterStore, UnitDescriptor,
    UnitStatus,
};
use folio::types::ProjectId;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const OUTLINE: &str = r#"
title = "Field Notes"
kind = "non_fiction"
premise = "A practical guide to keeping bees."
target_word_count = 0

[[chapters]]
title = "The Hive"

[[chapters.units]]
title = "Frames"
description = "How frames are laid out."

[[chapters.units]]
title = "Boxes"

[[chapters]]
title = "The Seasons"
synopsis = "What changes through the year."
"#;

fn seeded(store: &SledChapterStore, units: u32) -> Chapter {
    let project = Project::new(
        ProjectId::new("guide"),
        "Guide",
        ContentKind::NonFiction,
        "How to",
        0,
    );
    store.put_project(&project).unwrap();
    let mut chapter = Chapter::new(project.id.clone(), "Basics", 0, None);
    chapter.units = (1..=units)
        .map(|seq| UnitDescriptor::pending(seq, format!("Section {seq}"), "", 300))
        .collect();
    store.put_chapter(&chapter).unwrap();
    chapter
}

#[test]
fn records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store");

    let chapter_id = {
        let store = SledChapterStore::new(&path).unwrap();
        let chapter = seeded(&store, 2);
        store
            .append_blocks(&chapter.id, 0, 1, &["First.".to_string(), "Second.".to_string()])
            .unwrap();
        store.set_unit_status(&chapter.id, 1, UnitStatus::Done).unwrap();
        store.flush().unwrap();
        chapter.id
    };

    let store = SledChapterStore::new(&path).unwrap();
    let chapter = store.get_chapter(&chapter_id).unwrap().unwrap();
    assert_eq!(chapter.unit(1).unwrap().status, UnitStatus::Done);
    assert_eq!(chapter.unit(2).unwrap().status, UnitStatus::Pending);
    let texts: Vec<String> = store
        .list_blocks(&chapter_id)
        .unwrap()
        .into_iter()
        .map(|b| b.text)
        .collect();
    assert_eq!(texts, vec!["First.", "Second."]);
    assert_eq!(store.list_projects().unwrap().len(), 1);
}

#[test]
fn concurrent_updates_are_not_lost() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SledChapterStore::new(dir.path()).unwrap());
    let chapter = seeded(&store, 8);

    let handles: Vec<_> = (1..=8u32)
        .map(|seq| {
            let store = Arc::clone(&store);
            let id = chapter.id.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    store
                        .update_chapter(&id, &mut |record| {
                            record.word_count += 1;
                            Ok(())
                        })
                        .unwrap();
                }
                store.set_unit_status(&id, seq, UnitStatus::Done).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stored = store.get_chapter(&chapter.id).unwrap().unwrap();
    assert_eq!(stored.word_count, 200);
    assert_eq!(stored.count_status(UnitStatus::Done), 8);
}

#[test]
fn hints_share_the_database_and_expire() {
    let dir = TempDir::new().unwrap();
    let store = SledChapterStore::new(dir.path()).unwrap();
    let hints = RecoveryHintStore::open(store.db(), Duration::from_secs(60)).unwrap();
    let project_id = ProjectId::new("guide");

    let hint = RecoveryHint {
        project_id: project_id.clone(),
        status: RunStatus::Writing,
        chapter_index: Some(0),
        chapter_title: Some("Basics".to_string()),
        unit_index: Some(1),
        completed_units: 1,
        total_units: 4,
        checkpoint: false,
        pending_approval: None,
        error: None,
        written_at_ms: 1_000,
    };
    hints.put(&hint).unwrap();

    let found = hints.get_at(&project_id, 30_000).unwrap().unwrap();
    assert!(found.was_interrupted());
    assert_eq!(found.unit_index, Some(1));

    assert_eq!(hints.prune_expired(1_000 + 61_000).unwrap(), 1);
    assert!(hints.get_at(&project_id, 1_000).unwrap().is_none());
    assert!(store.list_projects().unwrap().is_empty());
}

#[tokio::test]
async fn imported_outline_drives_a_run() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SledChapterStore::new(dir.path()).unwrap());
    let file = OutlineFile::parse(OUTLINE).unwrap();
    let (project, chapters) = file.import(store.as_ref()).unwrap();
    assert_eq!(project.id.as_str(), "field-notes");
    assert_eq!(chapters[0].units.len(), 2);
    assert!(!chapters[1].has_outline());

    let outline = MockOutline::new(1);
    let content = MockContent::new(40);
    let shared: Arc<dyn ChapterStore> = store.clone();
    let orchestrator = Orchestrator::new(
        project.id.clone(),
        shared,
        Collaborators::new(outline.clone(), content.clone(), MockSummary::new()),
        engine(),
    );

    let snapshot = orchestrator.start(RunOptions::default()).await.unwrap();

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(outline.call_count(), 1);
    assert_eq!(outline.calls.lock()[0].chapter_title, "The Seasons");
    assert_eq!(
        content.unit_titles(),
        vec!["Frames", "Boxes", "The Seasons scene 1"]
    );
    for chapter in store.list_chapters(&project.id).unwrap() {
        assert_eq!(chapter.status, ChapterStatus::Completed);
    }

    assert!(file.import(store.as_ref()).is_err());
}
