//! End-to-end orchestrator runs against scripted collaborators.

use super::support::{drain, engine, Harness, MockContent};
use folio::error::{ApiError, ServiceError};
use folio::generation::{EngineEvent, RunOptions, RunStatus};
use folio::recovery::RecoveryHint;
use folio::store::{ChapterStatus, ChapterStore, UnitStatus};
use folio::types::count_words;
use std::sync::Arc;

fn statuses(h: &Harness, chapter: usize) -> Vec<UnitStatus> {
    h.chapters()[chapter].units.iter().map(|u| u.status).collect()
}

#[tokio::test]
async fn full_run_outlines_then_writes_every_unit() {
    let h = Harness::new(2, 0);
    let orchestrator = h.orchestrator();

    let snapshot = orchestrator.start(RunOptions::default()).await.unwrap();
    orchestrator.settle().await;

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(snapshot.completed_units, 6);
    assert_eq!(snapshot.total_words, 600);
    assert_eq!(h.outline.call_count(), 2);
    assert_eq!(h.content.call_count(), 6);

    for chapter in h.chapters() {
        assert_eq!(chapter.status, ChapterStatus::Completed);
        assert!(chapter.units.iter().all(|u| u.status == UnitStatus::Done));
        assert_eq!(chapter.word_count, 300);

        let blocks = h.store.list_blocks(&chapter.id).unwrap();
        let positions: Vec<u32> = blocks.iter().map(|b| b.position).collect();
        assert_eq!(positions, (0..6).collect::<Vec<u32>>());
        let words: u64 = blocks.iter().map(|b| count_words(&b.text)).sum();
        assert_eq!(words, chapter.word_count);
        assert!(chapter.summary.is_some());
    }

    let calls = h.content.calls.lock();
    assert!(calls[0].prior_prose.is_empty());
    assert!(!calls[1].prior_prose.is_empty());
    assert_eq!(calls[3].chapter_number, 2);
}

#[tokio::test]
async fn word_budget_skips_remaining_units() {
    let mut h = Harness::new(2, 1_000);
    h.content = MockContent::new(550);
    h.pre_outline(5);
    let orchestrator = h.orchestrator();

    let snapshot = orchestrator.start(RunOptions::default()).await.unwrap();

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(h.content.call_count(), 2);
    assert_eq!(snapshot.total_words, 1_100);
    assert_eq!(snapshot.skipped_units, 8);
    assert_eq!(
        statuses(&h, 0),
        vec![
            UnitStatus::Done,
            UnitStatus::Done,
            UnitStatus::Skipped,
            UnitStatus::Skipped,
            UnitStatus::Skipped
        ]
    );
    assert!(statuses(&h, 1).iter().all(|s| *s == UnitStatus::Skipped));
}

#[tokio::test(start_paused = true)]
async fn six_rate_limits_then_success_waits_six_times() {
    let h = Harness::new(1, 0);
    h.pre_outline(1);
    h.content.script(
        (0..6)
            .map(|_| Err(ServiceError::RateLimited("slow down".into())))
            .collect(),
    );
    let orchestrator = h.orchestrator();
    let mut rx = orchestrator.subscribe();

    let snapshot = orchestrator.start(RunOptions::default()).await.unwrap();

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(h.content.call_count(), 7);
    assert_eq!(statuses(&h, 0), vec![UnitStatus::Done]);
    let waits = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::Waiting(_)))
        .count();
    assert_eq!(waits, 6);
}

#[tokio::test(start_paused = true)]
async fn seventh_rate_limit_fails_the_unit_and_moves_on() {
    let h = Harness::new(1, 0);
    h.pre_outline(2);
    h.content.script(
        (0..7)
            .map(|_| Err(ServiceError::RateLimited("slow down".into())))
            .collect(),
    );
    let orchestrator = h.orchestrator();
    let mut rx = orchestrator.subscribe();

    let snapshot = orchestrator.start(RunOptions::default()).await.unwrap();

    // Seven attempts for the first unit, one for the second.
    assert_eq!(h.content.call_count(), 8);
    assert_eq!(statuses(&h, 0), vec![UnitStatus::Failed, UnitStatus::Done]);
    assert_eq!(snapshot.failed_units, 1);
    assert_eq!(snapshot.status, RunStatus::Completed);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, EngineEvent::UnitFailed { unit_seq: 1, .. })));
}

#[tokio::test]
async fn fatal_error_stops_the_run_until_resumed() {
    let h = Harness::new(1, 0);
    h.pre_outline(2);
    h.content
        .script(vec![Err(ServiceError::Rejected("invalid api key".into()))]);
    let orchestrator = h.orchestrator();

    let err = orchestrator.start(RunOptions::default()).await.unwrap_err();
    assert!(matches!(
        err,
        ApiError::ServiceError(ServiceError::Rejected(_))
    ));
    assert_eq!(orchestrator.status(), RunStatus::Error);
    assert!(orchestrator.snapshot().error.unwrap().contains("invalid api key"));
    assert_eq!(statuses(&h, 0), vec![UnitStatus::Pending, UnitStatus::Pending]);
    assert_eq!(h.store.block_count(&h.chapters()[0].id).unwrap(), 0);

    let snapshot = orchestrator.resume().await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Completed);
    assert!(snapshot.error.is_none());
    assert_eq!(h.content.call_count(), 3);
}

#[tokio::test]
async fn pause_cancels_in_flight_unit_and_resume_continues() {
    let h = Harness::new(1, 0);
    h.pre_outline(3);
    h.content.hang_on_call(1);
    let orchestrator = Arc::new(h.orchestrator());

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.start(RunOptions::default()).await })
    };
    h.content.entered_hang.notified().await;
    assert!(orchestrator.pause());

    let snapshot = run.await.unwrap().unwrap();
    assert_eq!(snapshot.status, RunStatus::Paused);
    assert_eq!(
        statuses(&h, 0),
        vec![UnitStatus::Done, UnitStatus::Pending, UnitStatus::Pending]
    );

    let snapshot = orchestrator.resume().await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(
        h.content.unit_titles(),
        vec![
            "Chapter 1 scene 1",
            "Chapter 1 scene 2",
            "Chapter 1 scene 2",
            "Chapter 1 scene 3"
        ]
    );
}

#[tokio::test]
async fn second_run_is_rejected_without_service_calls() {
    let h = Harness::new(1, 0);
    h.pre_outline(2);
    h.content.hang_on_call(0);
    let orchestrator = Arc::new(h.orchestrator());

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.start(RunOptions::default()).await })
    };
    h.content.entered_hang.notified().await;

    assert!(matches!(
        orchestrator.start(RunOptions::default()).await,
        Err(ApiError::RunInProgress(_))
    ));
    assert!(matches!(
        orchestrator.restart_failed().await,
        Err(ApiError::RunInProgress(_))
    ));
    assert_eq!(h.content.call_count(), 1);
    assert_eq!(h.outline.call_count(), 0);

    orchestrator.pause();
    let snapshot = run.await.unwrap().unwrap();
    assert_eq!(snapshot.status, RunStatus::Paused);
}

#[tokio::test]
async fn resume_after_crash_repairs_interrupted_units() {
    let h = Harness::new(1, 0);
    h.pre_outline(3);
    let chapter = h.chapters().remove(0);

    // Unit 1 finished; unit 2's blocks landed but its status never did;
    // unit 3 was mid-request.
    h.store
        .append_blocks(&chapter.id, 0, 1, &["one two three".to_string()])
        .unwrap();
    h.store.set_unit_status(&chapter.id, 1, UnitStatus::Done).unwrap();
    h.store.set_word_count(&chapter.id, 3).unwrap();
    h.store
        .append_blocks(&chapter.id, 1, 2, &["four five".to_string()])
        .unwrap();
    h.store
        .set_unit_statuses(&chapter.id, &[2, 3], UnitStatus::Writing)
        .unwrap();

    let orchestrator = h.orchestrator();
    let snapshot = orchestrator.resume().await.unwrap();

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(h.content.unit_titles(), vec!["Chapter 1 scene 3"]);
    let chapter = h.store.get_chapter(&chapter.id).unwrap().unwrap();
    assert!(chapter.units.iter().all(|u| u.status == UnitStatus::Done));
    assert_eq!(chapter.word_count, 5 + 100);
    assert_eq!(h.store.block_count(&chapter.id).unwrap(), 4);
}

#[tokio::test]
async fn resume_rewrites_done_units_whose_blocks_are_gone() {
    let h = Harness::new(2, 0);
    h.pre_outline(2);
    let orchestrator = h.orchestrator();
    orchestrator.start(RunOptions::default()).await.unwrap();
    orchestrator.settle().await;
    let first = h.chapters().remove(0);
    assert!(first.summary.is_some());

    // A chapter reset stopped after its blocks were deleted.
    h.store.delete_blocks(&first.id).unwrap();

    let restarted = h.orchestrator();
    let snapshot = restarted.resume().await.unwrap();
    restarted.settle().await;

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(snapshot.completed_units, 4);
    assert_eq!(
        h.content.unit_titles()[4..].to_vec(),
        vec!["Chapter 1 scene 1", "Chapter 1 scene 2"]
    );
    let chapter = h.store.get_chapter(&first.id).unwrap().unwrap();
    assert_eq!(chapter.status, ChapterStatus::Completed);
    assert!(chapter.units.iter().all(|u| u.status == UnitStatus::Done));
    assert_eq!(chapter.word_count, 200);
    assert_eq!(h.store.block_count(&first.id).unwrap(), 4);
    assert_eq!(chapter.summary.as_deref(), Some("Summary of Chapter 1"));
}

#[tokio::test]
async fn restart_failed_reruns_only_failed_and_skipped_units() {
    let h = Harness::new(2, 0);
    h.pre_outline(3);
    let chapters = h.chapters();
    h.store
        .append_blocks(&chapters[0].id, 0, 1, &["kept".to_string()])
        .unwrap();
    h.store
        .append_blocks(&chapters[1].id, 0, 2, &["kept".to_string()])
        .unwrap();
    h.store
        .append_blocks(&chapters[1].id, 1, 3, &["kept".to_string()])
        .unwrap();
    h.store
        .set_unit_status(&chapters[0].id, 1, UnitStatus::Done)
        .unwrap();
    h.store
        .set_unit_status(&chapters[0].id, 2, UnitStatus::Failed)
        .unwrap();
    h.store
        .set_unit_status(&chapters[0].id, 3, UnitStatus::Skipped)
        .unwrap();
    h.store
        .set_unit_statuses(&chapters[1].id, &[2, 3], UnitStatus::Done)
        .unwrap();
    h.store
        .set_unit_status(&chapters[1].id, 1, UnitStatus::Failed)
        .unwrap();

    let orchestrator = h.orchestrator();
    let snapshot = orchestrator.restart_failed().await.unwrap();

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(
        h.content.unit_titles(),
        vec!["Chapter 1 scene 2", "Chapter 1 scene 3", "Chapter 2 scene 1"]
    );
    for chapter in h.chapters() {
        assert!(chapter.units.iter().all(|u| u.status == UnitStatus::Done));
    }
}

#[tokio::test]
async fn failed_outline_is_retried_on_the_next_pass() {
    let h = Harness::new(4, 0);
    h.outline.fail("Chapter 2", 1);
    let orchestrator = h.orchestrator();
    let mut rx = orchestrator.subscribe();

    let snapshot = orchestrator.start(RunOptions::default()).await.unwrap();

    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(h.outline.call_count(), 5);
    let failed_outlines = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::OutlineFailed { .. }))
        .count();
    assert_eq!(failed_outlines, 1);
    assert!(h.chapters().iter().all(|c| c.units.len() == 3));
}

#[tokio::test]
async fn outline_gaps_after_all_passes_stop_the_run() {
    let h = Harness::new(3, 0);
    h.outline.fail("Chapter 3", 5);
    let config = folio::config::EngineConfig {
        outline_passes: 2,
        ..engine()
    };
    let orchestrator = h.orchestrator_with(config);

    let err = orchestrator.start(RunOptions::default()).await.unwrap_err();

    assert!(matches!(
        err,
        ApiError::OutlineIncomplete {
            missing: 1,
            passes: 2
        }
    ));
    assert_eq!(orchestrator.status(), RunStatus::Error);
    assert_eq!(h.content.call_count(), 0);
    // Chapters outlined on the first pass are not asked for again.
    assert_eq!(h.outline.call_count(), 4);
}

#[tokio::test]
async fn reset_clears_run_state_but_keeps_text() {
    let h = Harness::new(1, 0);
    h.pre_outline(2);
    h.content
        .script(vec![Ok(super::support::prose(50)), Err(ServiceError::Rejected("no".into()))]);
    let orchestrator = h.orchestrator();
    assert!(orchestrator.start(RunOptions::default()).await.is_err());
    assert!(h.hints.get(&h.project.id).unwrap().is_some());

    orchestrator.reset().await.unwrap();

    assert_eq!(orchestrator.status(), RunStatus::Idle);
    assert!(orchestrator.snapshot().error.is_none());
    assert!(h.hints.get(&h.project.id).unwrap().is_none());
    assert_eq!(statuses(&h, 0), vec![UnitStatus::Done, UnitStatus::Pending]);
    assert_eq!(h.store.block_count(&h.chapters()[0].id).unwrap(), 2);
}

#[tokio::test]
async fn recovery_hint_tracks_the_last_position_and_expires() {
    let h = Harness::new(1, 0);
    h.pre_outline(2);
    h.content.hang_on_call(1);
    let orchestrator = Arc::new(h.orchestrator());

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.start(RunOptions::default()).await })
    };
    h.content.entered_hang.notified().await;

    let live: RecoveryHint = h.hints.get(&h.project.id).unwrap().unwrap();
    assert!(live.was_interrupted());
    assert_eq!(live.unit_index, Some(1));
    assert_eq!(live.completed_units, 1);

    orchestrator.pause();
    run.await.unwrap().unwrap();
    let paused = h.hints.get(&h.project.id).unwrap().unwrap();
    assert_eq!(paused.status, RunStatus::Paused);

    let expired_at = paused.written_at_ms + h.hints.ttl().as_millis() as u64 + 1;
    assert!(h.hints.get_at(&h.project.id, expired_at).unwrap().is_none());
}
