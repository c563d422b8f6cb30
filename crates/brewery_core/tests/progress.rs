use brewery_core::{JobState, Progress, ProgressDelta};
use pretty_assertions::assert_eq;

#[test]
fn counters_accumulate_into_snapshot() {
    let mut progress = Progress::new();
    progress.apply(ProgressDelta::Planned {
        items: 3,
        batches: 1,
    });
    progress.apply(ProgressDelta::ItemFinished);
    progress.apply(ProgressDelta::Skipped {
        key: "https://a".into(),
        message: "fetch failed (fatal): 404".into(),
    });
    progress.apply(ProgressDelta::ItemFinished);
    progress.apply(ProgressDelta::ItemFinished);
    progress.apply(ProgressDelta::Processed { count: 2 });
    progress.apply(ProgressDelta::BatchFinished);
    progress.apply(ProgressDelta::Retries(4));

    let snapshot = progress.snapshot(JobState::Completed, true);
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.current, 3);
    assert_eq!(snapshot.processed, 2);
    assert_eq!(snapshot.skipped, 1);
    assert_eq!(snapshot.retries, 4);
    assert_eq!(snapshot.errors, vec!["https://a: fetch failed (fatal): 404"]);
    assert_eq!(snapshot.batches_done, 1);
    assert!(snapshot.just_completed);
    assert!(snapshot.is_terminal());
}

#[test]
fn outcomes_never_exceed_total() {
    let mut progress = Progress::new();
    progress.apply(ProgressDelta::Planned {
        items: 2,
        batches: 1,
    });
    progress.apply(ProgressDelta::Processed { count: 5 });
    progress.apply(ProgressDelta::Cancelled { count: 1 });
    progress.apply(ProgressDelta::Skipped {
        key: "k".into(),
        message: "late".into(),
    });
    for _ in 0..4 {
        progress.apply(ProgressDelta::ItemFinished);
    }

    let snapshot = progress.snapshot(JobState::Running, false);
    assert_eq!(snapshot.processed, 2);
    assert_eq!(snapshot.cancelled, 0);
    assert_eq!(snapshot.skipped, 0);
    assert_eq!(snapshot.current, 2);
    assert!(snapshot.processed + snapshot.skipped + snapshot.cancelled <= snapshot.total);
    // The message is still recorded for the operator.
    assert_eq!(snapshot.errors.len(), 1);
}

#[test]
fn log_lines_replace_the_previous_one() {
    let mut progress = Progress::new();
    progress.apply(ProgressDelta::Log("collected 4 items".into()));
    progress.apply(ProgressDelta::Log("batch 1/1 persisted".into()));
    assert_eq!(
        progress.snapshot(JobState::Running, false).last_log.as_deref(),
        Some("batch 1/1 persisted")
    );
}
