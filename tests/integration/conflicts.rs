//! Conflict forecasting, status-file auto-resolution and manual halts.

use std::path::Path;

use git2::RepositoryState;
use lanekeeper::core::Lane;
use lanekeeper::orchestration::status_file::StatusFile;
use lanekeeper::orchestration::{Classification, MergeCommand, MergeRun};
use lanekeeper::Error;

use crate::fixtures::{commit_in, status_in, wp, Env, STATUS_PATH};

const SLUG: &str = "002-status";

#[test]
fn test_status_file_conflict_resolves_itself() {
    let env = Env::new();
    env.register(SLUG, &[("WP01", &[]), ("WP02", &[])]);
    env.complete_wp(SLUG, "WP01", STATUS_PATH, &status_in("doing"));
    env.complete_wp(SLUG, "WP02", STATUS_PATH, &status_in("for_review"));

    let report = env.merger.dry_run(SLUG, &MergeCommand::default()).unwrap();
    assert_eq!(report.forecast.len(), 1);
    let forecast = &report.forecast[0];
    assert_eq!(forecast.file_path, STATUS_PATH);
    assert_eq!(forecast.classification, Classification::AutoResolvable);
    assert_eq!(
        forecast.contributing_wps.iter().cloned().collect::<Vec<_>>(),
        vec![wp("WP01"), wp("WP02")]
    );

    match env.merger.execute(SLUG, &MergeCommand::default()).unwrap() {
        MergeRun::Completed { merged, .. } => assert_eq!(merged, vec![wp("WP01"), wp("WP02")]),
        other => panic!("unexpected: {other:?}"),
    }

    // The more advanced lane wins; no human was asked.
    let merged = env.repo.read_at("main", STATUS_PATH).unwrap();
    let status = StatusFile::parse(&merged).unwrap();
    assert_eq!(status.lane(), Lane::ForReview);
    assert_eq!(status.body(), "- [ ] model\n");
}

#[test]
fn test_manual_conflict_halts_until_resolved() {
    let env = Env::new();
    env.register(SLUG, &[("WP01", &[]), ("WP02", &[])]);
    let ws1 = env.complete_wp(SLUG, "WP01", "src/lib.rs", "pub fn a() {}\n");
    commit_in(&ws1, STATUS_PATH, &status_in("doing"), "WP01: status");
    let ws2 = env.complete_wp(SLUG, "WP02", "src/lib.rs", "pub fn b() {}\n");
    commit_in(&ws2, STATUS_PATH, &status_in("for_review"), "WP02: status");

    let report = env.merger.dry_run(SLUG, &MergeCommand::default()).unwrap();
    let manual: Vec<_> = report
        .forecast
        .iter()
        .filter(|f| f.classification == Classification::Manual)
        .map(|f| f.file_path.as_str())
        .collect();
    assert_eq!(manual, vec!["src/lib.rs"]);

    match env.merger.execute(SLUG, &MergeCommand::default()).unwrap() {
        MergeRun::Halted {
            wp: halted,
            conflicts,
            auto_resolved,
            completed,
            remaining,
            ..
        } => {
            assert_eq!(halted, wp("WP02"));
            assert_eq!(conflicts, vec!["src/lib.rs".to_string()]);
            assert_eq!(auto_resolved, vec![STATUS_PATH.to_string()]);
            assert_eq!(completed, vec![wp("WP01")]);
            assert_eq!(remaining, vec![wp("WP02")]);
        }
        other => panic!("unexpected: {other:?}"),
    }

    let state = env.merger.status(SLUG).unwrap().unwrap();
    assert!(state.has_pending_conflicts);
    assert_eq!(state.current_wp, Some(wp("WP02")));
    assert_eq!(env.repo.repo().state(), RepositoryState::Merge);

    // Resuming before the human is done is refused.
    match env.merger.resume(SLUG).unwrap_err() {
        Error::UnresolvedBackendConflict { files } => assert_eq!(files, vec!["src/lib.rs"]),
        other => panic!("unexpected: {other:?}"),
    }

    std::fs::write(env.repo.path.join("src/lib.rs"), "pub fn a() {}\npub fn b() {}\n").unwrap();
    let repo = env.repo.repo();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new("src/lib.rs")).unwrap();
    index.write().unwrap();

    match env.merger.resume(SLUG).unwrap() {
        MergeRun::Completed { merged, .. } => assert_eq!(merged, vec![wp("WP01"), wp("WP02")]),
        other => panic!("unexpected: {other:?}"),
    }

    let log = env.repo.first_parent_log("main");
    assert_eq!(log[0], ("Merge WP02 (002-status) into main".to_string(), 2));
    assert_eq!(log[1], ("Merge WP01 (002-status) into main".to_string(), 2));
    assert_eq!(
        env.repo.read_at("main", "src/lib.rs").unwrap(),
        "pub fn a() {}\npub fn b() {}\n"
    );
    let status = StatusFile::parse(&env.repo.read_at("main", STATUS_PATH).unwrap()).unwrap();
    assert_eq!(status.lane(), Lane::ForReview);

    assert_eq!(env.repo.repo().state(), RepositoryState::Clean);
    assert!(env.merger.status(SLUG).unwrap().is_none());
}

#[test]
fn test_abort_after_halt_keeps_completed_wps() {
    let env = Env::new();
    env.register(SLUG, &[("WP01", &[]), ("WP02", &[])]);
    env.complete_wp(SLUG, "WP01", "src/lib.rs", "pub fn a() {}\n");
    env.complete_wp(SLUG, "WP02", "src/lib.rs", "pub fn b() {}\n");

    assert!(matches!(
        env.merger.execute(SLUG, &MergeCommand::default()).unwrap(),
        MergeRun::Halted { .. }
    ));
    let after_wp01 = env.repo.tip("main");

    let report = env.merger.abort(SLUG).unwrap();
    assert_eq!(report.completed, vec![wp("WP01")]);
    assert_eq!(report.cancelled, vec![wp("WP02")]);

    assert_eq!(env.repo.tip("main"), after_wp01);
    assert_eq!(env.repo.repo().state(), RepositoryState::Clean);
    assert_eq!(
        env.repo.read_at("main", "src/lib.rs").unwrap(),
        "pub fn a() {}\n"
    );
    assert_eq!(
        std::fs::read_to_string(env.repo.path.join("src/lib.rs")).unwrap(),
        "pub fn a() {}\n"
    );
    assert!(env.merger.status(SLUG).unwrap().is_none());

    // The feature is untouched and can be merged again later.
    let feature = env.engine.feature_state(SLUG).unwrap();
    assert!(feature.merged_at.is_none());
    assert_eq!(feature.workspaces.len(), 2);
}

#[test]
fn test_abort_returns_main_checkout_to_its_branch() {
    let env = Env::new();
    env.register(SLUG, &[("WP01", &[]), ("WP02", &[])]);
    env.complete_wp(SLUG, "WP01", "src/lib.rs", "pub fn a() {}\n");
    env.complete_wp(SLUG, "WP02", "src/lib.rs", "pub fn b() {}\n");
    env.repo.check_out("dev");

    assert!(matches!(
        env.merger.execute(SLUG, &MergeCommand::default()).unwrap(),
        MergeRun::Halted { .. }
    ));
    assert_eq!(env.repo.head_branch(), "main");
    let state = env.merger.status(SLUG).unwrap().unwrap();
    assert_eq!(state.original_head.as_deref(), Some("dev"));

    env.merger.abort(SLUG).unwrap();
    assert_eq!(env.repo.head_branch(), "dev");
    assert_eq!(env.repo.repo().state(), RepositoryState::Clean);
    assert!(!env.repo.path.join("src/lib.rs").exists());
    assert_eq!(
        env.repo.read_at("main", "src/lib.rs").as_deref(),
        Some("pub fn a() {}\n")
    );
}
