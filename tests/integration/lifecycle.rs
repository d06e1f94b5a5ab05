//! Lifecycle tests against the git-backed store.

use lanekeeper::core::{Lane, ReviewStatus};
use lanekeeper::state::GitStateStore;
use lanekeeper::Error;

use crate::fixtures::{commit_in, wp, Env};

#[test]
fn test_lifecycle_survives_process_restart() {
    let env = Env::new();
    env.register("001-auth", &[("WP01", &[]), ("WP02", &["WP01"])]);
    assert_eq!(env.engine.list_ready("001-auth").unwrap(), vec![wp("WP01")]);

    env.complete_wp("001-auth", "WP01", "src/model.rs", "pub struct User;\n");

    // A second process sees exactly what the first wrote.
    let engine = env.reopened_engine();
    let feature = engine.feature_state("001-auth").unwrap();
    let wp01 = feature.wp(&wp("WP01")).unwrap();
    assert_eq!(wp01.lane(), Lane::Done);
    assert_eq!(wp01.review_status, ReviewStatus::Approved);
    let lanes: Vec<Lane> = wp01.history().iter().map(|t| t.to_lane).collect();
    assert_eq!(lanes, vec![Lane::Doing, Lane::ForReview, Lane::Done]);
    assert_eq!(engine.list_ready("001-auth").unwrap(), vec![wp("WP02")]);

    // Every write is a snapshot with a strictly larger version.
    let log = GitStateStore::new(&env.repo.path)
        .unwrap()
        .feature_log("001-auth")
        .unwrap();
    assert!(log.len() >= 4);
    assert!(log.windows(2).all(|w| w[0].version < w[1].version));
    assert_eq!(log.last().unwrap().version, feature.version);
}

#[test]
fn test_dependent_workspace_starts_from_parent_branch() {
    let env = Env::new();
    env.register("001-auth", &[("WP01", &[]), ("WP02", &["WP01"])]);
    env.complete_wp("001-auth", "WP01", "src/model.rs", "pub struct User;\n");

    let claim = env
        .engine
        .start_implementation("001-auth", &wp("WP02"), "agent-b", None)
        .unwrap();
    assert_eq!(claim.workspace.base_ref, "001-auth-WP01");
    assert!(claim.workspace.path.join("src/model.rs").exists());
}

#[test]
fn test_concurrent_claims_have_one_winner() {
    let env = Env::new();
    env.register("001-auth", &[("WP01", &[])]);

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = ["agent-a", "agent-b"]
            .into_iter()
            .map(|actor| {
                let engine = &env.engine;
                s.spawn(move || engine.start_implementation("001-auth", &wp("WP01"), actor, None))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "{:?}", results);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    match loser {
        Error::WpAlreadyClaimed { owner, .. } => assert_eq!(owner, &winners[0].assignee),
        other => panic!("unexpected: {other:?}"),
    }

    let feature = env.engine.feature_state("001-auth").unwrap();
    let wp01 = feature.wp(&wp("WP01")).unwrap();
    assert_eq!(wp01.history().len(), 1);
    assert_eq!(wp01.assignee.as_deref(), Some(winners[0].assignee.as_str()));
}

#[test]
fn test_changes_requested_archives_feedback() {
    let env = Env::new();
    env.register("001-auth", &[("WP01", &[])]);
    let claim = env
        .engine
        .start_implementation("001-auth", &wp("WP01"), "agent-a", None)
        .unwrap();
    commit_in(&claim.workspace.path, "src/model.rs", "struct U;\n", "WP01: draft");
    env.engine
        .submit_for_review("001-auth", &wp("WP01"), "agent-a", None, None)
        .unwrap();

    let sent_back = env
        .engine
        .request_changes("001-auth", &wp("WP01"), "reviewer", "Add doc comments.", None)
        .unwrap();
    assert_eq!(sent_back.lane(), Lane::Planned);
    assert_eq!(sent_back.review_status, ReviewStatus::ChangesRequested);

    let reference = sent_back.review_feedback_ref.unwrap();
    let body = env.store.read_blob(&reference).unwrap().unwrap();
    assert_eq!(body, b"Add doc comments.");

    // The workspace outlives the round trip and is picked up again.
    let again = env
        .engine
        .start_implementation("001-auth", &wp("WP01"), "agent-a", None)
        .unwrap();
    assert_eq!(again.workspace.path, claim.workspace.path);
    assert!(again.workspace.path.join("src/model.rs").exists());
}

#[test]
fn test_stale_expected_version_is_rejected() {
    let env = Env::new();
    env.register("001-auth", &[("WP01", &[])]);
    let claim = env
        .engine
        .start_implementation("001-auth", &wp("WP01"), "agent-a", Some(0))
        .unwrap();
    assert!(claim.newly_claimed);

    let err = env
        .engine
        .submit_for_review("001-auth", &wp("WP01"), "agent-a", None, Some(0))
        .unwrap_err();
    assert!(matches!(err, Error::VersionConflict { expected: 0, actual: 1, .. }));

    let feature = env.engine.feature_state("001-auth").unwrap();
    assert_eq!(feature.lane_of(&wp("WP01")), Some(Lane::Doing));
}
