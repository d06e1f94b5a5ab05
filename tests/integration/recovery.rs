//! Interrupted merges: crash injection, resume and abort.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lanekeeper::backend::{
    FileDiff, MergeOutcome, MergeRequest, MergeStrategy, ResolvedFile, VcsBackend,
    WorkspaceStatus,
};
use lanekeeper::orchestration::{MergeCommand, MergeRun};
use lanekeeper::{Error, Result};

use crate::fixtures::{commit_in, wp, Env};

const SLUG: &str = "005-recover";

#[derive(Clone, Copy)]
enum Fault {
    /// The process dies before the backend sees the merge.
    CrashBefore,
    /// The merge lands, then the process dies before recording it.
    CrashAfter,
    /// Every attempt fails with a retryable error.
    Flaky,
}

/// Delegates to a real backend, failing the `on`-th merge call.
struct FaultyBackend {
    inner: Arc<dyn VcsBackend>,
    fault: Fault,
    on: usize,
    merges: AtomicUsize,
}

impl FaultyBackend {
    fn new(inner: Arc<dyn VcsBackend>, fault: Fault, on: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fault,
            on,
            merges: AtomicUsize::new(0),
        })
    }
}

fn crash() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other, "simulated crash"))
}

impl VcsBackend for FaultyBackend {
    fn branch_exists(&self, branch: &str) -> Result<bool> {
        self.inner.branch_exists(branch)
    }
    fn resolve(&self, rev: &str) -> Result<Option<String>> {
        self.inner.resolve(rev)
    }
    fn create_branch(&self, name: &str, base: &str) -> Result<String> {
        self.inner.create_branch(name, base)
    }
    fn checkout(&self, branch: &str, path: &Path) -> Result<()> {
        self.inner.checkout(branch, path)
    }
    fn workspace_exists(&self, path: &Path) -> bool {
        self.inner.workspace_exists(path)
    }
    fn remove_workspace(&self, path: &Path) -> Result<()> {
        self.inner.remove_workspace(path)
    }
    fn status(&self, path: &Path) -> Result<WorkspaceStatus> {
        self.inner.status(path)
    }
    fn main_checkout_dirty(&self) -> Result<bool> {
        self.inner.main_checkout_dirty()
    }
    fn head_branch(&self) -> Result<Option<String>> {
        self.inner.head_branch()
    }
    fn switch_branch(&self, branch: &str) -> Result<()> {
        self.inner.switch_branch(branch)
    }
    fn diff(&self, from: &str, to: &str) -> Result<Vec<FileDiff>> {
        self.inner.diff(from, to)
    }
    fn read_file(&self, rev: &str, path: &str) -> Result<Option<String>> {
        self.inner.read_file(rev, path)
    }
    fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        self.inner.merge_base(a, b)
    }
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.inner.is_ancestor(ancestor, descendant)
    }

    fn merge(&self, request: &MergeRequest, resolutions: &[ResolvedFile]) -> Result<MergeOutcome> {
        let call = self.merges.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fault {
            Fault::Flaky => Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "backend timed out",
            ))),
            Fault::CrashBefore if call == self.on => Err(crash()),
            Fault::CrashAfter if call == self.on => {
                self.inner.merge(request, resolutions)?;
                Err(crash())
            }
            _ => self.inner.merge(request, resolutions),
        }
    }

    fn integrated_onto(&self, request: &MergeRequest, base_tip: &str) -> Result<bool> {
        self.inner.integrated_onto(request, base_tip)
    }

    fn stage_pending_merge(
        &self,
        request: &MergeRequest,
        resolutions: &[ResolvedFile],
    ) -> Result<Vec<String>> {
        self.inner.stage_pending_merge(request, resolutions)
    }
    fn merge_in_progress(&self) -> Result<bool> {
        self.inner.merge_in_progress()
    }
    fn unresolved_conflicts(&self) -> Result<Vec<String>> {
        self.inner.unresolved_conflicts()
    }
    fn conclude_pending_merge(&self, request: &MergeRequest) -> Result<String> {
        self.inner.conclude_pending_merge(request)
    }
    fn abort_pending_merge(&self) -> Result<()> {
        self.inner.abort_pending_merge()
    }
    fn behind_upstream(&self, branch: &str) -> Result<Option<usize>> {
        self.inner.behind_upstream(branch)
    }
    fn push(&self, branch: &str, remote: &str) -> Result<()> {
        self.inner.push(branch, remote)
    }
    fn delete_branch(&self, branch: &str) -> Result<()> {
        self.inner.delete_branch(branch)
    }
}

fn ready_feature(env: &Env) {
    env.register(SLUG, &[("WP01", &[]), ("WP02", &["WP01"])]);
    env.complete_wp(SLUG, "WP01", "src/store.rs", "pub struct Store;\n");
    env.complete_wp(SLUG, "WP02", "src/sync.rs", "pub fn sync() {}\n");
}

/// Tree of `main` after an uninterrupted merge of the same feature.
fn reference_tree() -> git2::Oid {
    let env = Env::new();
    ready_feature(&env);
    env.merger.execute(SLUG, &MergeCommand::default()).unwrap();
    env.repo.tree("main")
}

fn assert_merged_once(env: &Env) {
    let log = env.repo.first_parent_log("main");
    let merges: Vec<_> = log.iter().filter(|(_, parents)| *parents == 2).collect();
    assert_eq!(merges.len(), 2, "{:?}", log);
    assert_eq!(log[0].0, "Merge WP02 (005-recover) into main");
    assert_eq!(log[1].0, "Merge WP01 (005-recover) into main");
    assert_eq!(env.repo.tree("main"), reference_tree());
    assert!(env.merger.status(SLUG).unwrap().is_none());
    assert!(env.engine.feature_state(SLUG).unwrap().merged_at.is_some());
}

#[test]
fn test_crash_before_merge_then_resume() {
    let env = Env::new();
    ready_feature(&env);
    let before = env.repo.tip("main");

    let crashing = env.orchestrator_with(FaultyBackend::new(env.backend.clone(), Fault::CrashBefore, 1));
    assert!(crashing.execute(SLUG, &MergeCommand::default()).is_err());

    let state = env.merger.status(SLUG).unwrap().unwrap();
    assert_eq!(state.current_wp, Some(wp("WP01")));
    assert!(state.completed_wps.is_empty());
    assert_eq!(env.repo.tip("main"), before);

    match env.merger.resume(SLUG).unwrap() {
        MergeRun::Completed { merged, .. } => assert_eq!(merged, vec![wp("WP01"), wp("WP02")]),
        other => panic!("unexpected: {other:?}"),
    }
    assert_merged_once(&env);
}

#[test]
fn test_crash_after_merge_is_not_merged_twice() {
    let env = Env::new();
    ready_feature(&env);

    let crashing = env.orchestrator_with(FaultyBackend::new(env.backend.clone(), Fault::CrashAfter, 1));
    assert!(crashing.execute(SLUG, &MergeCommand::default()).is_err());

    // WP01 landed but the record still shows it in flight.
    let state = env.merger.status(SLUG).unwrap().unwrap();
    assert_eq!(state.current_wp, Some(wp("WP01")));
    assert!(state.completed_wps.is_empty());
    assert_eq!(
        env.repo.first_parent_log("main")[0].0,
        "Merge WP01 (005-recover) into main"
    );

    env.merger.resume(SLUG).unwrap();
    assert_merged_once(&env);
}

#[test]
fn test_unrelated_commit_after_crash_does_not_count_as_merged() {
    let env = Env::new();
    ready_feature(&env);

    let crashing = env.orchestrator_with(FaultyBackend::new(env.backend.clone(), Fault::CrashBefore, 1));
    assert!(crashing.execute(SLUG, &MergeCommand::default()).is_err());
    commit_in(&env.repo.path, "other.txt", "hotfix\n", "Hotfix on main");

    match env.merger.resume(SLUG).unwrap() {
        MergeRun::Completed { merged, .. } => assert_eq!(merged, vec![wp("WP01"), wp("WP02")]),
        other => panic!("unexpected: {other:?}"),
    }
    let log = env.repo.first_parent_log("main");
    assert_eq!(log[0].0, "Merge WP02 (005-recover) into main");
    assert_eq!(log[1].0, "Merge WP01 (005-recover) into main");
    assert_eq!(log[2].0, "Hotfix on main");
    assert_eq!(
        env.repo.read_at("main", "src/store.rs").as_deref(),
        Some("pub struct Store;\n")
    );
    assert!(env.repo.read_at("main", "src/sync.rs").is_some());
    assert_eq!(env.repo.read_at("main", "other.txt").as_deref(), Some("hotfix\n"));
}

#[test]
fn test_unrelated_commit_after_squash_crash_is_not_taken_for_the_squash() {
    let env = Env::new();
    ready_feature(&env);
    let squash = MergeCommand {
        strategy: Some(MergeStrategy::Squash),
        ..MergeCommand::default()
    };

    let crashing = env.orchestrator_with(FaultyBackend::new(env.backend.clone(), Fault::CrashBefore, 1));
    assert!(crashing.execute(SLUG, &squash).is_err());
    commit_in(&env.repo.path, "other.txt", "hotfix\n", "Hotfix on main");

    env.merger.resume(SLUG).unwrap();
    assert!(env.repo.read_at("main", "src/store.rs").is_some());
    let log = env.repo.first_parent_log("main");
    assert_eq!(log[1].0, "Merge WP01 (005-recover) into main");
    assert_eq!(log[2].0, "Hotfix on main");
}

#[test]
fn test_squash_crash_after_merge_is_not_squashed_twice() {
    let env = Env::new();
    ready_feature(&env);
    let squash = MergeCommand {
        strategy: Some(MergeStrategy::Squash),
        ..MergeCommand::default()
    };

    let crashing = env.orchestrator_with(FaultyBackend::new(env.backend.clone(), Fault::CrashAfter, 1));
    assert!(crashing.execute(SLUG, &squash).is_err());
    assert_eq!(
        env.repo.first_parent_log("main")[0].0,
        "Merge WP01 (005-recover) into main"
    );

    env.merger.resume(SLUG).unwrap();
    let log = env.repo.first_parent_log("main");
    let squashed = |message: &str| log.iter().filter(|(m, _)| m == message).count();
    assert_eq!(log[0].0, "Merge WP02 (005-recover) into main");
    assert_eq!(squashed("Merge WP01 (005-recover) into main"), 1);
    assert_eq!(squashed("Merge WP02 (005-recover) into main"), 1);
    assert!(log.iter().all(|(_, parents)| *parents <= 1));
}

#[test]
fn test_second_execute_refused_after_crash() {
    let env = Env::new();
    ready_feature(&env);

    let crashing = env.orchestrator_with(FaultyBackend::new(env.backend.clone(), Fault::CrashAfter, 2));
    assert!(crashing.execute(SLUG, &MergeCommand::default()).is_err());
    assert!(matches!(
        env.merger.execute(SLUG, &MergeCommand::default()),
        Err(Error::MergeAlreadyInProgress { .. })
    ));

    let state = env.merger.status(SLUG).unwrap().unwrap();
    assert_eq!(state.completed_wps, vec![wp("WP01")]);
    assert_eq!(state.current_wp, Some(wp("WP02")));

    env.merger.resume(SLUG).unwrap();
    assert_merged_once(&env);
}

#[test]
fn test_abort_keeps_completed_work_packages() {
    let env = Env::new();
    ready_feature(&env);

    let crashing = env.orchestrator_with(FaultyBackend::new(env.backend.clone(), Fault::CrashBefore, 2));
    assert!(crashing.execute(SLUG, &MergeCommand::default()).is_err());
    let after_wp01 = env.repo.tip("main");

    let report = env.merger.abort(SLUG).unwrap();
    assert_eq!(report.completed, vec![wp("WP01")]);
    assert_eq!(report.cancelled, vec![wp("WP02")]);
    assert_eq!(env.repo.tip("main"), after_wp01);
    assert_eq!(
        env.repo.first_parent_log("main")[0].0,
        "Merge WP01 (005-recover) into main"
    );

    assert!(env.merger.status(SLUG).unwrap().is_none());
    assert!(matches!(
        env.merger.resume(SLUG),
        Err(Error::NoMergeInProgress { .. })
    ));
    assert!(matches!(
        env.merger.abort(SLUG),
        Err(Error::NoMergeInProgress { .. })
    ));
}

#[test]
fn test_retries_exhausted_surface_as_backend_failure() {
    let env = Env::new();
    ready_feature(&env);
    let flaky = FaultyBackend::new(env.backend.clone(), Fault::Flaky, 0);
    let orchestrator = env.orchestrator_with(flaky.clone());

    match orchestrator.execute(SLUG, &MergeCommand::default()).unwrap_err() {
        Error::BackendFailure {
            operation,
            attempts,
            ..
        } => {
            assert_eq!(operation, "merge");
            assert_eq!(attempts, env.config.retry.max_attempts);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(
        flaky.merges.load(Ordering::SeqCst),
        env.config.retry.max_attempts as usize
    );

    env.merger.resume(SLUG).unwrap();
    assert_merged_once(&env);
}
