//! Shared test fixtures: a throwaway repository on `main` and the engine,
//! orchestrator and API wired around it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{Oid, Repository, RepositoryInitOptions, Signature};
use lanekeeper::api::AutomationApi;
use lanekeeper::backend::VcsBackend;
use lanekeeper::config::{Config, RetryConfig, WorkspaceConfig};
use lanekeeper::core::{Feature, WorkPackage, WorkPackageId};
use lanekeeper::git::GitBackend;
use lanekeeper::orchestration::MergeOrchestrator;
use lanekeeper::state::{GitStateStore, StateStore};
use lanekeeper::workflow::LifecycleEngine;
use lanekeeper::workspace::WorkspaceManager;
use tempfile::TempDir;

pub const STATUS_PATH: &str = "tasks/status.md";
pub const STATUS_BASE: &str = "+++\nlane = \"planned\"\nhistory = []\n+++\n- [ ] model\n";

pub fn status_in(lane: &str) -> String {
    STATUS_BASE.replace("\"planned\"", &format!("\"{}\"", lane))
}

pub fn wp(id: &str) -> WorkPackageId {
    WorkPackageId::from(id)
}

/// Repository at `<tmp>/repo` with workspaces kept in `<tmp>/worktrees`.
pub struct TestRepo {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub path: PathBuf,
    pub worktrees: PathBuf,
}

impl TestRepo {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("repo");
        let worktrees = temp_dir.path().join("worktrees");
        std::fs::create_dir_all(&path).expect("Failed to create repo dir");

        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        Repository::init_opts(&path, &opts).expect("Failed to init repo");

        commit_in(&path, "README.md", "# Test Repo\n", "Initial commit");
        commit_in(&path, STATUS_PATH, STATUS_BASE, "Add status file");

        Self {
            temp_dir,
            path,
            worktrees,
        }
    }

    pub fn repo(&self) -> Repository {
        Repository::open(&self.path).expect("Failed to open repo")
    }

    pub fn tip(&self, branch: &str) -> Oid {
        self.repo()
            .revparse_single(branch)
            .and_then(|o| o.peel_to_commit())
            .map(|c| c.id())
            .expect("Failed to resolve branch")
    }

    pub fn tree(&self, branch: &str) -> Oid {
        self.repo()
            .revparse_single(branch)
            .and_then(|o| o.peel_to_tree())
            .map(|t| t.id())
            .expect("Failed to resolve tree")
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        self.repo()
            .find_branch(branch, git2::BranchType::Local)
            .is_ok()
    }

    /// Messages along the first-parent chain of `branch`, newest first.
    pub fn first_parent_log(&self, branch: &str) -> Vec<(String, usize)> {
        let repo = self.repo();
        let mut commit = repo
            .revparse_single(branch)
            .and_then(|o| o.peel_to_commit())
            .expect("Failed to resolve branch");
        let mut log = Vec::new();
        loop {
            log.push((
                commit.message().unwrap_or_default().to_string(),
                commit.parent_count(),
            ));
            match commit.parent(0) {
                Ok(parent) => commit = parent,
                Err(_) => break,
            }
        }
        log
    }

    pub fn read_at(&self, branch: &str, file: &str) -> Option<String> {
        let repo = self.repo();
        let tree = repo
            .revparse_single(branch)
            .and_then(|o| o.peel_to_tree())
            .expect("Failed to resolve tree");
        let entry = tree.get_path(Path::new(file)).ok()?;
        let blob = repo.find_blob(entry.id()).ok()?;
        let text = String::from_utf8_lossy(blob.content()).to_string();
        Some(text)
    }

    /// Point the main checkout at `branch`, creating it at `main` if needed.
    pub fn check_out(&self, branch: &str) {
        let repo = self.repo();
        if repo.find_branch(branch, git2::BranchType::Local).is_err() {
            let main = repo.find_commit(self.tip("main")).unwrap();
            repo.branch(branch, &main, false).unwrap();
        }
        repo.set_head(&format!("refs/heads/{}", branch)).unwrap();
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .unwrap();
    }

    pub fn head_branch(&self) -> String {
        let repo = self.repo();
        let name = repo.head().unwrap().shorthand().unwrap_or_default().to_string();
        name
    }

    /// Give `branch` an `origin` upstream that is `ahead` commits further on.
    pub fn set_upstream_ahead(&self, branch: &str, ahead: usize) {
        let repo = self.repo();
        repo.remote("origin", "https://example.invalid/repo.git")
            .expect("Failed to add remote");

        let sig = Signature::now("Test", "test@example.com").unwrap();
        let mut parent = repo.find_commit(self.tip(branch)).unwrap();
        for i in 0..ahead {
            let tree = parent.tree().unwrap();
            let oid = repo
                .commit(None, &sig, &sig, &format!("Upstream {}", i), &tree, &[&parent])
                .unwrap();
            parent = repo.find_commit(oid).unwrap();
        }
        repo.reference(
            &format!("refs/remotes/origin/{}", branch),
            parent.id(),
            true,
            "test upstream",
        )
        .unwrap();
        repo.find_branch(branch, git2::BranchType::Local)
            .unwrap()
            .set_upstream(Some(&format!("origin/{}", branch)))
            .unwrap();
    }
}

/// Write `file` in the checkout at `dir` and commit it on that checkout's HEAD.
pub fn commit_in(dir: &Path, file: &str, content: &str, message: &str) -> Oid {
    let repo = Repository::open(dir).expect("Failed to open checkout");
    let full = dir.join(file);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&full, content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(file)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test", "test@example.com").unwrap();

    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

pub fn test_config(worktrees: &Path) -> Config {
    Config {
        workspace: WorkspaceConfig {
            root: Some(worktrees.display().to_string()),
        },
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        },
        ..Config::default()
    }
}

/// Engine and orchestrator sharing one git backend and one ref store.
pub struct Env {
    pub repo: TestRepo,
    pub config: Config,
    pub backend: Arc<dyn VcsBackend>,
    pub store: Arc<dyn StateStore>,
    pub engine: LifecycleEngine,
    pub merger: MergeOrchestrator,
}

impl Env {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let repo = TestRepo::new();
        let mut config = test_config(&repo.worktrees);
        tweak(&mut config);

        let backend: Arc<dyn VcsBackend> =
            Arc::new(GitBackend::new(&repo.path).expect("Failed to open backend"));
        let store: Arc<dyn StateStore> =
            Arc::new(GitStateStore::new(&repo.path).expect("Failed to open store"));
        let engine = LifecycleEngine::new(
            store.clone(),
            workspaces(&backend, &repo, &config),
            config.store.cas_retries,
        );
        let merger = MergeOrchestrator::new(
            store.clone(),
            backend.clone(),
            workspaces(&backend, &repo, &config),
            config.clone(),
        );
        Self {
            repo,
            config,
            backend,
            store,
            engine,
            merger,
        }
    }

    /// A second orchestrator over the same store, driving `backend`.
    pub fn orchestrator_with(&self, backend: Arc<dyn VcsBackend>) -> MergeOrchestrator {
        MergeOrchestrator::new(
            self.store.clone(),
            backend.clone(),
            workspaces(&backend, &self.repo, &self.config),
            self.config.clone(),
        )
    }

    /// A fresh engine over the same store, as a second process would see it.
    pub fn reopened_engine(&self) -> LifecycleEngine {
        let store: Arc<dyn StateStore> =
            Arc::new(GitStateStore::new(&self.repo.path).expect("Failed to open store"));
        LifecycleEngine::new(
            store,
            workspaces(&self.backend, &self.repo, &self.config),
            self.config.store.cas_retries,
        )
    }

    pub fn api(&self) -> AutomationApi {
        AutomationApi::with_parts(
            self.backend.clone(),
            self.store.clone(),
            &self.repo.path,
            self.config.clone(),
        )
    }

    /// Register `slug` targeting `main`; each entry is `(id, dependencies)`.
    pub fn register(&self, slug: &str, wps: &[(&str, &[&str])]) -> Feature {
        let wps = wps
            .iter()
            .map(|(id, deps)| WorkPackage::new(*id, format!("Work package {}", id)).with_dependencies(deps.iter().copied()))
            .collect();
        self.engine
            .register_feature(Feature::new(slug, "software-dev", "main", wps))
            .expect("Failed to register feature")
    }

    /// Claim, commit `file` in the workspace, submit and approve.
    pub fn complete_wp(&self, slug: &str, id: &str, file: &str, content: &str) -> PathBuf {
        let claim = self
            .engine
            .start_implementation(slug, &wp(id), "agent", None)
            .expect("Failed to claim");
        commit_in(
            &claim.workspace.path,
            file,
            content,
            &format!("{}: implement", id),
        );
        self.engine
            .submit_for_review(slug, &wp(id), "agent", None, None)
            .expect("Failed to submit");
        self.engine
            .approve(slug, &wp(id), "reviewer", None, None)
            .expect("Failed to approve");
        claim.workspace.path
    }
}

fn workspaces(backend: &Arc<dyn VcsBackend>, repo: &TestRepo, config: &Config) -> WorkspaceManager {
    WorkspaceManager::new(
        backend.clone(),
        config.workspace_root(&repo.path),
        config.retry.clone(),
    )
}
