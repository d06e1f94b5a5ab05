use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Commit, ErrorCode, Index, IndexEntry, IndexTime, Oid, Repository,
    RepositoryState, ResetType, Signature, Sort, StatusOptions,
};
use tracing::{debug, warn};

use crate::backend::{
    ConflictFile, FileDiff, LineRange, MergeOutcome, MergeRequest, MergeStrategy, ResolvedFile,
    VcsBackend, WorkspaceStatus,
};
use crate::{Error, Result};

const DEFAULT_FILE_MODE: u32 = 0o100644;

/// libgit2-backed implementation of [`VcsBackend`].
///
/// Work package checkouts are git worktrees. Merges are computed in memory
/// and only move the target branch by compare-and-swap once a complete tree
/// exists, so an interrupted merge never leaves the target half-written.
pub struct GitBackend {
    repo_path: PathBuf,
}

impl GitBackend {
    pub fn new(repo_path: &Path) -> Result<Self> {
        debug!("GitBackend::new path={}", repo_path.display());
        let _ = Repository::discover(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn signature(repo: &Repository) -> Result<Signature<'static>> {
        Ok(repo
            .signature()
            .or_else(|_| Signature::now("lanekeeper", "lanekeeper@localhost"))?)
    }

    fn branch_commit<'r>(repo: &'r Repository, branch: &str) -> Result<Commit<'r>> {
        Ok(repo
            .find_branch(branch, BranchType::Local)?
            .get()
            .peel_to_commit()?)
    }

    fn head_is(repo: &Repository, branch: &str) -> bool {
        repo.head()
            .ok()
            .and_then(|h| h.name().map(|n| n == format!("refs/heads/{}", branch)))
            .unwrap_or(false)
    }

    /// Uncommitted changes to tracked files in the main checkout.
    fn has_tracked_changes(repo: &Repository) -> Result<bool> {
        if repo.is_bare() {
            return Ok(false);
        }
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let dirty = !repo.statuses(Some(&mut opts))?.is_empty();
        Ok(dirty)
    }

    /// Check out `branch` in the main checkout. A safe checkout: local
    /// modifications make it fail instead of being overwritten.
    fn switch_to(repo: &Repository, branch: &str) -> Result<()> {
        if Self::head_is(repo, branch) {
            return Ok(());
        }
        let commit = Self::branch_commit(repo, branch)?;
        repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().safe()))?;
        repo.set_head(&format!("refs/heads/{}", branch))?;
        debug!("Main checkout switched to {}", branch);
        Ok(())
    }

    /// Move `branch` from `expected` to `new`, failing if someone else moved
    /// it in between. Refreshes the main checkout if it has the branch out.
    fn advance_branch(repo: &Repository, branch: &str, expected: Oid, new: Oid) -> Result<()> {
        let refname = format!("refs/heads/{}", branch);
        match repo.reference_matching(
            &refname,
            new,
            true,
            expected,
            &format!("lanekeeper: integrate into {}", branch),
        ) {
            Ok(_) => {}
            Err(e) if e.code() == ErrorCode::Modified => {
                return Err(Error::StaleWrite(refname));
            }
            Err(e) => return Err(e.into()),
        }
        debug!("Advanced {} {} -> {}", branch, expected, new);

        if Self::head_is(repo, branch) {
            if Self::has_tracked_changes(repo)? {
                warn!("Main checkout of {} has local edits; leaving its files alone", branch);
            } else {
                repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
            }
        }
        Ok(())
    }

    /// Commits on the first-parent chain strictly above `base`, oldest
    /// first. `None` when `base` is not on that chain.
    fn commits_above<'r>(tip: Commit<'r>, base: Oid) -> Result<Option<Vec<Commit<'r>>>> {
        let mut chain = Vec::new();
        let mut commit = tip;
        while commit.id() != base {
            if commit.parent_count() == 0 {
                return Ok(None);
            }
            let parent = commit.parent(0)?;
            chain.push(commit);
            commit = parent;
        }
        chain.reverse();
        Ok(Some(chain))
    }

    fn same_origin(original: &Commit<'_>, replayed: &Commit<'_>) -> bool {
        let (a, b) = (original.author(), replayed.author());
        original.message_bytes() == replayed.message_bytes()
            && a.name_bytes() == b.name_bytes()
            && a.email_bytes() == b.email_bytes()
            && a.when() == b.when()
    }

    fn read_blob(repo: &Repository, oid: Option<Oid>) -> Result<Option<String>> {
        match oid {
            Some(id) if !id.is_zero() => {
                let blob = repo.find_blob(id)?;
                Ok(Some(String::from_utf8_lossy(blob.content()).to_string()))
            }
            _ => Ok(None),
        }
    }

    fn extract_conflicts(repo: &Repository, index: &Index) -> Result<Vec<ConflictFile>> {
        let mut conflicts = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let path = conflict
                .our
                .as_ref()
                .or(conflict.their.as_ref())
                .or(conflict.ancestor.as_ref())
                .map(|e| String::from_utf8_lossy(&e.path).to_string())
                .unwrap_or_default();

            let our_id = conflict.our.as_ref().map(|e| e.id);
            let their_id = conflict.their.as_ref().map(|e| e.id);
            conflicts.push(ConflictFile {
                path,
                ours: Self::read_blob(repo, our_id)?,
                theirs: Self::read_blob(repo, their_id)?,
                base: Self::read_blob(repo, conflict.ancestor.as_ref().map(|e| e.id))?,
                ours_id: our_id.map(|id| id.to_string()),
                theirs_id: their_id.map(|id| id.to_string()),
            });
        }
        conflicts.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(conflicts)
    }

    /// Replace matching conflict entries in an in-memory index with the
    /// resolved content.
    fn apply_resolutions(
        repo: &Repository,
        index: &mut Index,
        resolutions: &[ResolvedFile],
    ) -> Result<()> {
        if resolutions.is_empty() || !index.has_conflicts() {
            return Ok(());
        }

        let mut resolved = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let Some(entry) = conflict.our.as_ref().or(conflict.their.as_ref()) else {
                continue;
            };
            let path = String::from_utf8_lossy(&entry.path).to_string();
            let ours = conflict.our.as_ref().map(|e| e.id.to_string());
            let theirs = conflict.their.as_ref().map(|e| e.id.to_string());
            if let Some(resolution) = resolutions
                .iter()
                .find(|r| r.matches(&path, ours.as_deref(), theirs.as_deref()))
            {
                let mode = if entry.mode == 0 {
                    DEFAULT_FILE_MODE
                } else {
                    entry.mode
                };
                resolved.push((path, mode, resolution.content.clone()));
            }
        }

        for (path, mode, content) in resolved {
            let blob = repo.blob(content.as_bytes())?;
            index.conflict_remove(Path::new(&path))?;
            index.add(&IndexEntry {
                ctime: IndexTime::new(0, 0),
                mtime: IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode,
                uid: 0,
                gid: 0,
                file_size: content.len() as u32,
                id: blob,
                flags: 0,
                flags_extended: 0,
                path: path.as_bytes().to_vec(),
            })?;
            debug!("Applied resolution for {}", path);
        }
        Ok(())
    }

    fn merge_two_way(
        repo: &Repository,
        request: &MergeRequest,
        target: &Commit<'_>,
        source: &Commit<'_>,
        resolutions: &[ResolvedFile],
    ) -> Result<MergeOutcome> {
        let mut index = repo.merge_commits(target, source, None)?;
        Self::apply_resolutions(repo, &mut index, resolutions)?;
        if index.has_conflicts() {
            return Ok(MergeOutcome::Conflicts {
                files: Self::extract_conflicts(repo, &index)?,
            });
        }

        let tree = repo.find_tree(index.write_tree_to(repo)?)?;
        let sig = Self::signature(repo)?;
        let parents: Vec<&Commit<'_>> = match request.strategy {
            MergeStrategy::Merge => vec![target, source],
            _ => vec![target],
        };
        let commit = repo.commit(None, &sig, &sig, &request.message, &tree, &parents)?;
        Self::advance_branch(repo, &request.target, target.id(), commit)?;
        Ok(MergeOutcome::Merged {
            commit: commit.to_string(),
        })
    }

    /// Replay each commit of the source onto the target, oldest first.
    fn replay(
        repo: &Repository,
        request: &MergeRequest,
        target: &Commit<'_>,
        source: &Commit<'_>,
        resolutions: &[ResolvedFile],
    ) -> Result<MergeOutcome> {
        let mut walk = repo.revwalk()?;
        walk.push(source.id())?;
        walk.hide(target.id())?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

        let sig = Self::signature(repo)?;
        let mut onto = target.clone();
        for oid in walk {
            let commit = repo.find_commit(oid?)?;
            let mainline = if commit.parent_count() > 1 { 1 } else { 0 };
            let mut index = repo.cherrypick_commit(&commit, &onto, mainline, None)?;
            Self::apply_resolutions(repo, &mut index, resolutions)?;
            if index.has_conflicts() {
                return Ok(MergeOutcome::Conflicts {
                    files: Self::extract_conflicts(repo, &index)?,
                });
            }
            let tree = repo.find_tree(index.write_tree_to(repo)?)?;
            let message = commit.message().unwrap_or(&request.message).to_string();
            let replayed = repo.commit(None, &commit.author(), &sig, &message, &tree, &[&onto])?;
            onto = repo.find_commit(replayed)?;
        }

        Self::advance_branch(repo, &request.target, target.id(), onto.id())?;
        Ok(MergeOutcome::Merged {
            commit: onto.id().to_string(),
        })
    }

    fn conflicted_paths(index: &Index) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        if !index.has_conflicts() {
            return Ok(paths);
        }
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            if let Some(entry) = conflict
                .our
                .as_ref()
                .or(conflict.their.as_ref())
                .or(conflict.ancestor.as_ref())
            {
                paths.push(String::from_utf8_lossy(&entry.path).to_string());
            }
        }
        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}

impl VcsBackend for GitBackend {
    fn branch_exists(&self, branch: &str) -> Result<bool> {
        let repo = self.repo()?;
        let result = repo.find_branch(branch, BranchType::Local);
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn resolve(&self, rev: &str) -> Result<Option<String>> {
        let repo = self.repo()?;
        let result = match repo.revparse_single(rev) {
            Ok(obj) => Ok(Some(obj.peel_to_commit()?.id().to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        };
        result
    }

    fn create_branch(&self, name: &str, base: &str) -> Result<String> {
        debug!("GitBackend::create_branch name={} base={}", name, base);
        let repo = self.repo()?;
        let commit = repo.revparse_single(base)?.peel_to_commit()?;
        repo.branch(name, &commit, false)?;
        Ok(commit.id().to_string())
    }

    fn checkout(&self, branch: &str, path: &Path) -> Result<()> {
        debug!(
            "GitBackend::checkout branch={} path={}",
            branch,
            path.display()
        );
        let repo = self.repo()?;
        let reference = repo.find_branch(branch, BranchType::Local)?.into_reference();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut opts = git2::WorktreeAddOptions::new();
        opts.reference(Some(&reference));
        // Branch names may contain slashes; the folder name is always flat.
        let worktree_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(branch);
        repo.worktree(worktree_name, path, Some(&opts))?;
        debug!("Worktree {} created", worktree_name);
        Ok(())
    }

    fn workspace_exists(&self, path: &Path) -> bool {
        path.exists() && Repository::open(path).is_ok()
    }

    fn remove_workspace(&self, path: &Path) -> Result<()> {
        debug!("GitBackend::remove_workspace path={}", path.display());
        let repo = self.repo()?;
        let folder_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from);

        let names: Vec<String> = repo
            .worktrees()?
            .iter()
            .flatten()
            .map(String::from)
            .collect();
        let known = names
            .iter()
            .find(|name| {
                repo.find_worktree(name)
                    .map(|wt| wt.path() == path)
                    .unwrap_or(false)
            })
            .cloned()
            .or_else(|| {
                folder_name
                    .as_ref()
                    .filter(|f| names.contains(f))
                    .cloned()
            });

        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }

        if let Some(name) = known {
            if let Ok(worktree) = repo.find_worktree(&name) {
                let _ = worktree.unlock();
                if let Err(e) = worktree.prune(Some(
                    git2::WorktreePruneOptions::new()
                        .valid(true)
                        .working_tree(true)
                        .locked(true),
                )) {
                    warn!("Worktree prune failed for '{}': {}", name, e);
                }
            }
            // If the admin dir survives, git still considers the branch
            // checked out and refuses to delete it.
            let admin_dir = repo.path().join("worktrees").join(&name);
            if admin_dir.exists() {
                std::fs::remove_dir_all(&admin_dir)?;
            }
        }
        Ok(())
    }

    fn status(&self, path: &Path) -> Result<WorkspaceStatus> {
        let repo = Repository::open(path)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(if statuses.is_empty() {
            WorkspaceStatus::Clean
        } else {
            WorkspaceStatus::Dirty
        })
    }

    fn main_checkout_dirty(&self) -> Result<bool> {
        let repo = self.repo()?;
        Self::has_tracked_changes(&repo)
    }

    fn head_branch(&self) -> Result<Option<String>> {
        let repo = self.repo()?;
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        if !head.is_branch() {
            return Ok(None);
        }
        Ok(head.shorthand().map(str::to_string))
    }

    fn switch_branch(&self, branch: &str) -> Result<()> {
        debug!("GitBackend::switch_branch branch={}", branch);
        let repo = self.repo()?;
        Self::switch_to(&repo, branch)
    }

    fn diff(&self, from: &str, to: &str) -> Result<Vec<FileDiff>> {
        let repo = self.repo()?;
        let old_tree = repo.revparse_single(from)?.peel_to_commit()?.tree()?;
        let new_tree = repo.revparse_single(to)?.peel_to_commit()?.tree()?;
        let diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)?;

        let mut files = Vec::new();
        for idx in 0..diff.deltas().len() {
            let Some(delta) = diff.get_delta(idx) else {
                continue;
            };
            let path = delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();

            let mut ranges = Vec::new();
            if let Some(patch) = git2::Patch::from_diff(&diff, idx)? {
                for h in 0..patch.num_hunks() {
                    let (hunk, _) = patch.hunk(h)?;
                    ranges.push(LineRange::new(hunk.old_start(), hunk.old_lines()));
                }
            }
            files.push(FileDiff { path, ranges });
        }
        Ok(files)
    }

    fn read_file(&self, rev: &str, path: &str) -> Result<Option<String>> {
        let repo = self.repo()?;
        let tree = repo.revparse_single(rev)?.peel_to_commit()?.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::read_blob(&repo, Some(entry.id()))
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        let repo = self.repo()?;
        let a = repo.revparse_single(a)?.peel_to_commit()?.id();
        let b = repo.revparse_single(b)?.peel_to_commit()?.id();
        let result = match repo.merge_base(a, b) {
            Ok(oid) => Ok(Some(oid.to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        };
        result
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let repo = self.repo()?;
        let a = repo.revparse_single(ancestor)?.peel_to_commit()?.id();
        let d = repo.revparse_single(descendant)?.peel_to_commit()?.id();
        Ok(a == d || repo.graph_descendant_of(d, a)?)
    }

    fn merge(&self, request: &MergeRequest, resolutions: &[ResolvedFile]) -> Result<MergeOutcome> {
        debug!(
            "GitBackend::merge {} -> {} ({})",
            request.source, request.target, request.strategy
        );
        let repo = self.repo()?;
        let target = Self::branch_commit(&repo, &request.target)?;
        let source = Self::branch_commit(&repo, &request.source)?;

        if target.id() == source.id() || repo.graph_descendant_of(target.id(), source.id())? {
            return Ok(MergeOutcome::AlreadyIntegrated {
                commit: target.id().to_string(),
            });
        }

        match request.strategy {
            MergeStrategy::Merge | MergeStrategy::Squash => {
                Self::merge_two_way(&repo, request, &target, &source, resolutions)
            }
            MergeStrategy::Rebase => Self::replay(&repo, request, &target, &source, resolutions),
        }
    }

    fn integrated_onto(&self, request: &MergeRequest, base_tip: &str) -> Result<bool> {
        let repo = self.repo()?;
        let base = Oid::from_str(base_tip)?;
        let target = Self::branch_commit(&repo, &request.target)?;
        let Some(above) = Self::commits_above(target, base)? else {
            return Ok(false);
        };
        let Some(first) = above.first() else {
            return Ok(false);
        };

        // Squash commits, and concluded halts of a replay, carry the request
        // message on a single-parent commit right above the base.
        if first.parent_count() == 1 && first.message() == Some(request.message.as_str()) {
            return Ok(true);
        }
        if request.strategy != MergeStrategy::Rebase {
            return Ok(false);
        }

        let source = Self::branch_commit(&repo, &request.source)?;
        let mut walk = repo.revwalk()?;
        walk.push(source.id())?;
        walk.hide(base)?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
        let mut originals = Vec::new();
        for oid in walk {
            originals.push(repo.find_commit(oid?)?);
        }
        if originals.is_empty() || originals.len() > above.len() {
            return Ok(false);
        }
        let matches = originals
            .iter()
            .zip(&above)
            .all(|(original, replayed)| Self::same_origin(original, replayed));
        Ok(matches)
    }

    fn stage_pending_merge(
        &self,
        request: &MergeRequest,
        resolutions: &[ResolvedFile],
    ) -> Result<Vec<String>> {
        debug!(
            "GitBackend::stage_pending_merge {} -> {}",
            request.source, request.target
        );
        let repo = self.repo()?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| Error::InvalidRequest("repository has no working directory".into()))?
            .to_path_buf();

        if Self::has_tracked_changes(&repo)? {
            return Err(Error::InvalidRequest(
                "main checkout has uncommitted changes; refusing to stage a merge over them".into(),
            ));
        }
        Self::switch_to(&repo, &request.target)?;

        let source = Self::branch_commit(&repo, &request.source)?;
        let annotated = repo.find_annotated_commit(source.id())?;
        let mut checkout = CheckoutBuilder::new();
        checkout.allow_conflicts(true).conflict_style_merge(true);
        repo.merge(&[&annotated], None, Some(&mut checkout))?;

        let mut index = repo.index()?;
        let conflicted = Self::conflicted_paths(&index)?;
        for resolution in resolutions {
            if !conflicted.contains(&resolution.path) {
                continue;
            }
            let file = workdir.join(&resolution.path);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&file, &resolution.content)?;
            index.add_path(Path::new(&resolution.path))?;
        }
        index.write()?;

        Self::conflicted_paths(&index)
    }

    fn merge_in_progress(&self) -> Result<bool> {
        Ok(self.repo()?.state() == RepositoryState::Merge)
    }

    fn unresolved_conflicts(&self) -> Result<Vec<String>> {
        let repo = self.repo()?;
        if repo.is_bare() {
            return Ok(Vec::new());
        }
        Self::conflicted_paths(&repo.index()?)
    }

    fn conclude_pending_merge(&self, request: &MergeRequest) -> Result<String> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        let remaining = Self::conflicted_paths(&index)?;
        if !remaining.is_empty() {
            return Err(Error::UnresolvedBackendConflict { files: remaining });
        }

        let target = Self::branch_commit(&repo, &request.target)?;
        let source = Self::branch_commit(&repo, &request.source)?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let sig = Self::signature(&repo)?;
        let parents: Vec<&Commit<'_>> = match request.strategy {
            MergeStrategy::Merge => vec![&target, &source],
            _ => vec![&target],
        };
        let commit = repo.commit(None, &sig, &sig, &request.message, &tree, &parents)?;
        repo.cleanup_state()?;
        Self::advance_branch(&repo, &request.target, target.id(), commit)?;
        debug!("Concluded pending merge of {} as {}", request.source, commit);
        Ok(commit.to_string())
    }

    fn abort_pending_merge(&self) -> Result<()> {
        let repo = self.repo()?;
        if repo.state() == RepositoryState::Clean {
            return Ok(());
        }
        let head = repo.head()?.peel_to_commit()?;
        repo.reset(head.as_object(), ResetType::Hard, None)?;
        repo.cleanup_state()?;
        debug!("Abandoned in-flight merge, reset to {}", head.id());
        Ok(())
    }

    fn behind_upstream(&self, branch: &str) -> Result<Option<usize>> {
        let repo = self.repo()?;
        let local = repo.find_branch(branch, BranchType::Local)?;
        let upstream = match local.upstream() {
            Ok(upstream) => upstream,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let local_oid = local.get().peel_to_commit()?.id();
        let upstream_oid = upstream.get().peel_to_commit()?.id();
        let (_ahead, behind) = repo.graph_ahead_behind(local_oid, upstream_oid)?;
        Ok(Some(behind))
    }

    fn push(&self, branch: &str, remote: &str) -> Result<()> {
        debug!("GitBackend::push branch={} remote={}", branch, remote);
        let repo = self.repo()?;
        let mut remote = repo.find_remote(remote)?;
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        remote.push(&[refspec.as_str()], None)?;
        Ok(())
    }

    fn delete_branch(&self, branch: &str) -> Result<()> {
        debug!("GitBackend::delete_branch branch={}", branch);
        let repo = self.repo()?;
        match repo.find_branch(branch, BranchType::Local) {
            Ok(mut branch_ref) => branch_ref.delete()?,
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!("Branch '{}' not found (already deleted?)", branch);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
