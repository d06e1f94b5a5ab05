//! Version-control backend interface.
//!
//! The orchestration core only needs a narrow set of operations from the
//! version-control system. `GitBackend` in [`crate::git`] implements them
//! with libgit2; tests and alternative backends implement the same trait.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How a work package branch is folded into the target branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Merge commit with the WP branch as second parent.
    #[default]
    Merge,
    /// One single-parent commit carrying the WP's combined changes.
    Squash,
    /// Linear replay of each WP commit onto the target.
    Rebase,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::Merge => write!(f, "merge"),
            MergeStrategy::Squash => write!(f, "squash"),
            MergeStrategy::Rebase => write!(f, "rebase"),
        }
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "merge" => Ok(MergeStrategy::Merge),
            "squash" => Ok(MergeStrategy::Squash),
            "rebase" => Ok(MergeStrategy::Rebase),
            other => Err(Error::InvalidRequest(format!("unknown strategy '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Clean,
    Dirty,
}

/// A contiguous block of lines, 1-based, on the "from" side of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub len: u32,
}

impl LineRange {
    pub fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    /// Pure insertions have `len == 0`; they still occupy the line they
    /// were inserted at for overlap purposes.
    fn end(&self) -> u32 {
        self.start + self.len.max(1)
    }

    pub fn overlaps(&self, other: &LineRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// A file changed between two revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub ranges: Vec<LineRange>,
}

/// A file left conflicted by a merge attempt.
///
/// Carries the content of both sides plus the common ancestor, and the
/// blob ids that identify this particular conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictFile {
    pub path: String,
    pub ours: Option<String>,
    pub theirs: Option<String>,
    pub base: Option<String>,
    pub ours_id: Option<String>,
    pub theirs_id: Option<String>,
}

/// Replacement content for a conflicted file.
///
/// A resolution applies only to the conflict it was computed for: same path
/// and same blob ids on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: String,
    pub content: String,
    pub ours_id: Option<String>,
    pub theirs_id: Option<String>,
}

impl ResolvedFile {
    pub fn for_conflict(conflict: &ConflictFile, content: String) -> Self {
        Self {
            path: conflict.path.clone(),
            content,
            ours_id: conflict.ours_id.clone(),
            theirs_id: conflict.theirs_id.clone(),
        }
    }

    pub fn matches(&self, path: &str, ours_id: Option<&str>, theirs_id: Option<&str>) -> bool {
        self.path == path
            && self.ours_id.as_deref() == ours_id
            && self.theirs_id.as_deref() == theirs_id
    }
}

/// One integration step: fold `source` into `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub target: String,
    pub source: String,
    pub strategy: MergeStrategy,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The target branch now points at `commit`.
    Merged { commit: String },
    /// The source was already contained in the target; nothing changed.
    AlreadyIntegrated { commit: String },
    /// Nothing changed; these files need resolution.
    Conflicts { files: Vec<ConflictFile> },
}

/// Operations the orchestration core needs from version control.
pub trait VcsBackend: Send + Sync {
    fn branch_exists(&self, branch: &str) -> Result<bool>;

    /// Resolve a revision to a commit id, `None` if it does not exist.
    fn resolve(&self, rev: &str) -> Result<Option<String>>;

    /// Create `name` at `base`, returning the commit it points to.
    fn create_branch(&self, name: &str, base: &str) -> Result<String>;

    /// Check out an existing branch into a new isolated directory.
    fn checkout(&self, branch: &str, path: &Path) -> Result<()>;

    fn workspace_exists(&self, path: &Path) -> bool;

    /// Remove a checkout. Removing an absent checkout is a no-op.
    fn remove_workspace(&self, path: &Path) -> Result<()>;

    /// Whether a checkout has staged, unstaged, or untracked changes.
    fn status(&self, path: &Path) -> Result<WorkspaceStatus>;

    /// Whether the main checkout carries uncommitted changes to tracked
    /// files, whichever branch it has out.
    fn main_checkout_dirty(&self) -> Result<bool>;

    /// Branch the main checkout has out, `None` when HEAD is detached.
    fn head_branch(&self) -> Result<Option<String>>;

    /// Switch the main checkout to `branch` without overwriting local
    /// changes.
    fn switch_branch(&self, branch: &str) -> Result<()>;

    /// Files changed from `from` to `to`, with touched line ranges on `from`.
    fn diff(&self, from: &str, to: &str) -> Result<Vec<FileDiff>>;

    fn read_file(&self, rev: &str, path: &str) -> Result<Option<String>>;

    /// Best common ancestor of two revisions, `None` for unrelated histories.
    fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>>;

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Integrate a branch. Conflicts never move the target.
    fn merge(&self, request: &MergeRequest, resolutions: &[ResolvedFile]) -> Result<MergeOutcome>;

    /// Whether the target's first-parent history above `base_tip` starts
    /// with the commit(s) that `request` would have written. Proves a
    /// squash or replay landed even though the source is not an ancestor.
    fn integrated_onto(&self, request: &MergeRequest, base_tip: &str) -> Result<bool>;

    /// Leave an in-progress merge in the main checkout for manual resolution,
    /// with `resolutions` already written and staged. Returns the paths
    /// still conflicted.
    fn stage_pending_merge(
        &self,
        request: &MergeRequest,
        resolutions: &[ResolvedFile],
    ) -> Result<Vec<String>>;

    fn merge_in_progress(&self) -> Result<bool>;

    /// Paths the backend still considers conflicted.
    fn unresolved_conflicts(&self) -> Result<Vec<String>>;

    fn has_unresolved_conflicts(&self) -> Result<bool> {
        Ok(!self.unresolved_conflicts()?.is_empty())
    }

    /// Commit a staged, fully resolved merge and advance the target.
    fn conclude_pending_merge(&self, request: &MergeRequest) -> Result<String>;

    /// Abandon any in-flight merge transaction in the main checkout.
    fn abort_pending_merge(&self) -> Result<()>;

    /// Commits `branch` is behind its upstream, `None` without an upstream.
    fn behind_upstream(&self, branch: &str) -> Result<Option<usize>>;

    fn push(&self, branch: &str, remote: &str) -> Result<()>;

    /// Delete a local branch. Deleting an absent branch is a no-op.
    fn delete_branch(&self, branch: &str) -> Result<()>;
}
