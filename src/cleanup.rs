//! Post-merge cleanup of work package checkouts and branches.
//!
//! Cleanup runs only after every work package has been integrated. A
//! failure here never undoes the merge; it is recorded in the report and
//! the remaining items are still processed.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::VcsBackend;
use crate::config::RetryConfig;
use crate::core::{Feature, WorkPackageId};
use crate::state::MergeOptions;
use crate::util::with_backoff;
use crate::workspace::WorkspaceManager;

/// What cleanup did, item by item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Work packages whose checkout was removed.
    pub removed_workspaces: Vec<WorkPackageId>,
    pub deleted_branches: Vec<String>,
    /// Checkouts and branches kept on request.
    pub retained: Vec<String>,
    /// Items that could not be cleaned up, with the reason.
    pub failed: Vec<(String, String)>,
}

impl CleanupReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: CleanupReport) {
        self.removed_workspaces.extend(other.removed_workspaces);
        self.deleted_branches.extend(other.deleted_branches);
        self.retained.extend(other.retained);
        self.failed.extend(other.failed);
    }
}

pub struct CleanupManager {
    backend: Arc<dyn VcsBackend>,
    workspaces: WorkspaceManager,
    retry: RetryConfig,
}

impl CleanupManager {
    pub fn new(backend: Arc<dyn VcsBackend>, workspaces: WorkspaceManager, retry: RetryConfig) -> Self {
        Self {
            backend,
            workspaces,
            retry,
        }
    }

    /// Remove the checkout and delete the branch of one merged work package,
    /// as far as `options` allow.
    ///
    /// The checkout goes first: a branch still checked out somewhere cannot
    /// be deleted.
    pub fn cleanup_wp(
        &self,
        feature: &Feature,
        wp: &WorkPackageId,
        options: &MergeOptions,
    ) -> CleanupReport {
        let mut report = CleanupReport::new();
        let path = self.workspaces.path_for(feature, wp);

        if options.remove_workspaces {
            match self.workspaces.remove(feature, wp) {
                Ok(()) => {
                    debug!("Removed workspace {}", path.display());
                    report.removed_workspaces.push(wp.clone());
                }
                Err(e) => {
                    warn!("Failed to remove workspace for {}: {}", wp, e);
                    report.failed.push((path.display().to_string(), e.to_string()));
                }
            }
        } else if feature.workspaces.contains_key(wp) {
            report.retained.push(path.display().to_string());
        }

        let branch = match feature.workspaces.get(wp) {
            Some(ws) => ws.branch.clone(),
            None => feature.branch_for(wp),
        };
        if options.delete_branches {
            match with_backoff(&self.retry, "delete_branch", || {
                self.backend.delete_branch(&branch)
            }) {
                Ok(()) => report.deleted_branches.push(branch),
                Err(e) => {
                    warn!("Failed to delete branch {}: {}", branch, e);
                    report.failed.push((branch, e.to_string()));
                }
            }
        } else {
            report.retained.push(branch);
        }

        report
    }

    /// Clean up every merged work package of a feature.
    pub fn cleanup_feature(
        &self,
        feature: &Feature,
        wps: &[WorkPackageId],
        options: &MergeOptions,
    ) -> CleanupReport {
        let mut report = CleanupReport::new();
        for wp in wps {
            report.merge(self.cleanup_wp(feature, wp, options));
        }
        info!(
            "Cleanup for {}: {} workspace(s) removed, {} branch(es) deleted, {} retained, {} failed",
            feature.slug,
            report.removed_workspaces.len(),
            report.deleted_branches.len(),
            report.retained.len(),
            report.failed.len()
        );
        report
    }
}
