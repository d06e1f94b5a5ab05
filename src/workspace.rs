//! One isolated checkout per work package.
//!
//! A thin layer over [`VcsBackend`]: it decides branch names and paths and
//! turns backend failures into the workspace error codes. The feature record
//! is the registry of live workspaces; this module never writes it.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::backend::{VcsBackend, WorkspaceStatus};
use crate::config::RetryConfig;
use crate::core::{Feature, WorkPackageId, Workspace};
use crate::util::with_backoff;
use crate::{Error, Result};

/// Existence and cleanliness of a work package checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceReport {
    pub wp: WorkPackageId,
    pub path: PathBuf,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkspaceStatus>,
}

#[derive(Clone)]
pub struct WorkspaceManager {
    backend: Arc<dyn VcsBackend>,
    root: PathBuf,
    retry: RetryConfig,
}

impl WorkspaceManager {
    pub fn new(backend: Arc<dyn VcsBackend>, root: PathBuf, retry: RetryConfig) -> Self {
        Self {
            backend,
            root,
            retry,
        }
    }

    /// Where the checkout for `wp` lives, whether or not it exists.
    pub fn path_for(&self, feature: &Feature, wp: &WorkPackageId) -> PathBuf {
        match feature.workspaces.get(wp) {
            Some(ws) => ws.path.clone(),
            None => self.root.join(feature.branch_for(wp)),
        }
    }

    pub fn is_live(&self, feature: &Feature, wp: &WorkPackageId) -> bool {
        feature
            .workspaces
            .get(wp)
            .is_some_and(|ws| self.backend.workspace_exists(&ws.path))
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        with_backoff(&self.retry, "branch_exists", || {
            self.backend.branch_exists(branch)
        })
    }

    /// Create a branch rooted at `base` and check it out.
    ///
    /// # Errors
    /// - `WorkspaceExists` if the work package already has a live checkout
    /// - `WorkspaceCreateFailed` if `base` does not exist or the checkout fails
    pub fn create(&self, feature: &Feature, wp: &WorkPackageId, base: &str) -> Result<Workspace> {
        let path = self.path_for(feature, wp);
        if self.is_live(feature, wp) || self.backend.workspace_exists(&path) {
            return Err(Error::WorkspaceExists {
                wp: wp.clone(),
                path: path.display().to_string(),
            });
        }

        let create_failed = |reason: String| Error::WorkspaceCreateFailed {
            wp: wp.clone(),
            reason,
        };

        let base_commit = with_backoff(&self.retry, "resolve", || self.backend.resolve(base))?
            .ok_or_else(|| create_failed(format!("base ref '{}' does not exist", base)))?;

        let branch = feature.branch_for(wp);
        let base_commit = if self.branch_exists(&branch)? {
            // A branch survives a removed checkout; pick it back up.
            debug!("Reusing existing branch {}", branch);
            with_backoff(&self.retry, "merge_base", || {
                self.backend.merge_base(&branch, base)
            })?
            .unwrap_or(base_commit)
        } else {
            with_backoff(&self.retry, "create_branch", || {
                self.backend.create_branch(&branch, &base_commit)
            })
            .map_err(|e| create_failed(e.to_string()))?
        };

        with_backoff(&self.retry, "checkout", || {
            self.backend.checkout(&branch, &path)
        })
        .map_err(|e| create_failed(e.to_string()))?;

        info!(
            "Created workspace for {} at {} (base {})",
            wp,
            path.display(),
            base
        );
        Ok(Workspace {
            wp: wp.clone(),
            branch,
            base_ref: base.to_string(),
            base_commit,
            path,
            created_at: Utc::now(),
        })
    }

    /// Remove the checkout for `wp`. Removing an absent one is a no-op.
    pub fn remove(&self, feature: &Feature, wp: &WorkPackageId) -> Result<()> {
        let path = self.path_for(feature, wp);
        debug!("WorkspaceManager::remove wp={} path={}", wp, path.display());
        with_backoff(&self.retry, "remove_workspace", || {
            self.backend.remove_workspace(&path)
        })
    }

    pub fn status(&self, feature: &Feature, wp: &WorkPackageId) -> Result<WorkspaceReport> {
        let path = self.path_for(feature, wp);
        let exists = feature.workspaces.contains_key(wp) && self.backend.workspace_exists(&path);
        let status = if exists {
            Some(with_backoff(&self.retry, "status", || {
                self.backend.status(&path)
            })?)
        } else {
            None
        };
        Ok(WorkspaceReport {
            wp: wp.clone(),
            path,
            exists,
            status,
        })
    }
}
