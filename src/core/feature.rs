//! Feature record: the unit of persistence for work packages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::work_package::{Lane, WorkPackage, WorkPackageId};
use crate::error::{Error, Result};

/// An isolated, branch-backed checkout for one work package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub wp: WorkPackageId,
    pub branch: String,
    /// The ref the branch was created from (parent WP branch or target).
    pub base_ref: String,
    /// Commit the branch was rooted at; diffs for forecasting start here.
    pub base_commit: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acceptance {
    pub by: String,
    pub at: DateTime<Utc>,
}

/// A feature and every work package it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub slug: String,
    pub mission_type: String,
    pub target_branch: String,
    pub work_packages: Vec<WorkPackage>,
    #[serde(default)]
    pub workspaces: BTreeMap<WorkPackageId, Workspace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<Acceptance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    /// Review feedback payloads archived so far.
    #[serde(default)]
    pub feedback_count: u64,
    /// Record version; bumped by the store on every successful save.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl Feature {
    pub fn new(
        slug: impl Into<String>,
        mission_type: impl Into<String>,
        target_branch: impl Into<String>,
        work_packages: Vec<WorkPackage>,
    ) -> Self {
        Self {
            slug: slug.into(),
            mission_type: mission_type.into(),
            target_branch: target_branch.into(),
            work_packages,
            workspaces: BTreeMap::new(),
            accepted: None,
            merged_at: None,
            feedback_count: 0,
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn wp(&self, id: &WorkPackageId) -> Result<&WorkPackage> {
        self.work_packages
            .iter()
            .find(|wp| &wp.id == id)
            .ok_or_else(|| Error::WorkPackageNotFound {
                feature: self.slug.clone(),
                wp: id.clone(),
            })
    }

    pub fn wp_mut(&mut self, id: &WorkPackageId) -> Result<&mut WorkPackage> {
        let slug = self.slug.clone();
        self.work_packages
            .iter_mut()
            .find(|wp| &wp.id == id)
            .ok_or(Error::WorkPackageNotFound {
                feature: slug,
                wp: id.clone(),
            })
    }

    /// Branch name used for a work package's workspace.
    pub fn branch_for(&self, wp: &WorkPackageId) -> String {
        format!("{}-{}", self.slug, wp)
    }

    /// Work packages not yet in a terminal lane, in id order.
    pub fn non_terminal(&self) -> Vec<WorkPackageId> {
        let mut pending: Vec<WorkPackageId> = self
            .work_packages
            .iter()
            .filter(|wp| !wp.lane().is_terminal())
            .map(|wp| wp.id.clone())
            .collect();
        pending.sort();
        pending
    }

    pub fn lane_of(&self, id: &WorkPackageId) -> Option<Lane> {
        self.work_packages
            .iter()
            .find(|wp| &wp.id == id)
            .map(WorkPackage::lane)
    }
}
