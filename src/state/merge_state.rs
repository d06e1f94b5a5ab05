use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::MergeStrategy;
use crate::core::WorkPackageId;

/// Cleanup and publishing choices fixed when a merge starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOptions {
    pub push: bool,
    pub remote: String,
    pub remove_workspaces: bool,
    pub delete_branches: bool,
}

/// Durable record of an in-progress or interrupted feature merge.
///
/// At most one exists per feature; its presence is what makes a merge
/// "in progress".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeState {
    pub feature_slug: String,
    pub target_branch: String,
    pub wp_order: Vec<WorkPackageId>,
    #[serde(default)]
    pub completed_wps: Vec<WorkPackageId>,
    #[serde(default)]
    pub current_wp: Option<WorkPackageId>,
    #[serde(default)]
    pub has_pending_conflicts: bool,
    /// Manual conflict paths awaiting resolution when halted.
    #[serde(default)]
    pub pending_files: Vec<String>,
    pub strategy: MergeStrategy,
    pub options: MergeOptions,
    /// Target tip observed at the last checkpoint.
    #[serde(default)]
    pub target_tip: Option<String>,
    /// Branch the main checkout had out before a halt switched it to the
    /// target. Restored on abort and once the staged merge is concluded.
    #[serde(default)]
    pub original_head: Option<String>,
    pub run_id: Uuid,
    /// Bumped by the store on every save.
    #[serde(default)]
    pub revision: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MergeState {
    pub fn new(
        feature_slug: &str,
        target_branch: &str,
        wp_order: Vec<WorkPackageId>,
        strategy: MergeStrategy,
        options: MergeOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            feature_slug: feature_slug.to_string(),
            target_branch: target_branch.to_string(),
            wp_order,
            completed_wps: Vec::new(),
            current_wp: None,
            has_pending_conflicts: false,
            pending_files: Vec::new(),
            strategy,
            options,
            target_tip: None,
            original_head: None,
            run_id: Uuid::new_v4(),
            revision: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// Work packages not yet integrated, in merge order.
    pub fn remaining(&self) -> Vec<WorkPackageId> {
        self.wp_order
            .iter()
            .filter(|wp| !self.completed_wps.contains(wp))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining().is_empty()
    }

    /// Checkpoint taken right before integrating `wp`.
    pub fn begin(&mut self, wp: &WorkPackageId, target_tip: Option<String>) {
        self.current_wp = Some(wp.clone());
        self.target_tip = target_tip;
        self.has_pending_conflicts = false;
        self.pending_files.clear();
        self.updated_at = Utc::now();
    }

    /// Checkpoint taken once `wp` is part of the target branch.
    pub fn complete(&mut self, wp: &WorkPackageId, target_tip: Option<String>) {
        if !self.completed_wps.contains(wp) {
            self.completed_wps.push(wp.clone());
        }
        self.current_wp = None;
        self.target_tip = target_tip;
        self.has_pending_conflicts = false;
        self.pending_files.clear();
        self.updated_at = Utc::now();
    }

    /// Checkpoint taken when `wp` stops on manual conflicts. The first
    /// recorded `original_head` wins across repeated halts.
    pub fn halt(&mut self, files: Vec<String>, original_head: Option<String>) {
        if self.original_head.is_none() {
            self.original_head = original_head;
        }
        self.has_pending_conflicts = true;
        self.pending_files = files;
        self.updated_at = Utc::now();
    }
}
