//! Lifecycle engine: the only code that moves a work package between lanes.
//!
//! Every mutation goes through [`update_feature`], so validation always runs
//! against the freshly loaded record and a lost race is retried instead of
//! overwriting someone else's history.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{
    Acceptance, DependencyGraph, Feature, Lane, ReviewStatus, WorkPackage, WorkPackageId,
    Workspace,
};
use crate::state::{require_feature, update_feature, StateStore};
use crate::workspace::WorkspaceManager;
use crate::{Error, Result};

/// Result of `start_implementation`.
#[derive(Debug, Clone, Serialize)]
pub struct Claim {
    pub wp: WorkPackageId,
    pub assignee: String,
    /// `false` when the caller already held the claim.
    pub newly_claimed: bool,
    pub workspace: Workspace,
}

pub struct LifecycleEngine {
    store: Arc<dyn StateStore>,
    workspaces: WorkspaceManager,
    cas_retries: u32,
}

fn check_version(wp: &WorkPackage, expected: Option<u64>) -> Result<()> {
    match expected {
        Some(v) if v != wp.version => Err(Error::VersionConflict {
            subject: wp.id.to_string(),
            expected: v,
            actual: wp.version,
        }),
        _ => Ok(()),
    }
}

fn rejected(wp: &WorkPackage, to: Lane, reason: impl Into<String>) -> Error {
    Error::TransitionRejected {
        wp: wp.id.clone(),
        from: wp.lane(),
        to,
        reason: reason.into(),
    }
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn StateStore>, workspaces: WorkspaceManager, cas_retries: u32) -> Self {
        Self {
            store,
            workspaces,
            cas_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Validate the dependency graph and store a new feature.
    pub fn register_feature(&self, feature: Feature) -> Result<Feature> {
        DependencyGraph::build_for(&feature)?;
        if feature.work_packages.iter().any(|wp| !wp.history().is_empty()) {
            return Err(Error::InvalidRequest(
                "work packages must be registered in lane planned".into(),
            ));
        }
        self.store.create_feature(&feature)
    }

    pub fn feature_state(&self, slug: &str) -> Result<Feature> {
        require_feature(self.store.as_ref(), slug)
    }

    pub fn list_ready(&self, slug: &str) -> Result<Vec<WorkPackageId>> {
        let feature = self.feature_state(slug)?;
        Ok(DependencyGraph::build_for(&feature)?.ready(&feature))
    }

    /// Pick the ref a new workspace branches from.
    ///
    /// One dependency: its branch, if still live. Several: the live branch
    /// of the dependency that comes last in merge order. Otherwise the
    /// target branch.
    fn base_for(&self, feature: &Feature, graph: &DependencyGraph, wp: &WorkPackageId) -> String {
        let deps = graph.dependencies_of(wp);
        let order = graph.topological_order();
        order
            .iter()
            .rev()
            .filter(|id| deps.contains(id))
            .filter_map(|dep| feature.workspaces.get(dep))
            .map(|ws| ws.branch.clone())
            .find(|branch| self.workspaces.branch_exists(branch).unwrap_or(false))
            .unwrap_or_else(|| feature.target_branch.clone())
    }

    /// Claim a planned work package for `actor` and give it a workspace.
    ///
    /// Idempotent for the actor already holding the claim: the existing
    /// workspace is returned, or recreated if it went missing. If a fresh
    /// claim cannot get its workspace, the claim is released again so the
    /// work package stays available.
    pub fn start_implementation(
        &self,
        slug: &str,
        wp_id: &WorkPackageId,
        actor: &str,
        expected_version: Option<u64>,
    ) -> Result<Claim> {
        debug!("start_implementation {}/{} by {}", slug, wp_id, actor);
        let snapshot = self.feature_state(slug)?;
        let graph = DependencyGraph::build_for(&snapshot)?;
        let base = self.base_for(&snapshot, &graph, wp_id);

        let (feature, newly_claimed) = update_feature(self.store.as_ref(), slug, self.cas_retries, |f| {
            apply_claim(f, &graph, wp_id, actor, expected_version)
        })?;
        if newly_claimed {
            info!("{} claimed {}/{}", actor, slug, wp_id);
        }

        let workspace = match self.ensure_workspace(&feature, wp_id, &base) {
            Ok(workspace) => workspace,
            Err(e) if newly_claimed => {
                warn!("Releasing {}/{}: workspace setup failed: {}", slug, wp_id, e);
                if let Err(release) = self.release_claim(slug, wp_id, actor, &e) {
                    warn!("Could not release {}/{}: {}", slug, wp_id, release);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        Ok(Claim {
            wp: wp_id.clone(),
            assignee: actor.to_string(),
            newly_claimed,
            workspace,
        })
    }

    fn release_claim(&self, slug: &str, wp_id: &WorkPackageId, actor: &str, cause: &Error) -> Result<()> {
        let note = format!("claim released: {}", cause);
        update_feature(self.store.as_ref(), slug, self.cas_retries, |f| {
            let wp = f.wp_mut(wp_id)?;
            if wp.lane() == Lane::Doing && wp.assignee.as_deref() == Some(actor) {
                wp.release_claim(actor, Some(note.clone()))?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn ensure_workspace(
        &self,
        feature: &Feature,
        wp_id: &WorkPackageId,
        base: &str,
    ) -> Result<Workspace> {
        if self.workspaces.is_live(feature, wp_id) {
            if let Some(ws) = feature.workspaces.get(wp_id) {
                debug!("Reusing workspace {}", ws.path.display());
                return Ok(ws.clone());
            }
        }

        let workspace = self.workspaces.create(feature, wp_id, base)?;
        let record = workspace.clone();
        update_feature(self.store.as_ref(), &feature.slug, self.cas_retries, |f| {
            f.workspaces.insert(wp_id.clone(), record.clone());
            Ok(())
        })?;
        Ok(workspace)
    }

    /// `doing -> for_review`, by the assignee only.
    pub fn submit_for_review(
        &self,
        slug: &str,
        wp_id: &WorkPackageId,
        actor: &str,
        note: Option<String>,
        expected_version: Option<u64>,
    ) -> Result<WorkPackage> {
        let (feature, _) = update_feature(self.store.as_ref(), slug, self.cas_retries, |f| {
            let wp = f.wp_mut(wp_id)?;
            check_version(wp, expected_version)?;
            if wp.lane() != Lane::Doing {
                return Err(rejected(wp, Lane::ForReview, "work package is not in doing"));
            }
            match wp.assignee.as_deref() {
                Some(owner) if owner == actor => {}
                owner => {
                    return Err(Error::WpAlreadyClaimed {
                        wp: wp_id.clone(),
                        owner: owner.unwrap_or_default().to_string(),
                    })
                }
            }
            wp.record_transition(Lane::ForReview, actor, note.clone())?;
            wp.review_status = ReviewStatus::NotReviewed;
            Ok(())
        })?;
        info!("{}/{} submitted for review by {}", slug, wp_id, actor);
        feature.wp(wp_id).cloned()
    }

    /// Take a `for_review` work package into review. No lane change.
    pub fn start_review(
        &self,
        slug: &str,
        wp_id: &WorkPackageId,
        reviewer: &str,
        expected_version: Option<u64>,
    ) -> Result<WorkPackage> {
        let (feature, _) = update_feature(self.store.as_ref(), slug, self.cas_retries, |f| {
            let wp = f.wp_mut(wp_id)?;
            check_version(wp, expected_version)?;
            if wp.lane() != Lane::ForReview {
                return Err(rejected(wp, Lane::ForReview, "work package is not awaiting review"));
            }
            match &wp.review_status {
                ReviewStatus::InReview { reviewer: holder } if holder != reviewer => {
                    Err(Error::WpAlreadyClaimed {
                        wp: wp_id.clone(),
                        owner: holder.clone(),
                    })
                }
                ReviewStatus::InReview { .. } => Ok(()),
                _ => {
                    wp.review_status = ReviewStatus::InReview {
                        reviewer: reviewer.to_string(),
                    };
                    wp.touch();
                    Ok(())
                }
            }
        })?;
        debug!("{} reviewing {}/{}", reviewer, slug, wp_id);
        feature.wp(wp_id).cloned()
    }

    fn ensure_reviewer(wp: &WorkPackage, reviewer: &str) -> Result<()> {
        match &wp.review_status {
            ReviewStatus::InReview { reviewer: holder } if holder != reviewer => {
                Err(Error::WpAlreadyClaimed {
                    wp: wp.id.clone(),
                    owner: holder.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// `for_review -> done`.
    pub fn approve(
        &self,
        slug: &str,
        wp_id: &WorkPackageId,
        reviewer: &str,
        note: Option<String>,
        expected_version: Option<u64>,
    ) -> Result<WorkPackage> {
        let (feature, _) = update_feature(self.store.as_ref(), slug, self.cas_retries, |f| {
            let wp = f.wp_mut(wp_id)?;
            check_version(wp, expected_version)?;
            if wp.lane() != Lane::ForReview {
                return Err(rejected(wp, Lane::Done, "work package is not awaiting review"));
            }
            Self::ensure_reviewer(wp, reviewer)?;
            wp.record_transition(Lane::Done, reviewer, note.clone())?;
            wp.review_status = ReviewStatus::Approved;
            Ok(())
        })?;
        info!("{}/{} approved by {}", slug, wp_id, reviewer);
        feature.wp(wp_id).cloned()
    }

    /// `for_review -> planned`, archiving the feedback and keeping only a
    /// reference to it on the work package.
    pub fn request_changes(
        &self,
        slug: &str,
        wp_id: &WorkPackageId,
        reviewer: &str,
        feedback: &str,
        expected_version: Option<u64>,
    ) -> Result<WorkPackage> {
        if feedback.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "requesting changes requires feedback".into(),
            ));
        }

        // Cheap pre-check so rejected requests archive nothing.
        let snapshot = self.feature_state(slug)?;
        let current = snapshot.wp(wp_id)?;
        check_version(current, expected_version)?;
        if current.lane() != Lane::ForReview {
            return Err(rejected(current, Lane::Planned, "work package is not awaiting review"));
        }
        Self::ensure_reviewer(current, reviewer)?;

        let name = format!("{}-{}.md", wp_id, Uuid::new_v4());
        let feedback_ref = self.store.archive_blob(slug, &name, feedback.as_bytes())?;

        let (feature, _) = update_feature(self.store.as_ref(), slug, self.cas_retries, |f| {
            f.feedback_count += 1;
            let wp = f.wp_mut(wp_id)?;
            check_version(wp, expected_version)?;
            if wp.lane() != Lane::ForReview {
                return Err(rejected(wp, Lane::Planned, "work package is not awaiting review"));
            }
            Self::ensure_reviewer(wp, reviewer)?;
            wp.record_transition(
                Lane::Planned,
                reviewer,
                Some(format!("changes requested ({})", feedback_ref)),
            )?;
            wp.review_status = ReviewStatus::ChangesRequested;
            wp.review_feedback_ref = Some(feedback_ref.clone());
            wp.assignee = None;
            Ok(())
        })?;
        info!("{}/{} sent back by {}", slug, wp_id, reviewer);
        feature.wp(wp_id).cloned()
    }

    /// Generic lane move used by the `transition` command.
    #[allow(clippy::too_many_arguments)]
    pub fn transition(
        &self,
        slug: &str,
        wp_id: &WorkPackageId,
        to: Lane,
        actor: &str,
        note: Option<String>,
        feedback: Option<&str>,
        expected_version: Option<u64>,
    ) -> Result<WorkPackage> {
        match to {
            Lane::ForReview => self.submit_for_review(slug, wp_id, actor, note, expected_version),
            Lane::Done => self.approve(slug, wp_id, actor, note, expected_version),
            Lane::Planned => match feedback {
                Some(text) => self.request_changes(slug, wp_id, actor, text, expected_version),
                None => {
                    let feature = self.feature_state(slug)?;
                    let wp = feature.wp(wp_id)?;
                    Err(rejected(wp, Lane::Planned, "feedback is required to request changes"))
                }
            },
            Lane::Doing => {
                let feature = self.feature_state(slug)?;
                let wp = feature.wp(wp_id)?;
                Err(rejected(wp, Lane::Doing, "use start-implementation to claim work"))
            }
        }
    }

    /// Record acceptance once every work package is done.
    pub fn accept_feature(&self, slug: &str, actor: &str) -> Result<Feature> {
        let (feature, _) = update_feature(self.store.as_ref(), slug, self.cas_retries, |f| {
            let pending = f.non_terminal();
            if !pending.is_empty() {
                return Err(Error::FeatureNotReady {
                    feature: f.slug.clone(),
                    pending,
                });
            }
            if f.accepted.is_none() {
                f.accepted = Some(Acceptance {
                    by: actor.to_string(),
                    at: Utc::now(),
                });
            }
            Ok(())
        })?;
        info!("Feature {} accepted by {}", slug, actor);
        Ok(feature)
    }

    /// Explicit archival. Refused while a merge is in progress.
    pub fn archive_feature(&self, slug: &str) -> Result<()> {
        self.feature_state(slug)?;
        if self.store.load_merge_state(slug)?.is_some() {
            return Err(Error::MergeAlreadyInProgress {
                feature: slug.to_string(),
            });
        }
        self.store.archive_feature(slug)
    }
}

/// Record `actor`'s claim on `wp_id`. Returns false when the actor already
/// holds it.
fn apply_claim(
    f: &mut Feature,
    graph: &DependencyGraph,
    wp_id: &WorkPackageId,
    actor: &str,
    expected_version: Option<u64>,
) -> Result<bool> {
    let pending = graph.unsatisfied(f, wp_id);
    let wp = f.wp_mut(wp_id)?;
    check_version(wp, expected_version)?;
    match wp.lane() {
        Lane::Doing => match wp.assignee.as_deref() {
            Some(owner) if owner == actor => Ok(false),
            owner => Err(Error::WpAlreadyClaimed {
                wp: wp_id.clone(),
                owner: owner.unwrap_or_default().to_string(),
            }),
        },
        Lane::Planned => {
            if !pending.is_empty() {
                return Err(Error::DependencyNotSatisfied {
                    wp: wp_id.clone(),
                    pending,
                });
            }
            wp.record_transition(Lane::Doing, actor, None)?;
            wp.assignee = Some(actor.to_string());
            wp.review_status = ReviewStatus::NotReviewed;
            Ok(true)
        }
        _ => match wp.assignee.as_deref() {
            Some(owner) if owner != actor => Err(Error::WpAlreadyClaimed {
                wp: wp_id.clone(),
                owner: owner.to_string(),
            }),
            _ => Err(rejected(wp, Lane::Doing, "work package is not planned")),
        },
    }
}
