//! Merge orchestrator: folds a feature's work packages into its target
//! branch, one at a time, in dependency order.
//!
//! Progress is checkpointed to a [`MergeState`] before and after every work
//! package, so an interrupted run can always be resumed. Manual conflicts
//! halt the run with the merge staged in the main checkout; they are a
//! stopping state, not an error.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{MergeOutcome, MergeRequest, MergeStrategy, ResolvedFile, VcsBackend, WorkspaceStatus};
use crate::cleanup::{CleanupManager, CleanupReport};
use crate::config::Config;
use crate::core::{DependencyGraph, Feature, WorkPackageId};
use crate::error::{ErrorCode, PreflightIssue};
use crate::orchestration::classifier::{ConflictClassifier, ConflictForecast};
use crate::state::{require_feature, update_feature, MergeOptions, MergeState, StateStore};
use crate::util::with_backoff;
use crate::workspace::WorkspaceManager;
use crate::{Error, Result};

/// Caller overrides for one merge run. Unset fields fall back to `[merge]`
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeCommand {
    pub strategy: Option<MergeStrategy>,
    pub push: Option<bool>,
    pub keep_workspaces: bool,
    pub keep_branches: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    pub wp: WorkPackageId,
    pub source_branch: String,
    pub strategy: MergeStrategy,
}

/// Everything a merge would do, computed without touching anything.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub feature: String,
    pub target_branch: String,
    pub strategy: MergeStrategy,
    pub preflight_passed: bool,
    pub issues: Vec<PreflightIssue>,
    pub steps: Vec<PlannedStep>,
    pub forecast: Vec<ConflictForecast>,
    pub merge_in_progress: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeRun {
    Completed {
        feature: String,
        target_branch: String,
        merged: Vec<WorkPackageId>,
        target_tip: Option<String>,
        pushed: bool,
        cleanup: CleanupReport,
    },
    /// Stopped on manual conflicts; the merge of `wp` is staged in the main
    /// checkout awaiting resolution, then `resume`.
    Halted {
        feature: String,
        wp: WorkPackageId,
        conflicts: Vec<String>,
        auto_resolved: Vec<String>,
        completed: Vec<WorkPackageId>,
        remaining: Vec<WorkPackageId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbortReport {
    pub feature: String,
    /// Already on the target branch; abort does not roll these back.
    pub completed: Vec<WorkPackageId>,
    pub cancelled: Vec<WorkPackageId>,
}

/// Result of one integration attempt.
enum Step {
    Integrated(String),
    Halt {
        manual: Vec<String>,
        resolved: Vec<ResolvedFile>,
    },
}

/// A halted rebase is staged as a squash: one commit per work package.
fn staging_strategy(strategy: MergeStrategy) -> MergeStrategy {
    match strategy {
        MergeStrategy::Rebase => MergeStrategy::Squash,
        other => other,
    }
}

fn source_branch(feature: &Feature, wp: &WorkPackageId) -> String {
    match feature.workspaces.get(wp) {
        Some(ws) => ws.branch.clone(),
        None => feature.branch_for(wp),
    }
}

pub struct MergeOrchestrator {
    store: Arc<dyn StateStore>,
    backend: Arc<dyn VcsBackend>,
    workspaces: WorkspaceManager,
    config: Config,
}

impl MergeOrchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        backend: Arc<dyn VcsBackend>,
        workspaces: WorkspaceManager,
        config: Config,
    ) -> Self {
        Self {
            store,
            backend,
            workspaces,
            config,
        }
    }

    fn resolve_command(&self, command: &MergeCommand) -> (MergeStrategy, MergeOptions) {
        let merge = &self.config.merge;
        let options = MergeOptions {
            push: command.push.unwrap_or(merge.push),
            remote: merge.remote.clone(),
            remove_workspaces: merge.remove_workspaces && !command.keep_workspaces,
            delete_branches: merge.delete_branches && !command.keep_branches,
        };
        (command.strategy.unwrap_or(merge.strategy), options)
    }

    /// Merge order for a feature whose work packages are all done.
    pub fn plan(&self, feature: &Feature, strategy: MergeStrategy) -> Result<Vec<WorkPackageId>> {
        let pending = feature.non_terminal();
        if !pending.is_empty() {
            return Err(Error::FeatureNotReady {
                feature: feature.slug.clone(),
                pending,
            });
        }
        let graph = DependencyGraph::build_for(feature)?;
        if strategy == MergeStrategy::Rebase && graph.has_dependencies() {
            return Err(Error::StrategyUnsupported {
                strategy: strategy.to_string(),
                reason: "linear replay across dependent work packages is not supported".into(),
            });
        }
        Ok(graph.topological_order())
    }

    /// Every reason the merge cannot start, collected in one pass.
    pub fn preflight(&self, feature: &Feature, wps: &[WorkPackageId]) -> Result<Vec<PreflightIssue>> {
        let mut issues = Vec::new();
        let retry = &self.config.retry;

        for wp in wps {
            let report = self.workspaces.status(feature, wp)?;
            if !report.exists {
                issues.push(PreflightIssue {
                    code: ErrorCode::WorkspaceNotFound,
                    wp: Some(wp.clone()),
                    message: format!("no workspace at {}", report.path.display()),
                });
            } else if report.status == Some(WorkspaceStatus::Dirty) {
                issues.push(PreflightIssue {
                    code: ErrorCode::UncommittedChanges,
                    wp: Some(wp.clone()),
                    message: format!("{} has uncommitted changes", report.path.display()),
                });
            }
        }

        if with_backoff(retry, "main_checkout_dirty", || self.backend.main_checkout_dirty())? {
            issues.push(PreflightIssue {
                code: ErrorCode::UncommittedChanges,
                wp: None,
                message: "main checkout has uncommitted changes".into(),
            });
        }

        let target = &feature.target_branch;
        let target_exists = with_backoff(retry, "branch_exists", || self.backend.branch_exists(target))?;
        if !target_exists {
            issues.push(PreflightIssue {
                code: ErrorCode::InvalidRequest,
                wp: None,
                message: format!("target branch {} does not exist", target),
            });
            return Ok(issues);
        }

        let behind = with_backoff(retry, "behind_upstream", || self.backend.behind_upstream(target))?;
        if let Some(behind) = behind.filter(|n| *n > 0) {
            issues.push(PreflightIssue {
                code: ErrorCode::TargetBehindOrigin,
                wp: None,
                message: format!("{} is {} commit(s) behind its upstream", target, behind),
            });
        }
        debug!("Pre-flight for {}: {} issue(s)", feature.slug, issues.len());
        Ok(issues)
    }

    /// Plan, pre-flight, and forecast without mutating anything.
    pub fn dry_run(&self, slug: &str, command: &MergeCommand) -> Result<DryRunReport> {
        let feature = require_feature(self.store.as_ref(), slug)?;
        let (strategy, _) = self.resolve_command(command);
        let order = self.plan(&feature, strategy)?;
        let issues = self.preflight(&feature, &order)?;
        let forecast = ConflictClassifier::new(self.backend.as_ref()).forecast(&feature, &order)?;

        let steps = order
            .iter()
            .map(|wp| PlannedStep {
                wp: wp.clone(),
                source_branch: source_branch(&feature, wp),
                strategy,
            })
            .collect();

        Ok(DryRunReport {
            feature: feature.slug.clone(),
            target_branch: feature.target_branch.clone(),
            strategy,
            preflight_passed: issues.is_empty(),
            issues,
            steps,
            forecast,
            merge_in_progress: self.store.load_merge_state(slug)?.is_some(),
        })
    }

    /// Start a merge.
    ///
    /// # Errors
    /// - `MergeAlreadyInProgress` if a merge record exists for the feature
    /// - `FeatureNotReady`, `StrategyUnsupported` from planning
    /// - `PreflightFailed` carrying every pre-flight issue
    pub fn execute(&self, slug: &str, command: &MergeCommand) -> Result<MergeRun> {
        let feature = require_feature(self.store.as_ref(), slug)?;
        if self.store.load_merge_state(slug)?.is_some() {
            return Err(Error::MergeAlreadyInProgress {
                feature: slug.to_string(),
            });
        }

        let (strategy, options) = self.resolve_command(command);
        let order = self.plan(&feature, strategy)?;
        let issues = self.preflight(&feature, &order)?;
        if !issues.is_empty() {
            warn!("Pre-flight failed for {} with {} issue(s)", slug, issues.len());
            return Err(Error::PreflightFailed { issues });
        }

        let state = self.store.create_merge_state(&MergeState::new(
            slug,
            &feature.target_branch,
            order,
            strategy,
            options,
        ))?;
        info!(
            "Merging {} into {} ({}): {:?}",
            slug, state.target_branch, strategy, state.wp_order
        );
        self.run(&feature, state)
    }

    /// Continue an interrupted or halted merge.
    ///
    /// # Errors
    /// - `NoMergeInProgress` if there is nothing to resume
    /// - `UnresolvedBackendConflict` while the backend still holds conflicts
    pub fn resume(&self, slug: &str) -> Result<MergeRun> {
        let mut state = self.require_state(slug)?;
        let feature = require_feature(self.store.as_ref(), slug)?;
        let retry = &self.config.retry;

        let unresolved = with_backoff(retry, "unresolved_conflicts", || {
            self.backend.unresolved_conflicts()
        })?;
        if !unresolved.is_empty() {
            return Err(Error::UnresolvedBackendConflict { files: unresolved });
        }

        if let (true, Some(wp)) = (state.has_pending_conflicts, state.current_wp.clone()) {
            if with_backoff(retry, "merge_in_progress", || self.backend.merge_in_progress())? {
                let mut request = self.request_for(&feature, &state, &wp);
                request.strategy = staging_strategy(state.strategy);
                let commit = with_backoff(retry, "conclude_pending_merge", || {
                    self.backend.conclude_pending_merge(&request)
                })?;
                info!("Concluded resolved merge of {} at {}", wp, commit);
                state.complete(&wp, Some(commit));
                state = self.checkpoint(&state)?;
            }
            self.restore_head(&state)?;
        }

        info!("Resuming merge of {} ({} remaining)", slug, state.remaining().len());
        self.run(&feature, state)
    }

    /// Cancel the unfinished remainder of a merge. Work packages already on
    /// the target branch stay there.
    pub fn abort(&self, slug: &str) -> Result<AbortReport> {
        let state = self.require_state(slug)?;
        let retry = &self.config.retry;

        if state.has_pending_conflicts
            && with_backoff(retry, "merge_in_progress", || self.backend.merge_in_progress())?
        {
            with_backoff(retry, "abort_pending_merge", || self.backend.abort_pending_merge())?;
        }
        self.restore_head(&state)?;
        self.store.delete_merge_state(slug)?;

        let report = AbortReport {
            feature: slug.to_string(),
            completed: state.completed_wps.clone(),
            cancelled: state.remaining(),
        };
        info!(
            "Aborted merge of {}: {} kept, {} cancelled",
            slug,
            report.completed.len(),
            report.cancelled.len()
        );
        Ok(report)
    }

    pub fn status(&self, slug: &str) -> Result<Option<MergeState>> {
        require_feature(self.store.as_ref(), slug)?;
        self.store.load_merge_state(slug)
    }

    fn require_state(&self, slug: &str) -> Result<MergeState> {
        self.store
            .load_merge_state(slug)?
            .ok_or_else(|| Error::NoMergeInProgress {
                feature: slug.to_string(),
            })
    }

    /// Persist a checkpoint. Losing the race means another process is
    /// driving the same merge.
    fn checkpoint(&self, state: &MergeState) -> Result<MergeState> {
        match self.store.save_merge_state(state, state.revision) {
            Err(Error::StaleWrite(_)) => Err(Error::MergeAlreadyInProgress {
                feature: state.feature_slug.clone(),
            }),
            other => other,
        }
    }

    fn request_for(&self, feature: &Feature, state: &MergeState, wp: &WorkPackageId) -> MergeRequest {
        MergeRequest {
            target: state.target_branch.clone(),
            source: source_branch(feature, wp),
            strategy: state.strategy,
            message: format!("Merge {} ({}) into {}", wp, feature.slug, state.target_branch),
        }
    }

    fn target_tip(&self, target: &str) -> Result<Option<String>> {
        with_backoff(&self.config.retry, "resolve", || self.backend.resolve(target))
    }

    /// Whether the work package being merged when the last run stopped made
    /// it onto the target anyway. A moved target tip alone proves nothing:
    /// unrelated commits may have landed since the checkpoint.
    fn integrated_before_interruption(&self, state: &MergeState, request: &MergeRequest) -> Result<bool> {
        let retry = &self.config.retry;
        if with_backoff(retry, "is_ancestor", || {
            self.backend.is_ancestor(&request.source, &request.target)
        })? {
            return Ok(true);
        }
        match (&state.target_tip, state.strategy) {
            (Some(base), MergeStrategy::Squash | MergeStrategy::Rebase) => {
                with_backoff(retry, "integrated_onto", || {
                    self.backend.integrated_onto(request, base)
                })
            }
            // Staged halts of a merge-strategy run conclude as real merges,
            // which the ancestry check already covers.
            _ => Ok(false),
        }
    }

    /// Put the main checkout back on the branch it had before a halt.
    fn restore_head(&self, state: &MergeState) -> Result<()> {
        let Some(branch) = state.original_head.as_deref() else {
            return Ok(());
        };
        if branch == state.target_branch {
            return Ok(());
        }
        with_backoff(&self.config.retry, "switch_branch", || self.backend.switch_branch(branch))?;
        info!("Main checkout restored to {}", branch);
        Ok(())
    }

    fn integrate(&self, request: &MergeRequest) -> Result<Step> {
        let retry = &self.config.retry;
        let outcome = with_backoff(retry, "merge", || self.backend.merge(request, &[]))?;
        let files = match outcome {
            MergeOutcome::Merged { commit } => return Ok(Step::Integrated(commit)),
            MergeOutcome::AlreadyIntegrated { commit } => {
                debug!("{} already contained in {}", request.source, request.target);
                return Ok(Step::Integrated(commit));
            }
            MergeOutcome::Conflicts { files } => files,
        };

        let live = ConflictClassifier::classify_live(&files)?;
        if !live.manual.is_empty() {
            return Ok(Step::Halt {
                manual: live.manual,
                resolved: live.resolved,
            });
        }

        info!(
            "Auto-resolving {} status file(s) for {}",
            live.resolved.len(),
            request.source
        );
        match with_backoff(retry, "merge", || self.backend.merge(request, &live.resolved))? {
            MergeOutcome::Merged { commit } | MergeOutcome::AlreadyIntegrated { commit } => {
                Ok(Step::Integrated(commit))
            }
            MergeOutcome::Conflicts { files } => Ok(Step::Halt {
                manual: files.into_iter().map(|f| f.path).collect(),
                resolved: live.resolved,
            }),
        }
    }

    /// Materialise a conflicted merge in the main checkout. Returns the paths
    /// still needing a human and the branch the checkout had out before.
    fn stage(
        &self,
        request: &MergeRequest,
        resolved: &[ResolvedFile],
    ) -> Result<(Vec<String>, Option<String>)> {
        let retry = &self.config.retry;
        if with_backoff(retry, "merge_in_progress", || self.backend.merge_in_progress())? {
            debug!("Discarding stale in-progress merge before staging");
            with_backoff(retry, "abort_pending_merge", || self.backend.abort_pending_merge())?;
        }
        let head = with_backoff(retry, "head_branch", || self.backend.head_branch())?;
        let mut staged = request.clone();
        staged.strategy = staging_strategy(request.strategy);
        let conflicts = with_backoff(retry, "stage_pending_merge", || {
            self.backend.stage_pending_merge(&staged, resolved)
        })?;
        Ok((conflicts, head))
    }

    fn run(&self, feature: &Feature, mut state: MergeState) -> Result<MergeRun> {
        for wp in state.remaining() {
            let request = self.request_for(feature, &state, &wp);
            let tip = self.target_tip(&state.target_branch)?;

            if state.current_wp.as_ref() == Some(&wp)
                && self.integrated_before_interruption(&state, &request)?
            {
                info!("{} was integrated before the interruption", wp);
                state.complete(&wp, tip);
                state = self.checkpoint(&state)?;
                continue;
            }

            state.begin(&wp, tip);
            state = self.checkpoint(&state)?;

            match self.integrate(&request)? {
                Step::Integrated(commit) => {
                    info!("Integrated {} into {} at {}", wp, state.target_branch, commit);
                    state.complete(&wp, Some(commit));
                    state = self.checkpoint(&state)?;
                }
                Step::Halt { manual, resolved } => {
                    let (staged, head) = self.stage(&request, &resolved)?;
                    let conflicts = if staged.is_empty() { manual } else { staged };
                    state.halt(conflicts.clone(), head);
                    state = self.checkpoint(&state)?;
                    warn!(
                        "Merge of {} halted on {} manual conflict(s): {}",
                        wp,
                        conflicts.len(),
                        conflicts.join(", ")
                    );
                    return Ok(MergeRun::Halted {
                        feature: feature.slug.clone(),
                        wp,
                        conflicts,
                        auto_resolved: resolved.into_iter().map(|r| r.path).collect(),
                        completed: state.completed_wps.clone(),
                        remaining: state.remaining(),
                    });
                }
            }
        }
        self.finish(feature, state)
    }

    fn finish(&self, feature: &Feature, state: MergeState) -> Result<MergeRun> {
        let slug = feature.slug.as_str();
        let retry = &self.config.retry;
        let options = &state.options;

        let pushed = if options.push {
            with_backoff(retry, "push", || {
                self.backend.push(&state.target_branch, &options.remote)
            })?;
            info!("Pushed {} to {}", state.target_branch, options.remote);
            true
        } else {
            false
        };

        let cleanup = CleanupManager::new(self.backend.clone(), self.workspaces.clone(), retry.clone())
            .cleanup_feature(feature, &state.wp_order, options);
        let removed = cleanup.removed_workspaces.clone();
        update_feature(self.store.as_ref(), slug, self.config.store.cas_retries, |f| {
            for wp in &removed {
                f.workspaces.remove(wp);
            }
            f.merged_at = Some(Utc::now());
            Ok(())
        })?;
        self.store.delete_merge_state(slug)?;

        let target_tip = self.target_tip(&state.target_branch)?;
        info!("Merge of {} into {} complete", slug, state.target_branch);
        Ok(MergeRun::Completed {
            feature: slug.to_string(),
            target_branch: state.target_branch.clone(),
            merged: state.wp_order.clone(),
            target_tip,
            pushed,
            cleanup,
        })
    }
}
