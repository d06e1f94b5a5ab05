//! Automation API: a versioned, policy-gated request/response façade over
//! the lifecycle engine and the merge orchestrator.
//!
//! Requests are decoded, gated (contract version, then policy) and only
//! then executed. Gate failures never touch state. Execution runs on the
//! blocking pool since every command ends up in git.

pub mod policy;
pub mod request;
pub mod response;
pub mod version;

pub use policy::OrchestratorPolicy;
pub use request::{ApiRequest, Command, WorkPackageSpec};
pub use response::{ApiResponse, FeatureView, WorkPackageView};
pub use version::{API_VERSION, MIN_PROVIDER_VERSION};

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::backend::VcsBackend;
use crate::config::Config;
use crate::core::{Feature, WorkPackage};
use crate::git::GitBackend;
use crate::orchestration::{MergeCommand, MergeOrchestrator};
use crate::state::{GitStateStore, StateStore};
use crate::util::blocking;
use crate::workflow::LifecycleEngine;
use crate::workspace::WorkspaceManager;
use crate::{Error, Result};

pub struct AutomationApi {
    engine: Arc<LifecycleEngine>,
    merger: Arc<MergeOrchestrator>,
}

impl AutomationApi {
    pub fn new(engine: LifecycleEngine, merger: MergeOrchestrator) -> Self {
        Self {
            engine: Arc::new(engine),
            merger: Arc::new(merger),
        }
    }

    /// Wire the engine and orchestrator around one backend and one store.
    pub fn with_parts(
        backend: Arc<dyn VcsBackend>,
        store: Arc<dyn StateStore>,
        repo_path: &Path,
        config: Config,
    ) -> Self {
        let workspaces = WorkspaceManager::new(
            backend.clone(),
            config.workspace_root(repo_path),
            config.retry.clone(),
        );
        let engine = LifecycleEngine::new(store.clone(), workspaces.clone(), config.store.cas_retries);
        let merger = MergeOrchestrator::new(store, backend, workspaces, config);
        Self::new(engine, merger)
    }

    /// Git-backed API for the repository at `repo_path`.
    pub fn open(repo_path: &Path, config: Config) -> Result<Self> {
        let backend: Arc<dyn VcsBackend> = Arc::new(GitBackend::new(repo_path)?);
        let store: Arc<dyn StateStore> = Arc::new(GitStateStore::new(repo_path)?);
        Ok(Self::with_parts(backend, store, repo_path, config))
    }

    pub async fn handle_json(&self, text: &str) -> ApiResponse {
        match ApiRequest::parse(text) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                let command = request::raw_command_name(text);
                warn!("Rejected malformed {} request: {}", command, e);
                ApiResponse::from_error(&command, &e)
            }
        }
    }

    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        let name = request.command.name();
        debug!("API request: {}", name);

        let result = match gate(&request) {
            Err(e) => Err(e),
            Ok(()) => {
                let engine = self.engine.clone();
                let merger = self.merger.clone();
                blocking(move || execute(&engine, &merger, request.command)).await
            }
        };

        match result {
            Ok(data) => ApiResponse::ok(name, data),
            Err(e) => {
                warn!("{} failed: {} ({})", name, e, e.code());
                ApiResponse::from_error(name, &e)
            }
        }
    }
}

/// Contract version first, then policy. Runs before any state is read.
fn gate(request: &ApiRequest) -> Result<()> {
    if let Some(v) = &request.contract_version {
        version::check_compatible(v)?;
    }
    if request.command.is_mutating() {
        policy::require_policy(request.policy.as_ref())?;
    }
    Ok(())
}

fn feature_view(engine: &LifecycleEngine, feature: &Feature) -> Result<Value> {
    let merge_in_progress = engine.store().load_merge_state(&feature.slug)?.is_some();
    Ok(serde_json::to_value(FeatureView::new(feature, merge_in_progress))?)
}

fn execute(engine: &LifecycleEngine, merger: &MergeOrchestrator, command: Command) -> Result<Value> {
    let data = match command {
        Command::ContractVersion { provider_version } => {
            serde_json::to_value(version::contract_info(provider_version.as_deref())?)?
        }
        Command::FeatureState { feature } => feature_view(engine, &engine.feature_state(&feature)?)?,
        Command::ListReady { feature } => {
            let ready = engine.list_ready(&feature)?;
            json!({ "feature": feature, "ready": ready })
        }
        Command::MergeStatus { feature } => {
            let state = merger.status(&feature)?;
            json!({
                "feature": feature,
                "merge_in_progress": state.is_some(),
                "state": state,
            })
        }
        Command::RegisterFeature {
            feature,
            mission_type,
            target_branch,
            work_packages,
        } => {
            let wps = work_packages.into_iter().map(WorkPackage::from).collect();
            let registered =
                engine.register_feature(Feature::new(feature, mission_type, target_branch, wps))?;
            feature_view(engine, &registered)?
        }
        Command::StartImplementation {
            feature,
            wp,
            actor,
            expected_version,
        } => serde_json::to_value(engine.start_implementation(&feature, &wp, &actor, expected_version)?)?,
        Command::Transition {
            feature,
            wp,
            to,
            actor,
            note,
            feedback,
            expected_version,
        } => {
            let updated = engine.transition(
                &feature,
                &wp,
                to,
                &actor,
                note,
                feedback.as_deref(),
                expected_version,
            )?;
            serde_json::to_value(WorkPackageView::from(&updated))?
        }
        Command::StartReview {
            feature,
            wp,
            actor,
            expected_version,
        } => {
            let updated = engine.start_review(&feature, &wp, &actor, expected_version)?;
            serde_json::to_value(WorkPackageView::from(&updated))?
        }
        Command::AcceptFeature { feature, actor } => {
            feature_view(engine, &engine.accept_feature(&feature, &actor)?)?
        }
        Command::MergeFeature {
            feature,
            strategy,
            dry_run,
            resume,
            abort,
            push,
            keep_workspaces,
            keep_branches,
        } => {
            if [dry_run, resume, abort].iter().filter(|m| **m).count() > 1 {
                return Err(Error::InvalidRequest(
                    "dry_run, resume and abort are mutually exclusive".into(),
                ));
            }
            let command = MergeCommand {
                strategy,
                push,
                keep_workspaces,
                keep_branches,
            };
            if abort {
                serde_json::to_value(merger.abort(&feature)?)?
            } else if resume {
                serde_json::to_value(merger.resume(&feature)?)?
            } else if dry_run {
                serde_json::to_value(merger.dry_run(&feature, &command)?)?
            } else {
                serde_json::to_value(merger.execute(&feature, &command)?)?
            }
        }
        Command::ArchiveFeature { feature } => {
            engine.archive_feature(&feature)?;
            json!({ "feature": feature, "archived": true })
        }
    };
    Ok(data)
}
