//! Automation API requests.
//!
//! A request is one JSON object tagged by `command`. Mutating commands may
//! also carry `policy` and `contract_version`; those two keys are lifted off
//! before the command itself is decoded.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::policy::OrchestratorPolicy;
use crate::backend::MergeStrategy;
use crate::core::{Lane, WorkPackage, WorkPackageId};
use crate::{Error, Result};

/// A work package as declared in `register-feature`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkPackageSpec {
    pub id: WorkPackageId,
    pub title: String,
    #[serde(default)]
    pub dependencies: Vec<WorkPackageId>,
}

impl From<WorkPackageSpec> for WorkPackage {
    fn from(spec: WorkPackageSpec) -> Self {
        WorkPackage::new(spec.id, spec.title).with_dependencies(spec.dependencies)
    }
}

fn default_mission() -> String {
    "software-dev".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    ContractVersion {
        #[serde(default)]
        provider_version: Option<String>,
    },
    FeatureState {
        feature: String,
    },
    ListReady {
        feature: String,
    },
    MergeStatus {
        feature: String,
    },
    RegisterFeature {
        feature: String,
        #[serde(default = "default_mission")]
        mission_type: String,
        target_branch: String,
        work_packages: Vec<WorkPackageSpec>,
    },
    StartImplementation {
        feature: String,
        wp: WorkPackageId,
        actor: String,
        #[serde(default)]
        expected_version: Option<u64>,
    },
    Transition {
        feature: String,
        wp: WorkPackageId,
        to: Lane,
        actor: String,
        #[serde(default)]
        note: Option<String>,
        #[serde(default)]
        feedback: Option<String>,
        #[serde(default)]
        expected_version: Option<u64>,
    },
    StartReview {
        feature: String,
        wp: WorkPackageId,
        actor: String,
        #[serde(default)]
        expected_version: Option<u64>,
    },
    AcceptFeature {
        feature: String,
        actor: String,
    },
    MergeFeature {
        feature: String,
        #[serde(default)]
        strategy: Option<MergeStrategy>,
        #[serde(default)]
        dry_run: bool,
        #[serde(default)]
        resume: bool,
        #[serde(default)]
        abort: bool,
        #[serde(default)]
        push: Option<bool>,
        #[serde(default)]
        keep_workspaces: bool,
        #[serde(default)]
        keep_branches: bool,
    },
    ArchiveFeature {
        feature: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ContractVersion { .. } => "contract-version",
            Command::FeatureState { .. } => "feature-state",
            Command::ListReady { .. } => "list-ready",
            Command::MergeStatus { .. } => "merge-status",
            Command::RegisterFeature { .. } => "register-feature",
            Command::StartImplementation { .. } => "start-implementation",
            Command::Transition { .. } => "transition",
            Command::StartReview { .. } => "start-review",
            Command::AcceptFeature { .. } => "accept-feature",
            Command::MergeFeature { .. } => "merge-feature",
            Command::ArchiveFeature { .. } => "archive-feature",
        }
    }

    /// Commands that change state and therefore pass the policy gate.
    ///
    /// A dry-run merge still counts: the gate looks at the command, not
    /// its flags.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Command::ContractVersion { .. }
                | Command::FeatureState { .. }
                | Command::ListReady { .. }
                | Command::MergeStatus { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub command: Command,
    pub policy: Option<OrchestratorPolicy>,
    pub contract_version: Option<String>,
}

impl ApiRequest {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            policy: None,
            contract_version: None,
        }
    }

    pub fn with_policy(mut self, policy: OrchestratorPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_contract_version(mut self, version: impl Into<String>) -> Self {
        self.contract_version = Some(version.into());
        self
    }

    /// # Errors
    /// `InvalidRequest` for anything that is not a well-formed request.
    pub fn from_value(mut value: Value) -> Result<Self> {
        let object = value
            .as_object_mut()
            .ok_or_else(|| Error::InvalidRequest("request must be a JSON object".into()))?;

        let policy = match object.remove("policy") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value(raw)
                    .map_err(|e| Error::InvalidRequest(format!("policy: {}", e)))?,
            ),
        };
        let contract_version = match object.remove("contract_version") {
            None | Some(Value::Null) => None,
            Some(Value::String(v)) => Some(v),
            Some(_) => {
                return Err(Error::InvalidRequest(
                    "contract_version must be a string".into(),
                ))
            }
        };

        let command =
            serde_json::from_value(value).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        Ok(Self {
            command,
            policy,
            contract_version,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        Self::from_value(value)
    }
}

/// Best-effort command name from raw input, for error responses to requests
/// that could not be decoded.
pub fn raw_command_name(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("command").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| "unknown".to_string())
}
