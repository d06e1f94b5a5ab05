use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::work_package::{Lane, WorkPackageId};

/// Stable, machine-readable error codes surfaced by the automation API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    CycleDetected,
    UnknownDependency,
    WpAlreadyClaimed,
    TransitionRejected,
    DependencyNotSatisfied,
    WorkspaceNotFound,
    WorkspaceExists,
    WorkspaceCreateFailed,
    UncommittedChanges,
    TargetBehindOrigin,
    PreflightFailed,
    StrategyUnsupported,
    MergeAlreadyInProgress,
    NoMergeInProgress,
    UnresolvedBackendConflict,
    FeatureNotReady,
    FeatureNotFound,
    FeatureExists,
    WpNotFound,
    ContractVersionMismatch,
    PolicyMetadataRequired,
    PolicyValidationFailed,
    VersionConflict,
    BackendFailure,
    InvalidRequest,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CycleDetected => "CYCLE_DETECTED",
            ErrorCode::UnknownDependency => "UNKNOWN_DEPENDENCY",
            ErrorCode::WpAlreadyClaimed => "WP_ALREADY_CLAIMED",
            ErrorCode::TransitionRejected => "TRANSITION_REJECTED",
            ErrorCode::DependencyNotSatisfied => "DEPENDENCY_NOT_SATISFIED",
            ErrorCode::WorkspaceNotFound => "WORKSPACE_NOT_FOUND",
            ErrorCode::WorkspaceExists => "WORKSPACE_EXISTS",
            ErrorCode::WorkspaceCreateFailed => "WORKSPACE_CREATE_FAILED",
            ErrorCode::UncommittedChanges => "UNCOMMITTED_CHANGES",
            ErrorCode::TargetBehindOrigin => "TARGET_BEHIND_ORIGIN",
            ErrorCode::PreflightFailed => "PREFLIGHT_FAILED",
            ErrorCode::StrategyUnsupported => "STRATEGY_UNSUPPORTED",
            ErrorCode::MergeAlreadyInProgress => "MERGE_ALREADY_IN_PROGRESS",
            ErrorCode::NoMergeInProgress => "NO_MERGE_IN_PROGRESS",
            ErrorCode::UnresolvedBackendConflict => "UNRESOLVED_BACKEND_CONFLICT",
            ErrorCode::FeatureNotReady => "FEATURE_NOT_READY",
            ErrorCode::FeatureNotFound => "FEATURE_NOT_FOUND",
            ErrorCode::FeatureExists => "FEATURE_EXISTS",
            ErrorCode::WpNotFound => "WP_NOT_FOUND",
            ErrorCode::ContractVersionMismatch => "CONTRACT_VERSION_MISMATCH",
            ErrorCode::PolicyMetadataRequired => "POLICY_METADATA_REQUIRED",
            ErrorCode::PolicyValidationFailed => "POLICY_VALIDATION_FAILED",
            ErrorCode::VersionConflict => "VERSION_CONFLICT",
            ErrorCode::BackendFailure => "BACKEND_FAILURE",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single pre-flight finding. Pre-flight reports all of them at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightIssue {
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wp: Option<WorkPackageId>,
    pub message: String,
}

fn join_ids(ids: &[WorkPackageId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("{wp} depends on {dependency}, which is not part of the feature")]
    UnknownDependency {
        wp: WorkPackageId,
        dependency: WorkPackageId,
    },

    #[error("{wp} is already claimed by {owner}")]
    WpAlreadyClaimed { wp: WorkPackageId, owner: String },

    #[error("Transition of {wp} from {from} to {to} rejected: {reason}")]
    TransitionRejected {
        wp: WorkPackageId,
        from: Lane,
        to: Lane,
        reason: String,
    },

    #[error("{wp} has unfinished dependencies: {}", join_ids(.pending))]
    DependencyNotSatisfied {
        wp: WorkPackageId,
        pending: Vec<WorkPackageId>,
    },

    #[error("No workspace for {wp}")]
    WorkspaceNotFound { wp: WorkPackageId },

    #[error("{wp} already has a live workspace at {path}")]
    WorkspaceExists { wp: WorkPackageId, path: String },

    #[error("Failed to create workspace for {wp}: {reason}")]
    WorkspaceCreateFailed { wp: WorkPackageId, reason: String },

    #[error("Workspace for {wp} has uncommitted changes")]
    UncommittedChanges { wp: WorkPackageId },

    #[error("Branch {branch} is {behind} commit(s) behind its upstream")]
    TargetBehindOrigin { branch: String, behind: usize },

    #[error("Pre-flight failed with {} issue(s)", .issues.len())]
    PreflightFailed { issues: Vec<PreflightIssue> },

    #[error("Strategy {strategy} is not supported: {reason}")]
    StrategyUnsupported { strategy: String, reason: String },

    #[error("A merge is already in progress for feature {feature}")]
    MergeAlreadyInProgress { feature: String },

    #[error("No merge in progress for feature {feature}")]
    NoMergeInProgress { feature: String },

    #[error("Backend has unresolved conflicts: {}", .files.join(", "))]
    UnresolvedBackendConflict { files: Vec<String> },

    #[error("Feature {feature} is not ready; unfinished work packages: {}", join_ids(.pending))]
    FeatureNotReady {
        feature: String,
        pending: Vec<WorkPackageId>,
    },

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Feature already exists: {0}")]
    FeatureExists(String),

    #[error("Work package {wp} not found in feature {feature}")]
    WorkPackageNotFound { feature: String, wp: WorkPackageId },

    #[error("Contract version mismatch: caller {requested}, provider {provided} (minimum {minimum})")]
    ContractVersionMismatch {
        requested: String,
        provided: String,
        minimum: String,
    },

    #[error("Policy metadata required: missing {}", .missing.join(", "))]
    PolicyMetadataRequired { missing: Vec<String> },

    #[error("Policy field '{field}' rejected: {reason}")]
    PolicyValidationFailed { field: String, reason: String },

    #[error("Version conflict on {subject}: expected {expected}, found {actual}")]
    VersionConflict {
        subject: String,
        expected: u64,
        actual: u64,
    },

    /// Internal signal from the state store: the record moved underneath a
    /// compare-and-swap. Callers reload and re-validate.
    #[error("Stale write to {0}")]
    StaleWrite(String),

    #[error("Backend operation '{operation}' failed after {attempts} attempt(s): {message}")]
    BackendFailure {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::CycleDetected { .. } => ErrorCode::CycleDetected,
            Error::UnknownDependency { .. } => ErrorCode::UnknownDependency,
            Error::WpAlreadyClaimed { .. } => ErrorCode::WpAlreadyClaimed,
            Error::TransitionRejected { .. } => ErrorCode::TransitionRejected,
            Error::DependencyNotSatisfied { .. } => ErrorCode::DependencyNotSatisfied,
            Error::WorkspaceNotFound { .. } => ErrorCode::WorkspaceNotFound,
            Error::WorkspaceExists { .. } => ErrorCode::WorkspaceExists,
            Error::WorkspaceCreateFailed { .. } => ErrorCode::WorkspaceCreateFailed,
            Error::UncommittedChanges { .. } => ErrorCode::UncommittedChanges,
            Error::TargetBehindOrigin { .. } => ErrorCode::TargetBehindOrigin,
            Error::PreflightFailed { .. } => ErrorCode::PreflightFailed,
            Error::StrategyUnsupported { .. } => ErrorCode::StrategyUnsupported,
            Error::MergeAlreadyInProgress { .. } => ErrorCode::MergeAlreadyInProgress,
            Error::NoMergeInProgress { .. } => ErrorCode::NoMergeInProgress,
            Error::UnresolvedBackendConflict { .. } => ErrorCode::UnresolvedBackendConflict,
            Error::FeatureNotReady { .. } => ErrorCode::FeatureNotReady,
            Error::FeatureNotFound(_) => ErrorCode::FeatureNotFound,
            Error::FeatureExists(_) => ErrorCode::FeatureExists,
            Error::WorkPackageNotFound { .. } => ErrorCode::WpNotFound,
            Error::ContractVersionMismatch { .. } => ErrorCode::ContractVersionMismatch,
            Error::PolicyMetadataRequired { .. } => ErrorCode::PolicyMetadataRequired,
            Error::PolicyValidationFailed { .. } => ErrorCode::PolicyValidationFailed,
            Error::VersionConflict { .. } | Error::StaleWrite(_) => ErrorCode::VersionConflict,
            Error::BackendFailure { .. } => ErrorCode::BackendFailure,
            Error::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Error::Io(_)
            | Error::Git(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::NoHomeDir
            | Error::TaskJoin(_) => ErrorCode::InternalError,
        }
    }

    /// Whether a failed backend call is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Git(e) => {
                e.code() == git2::ErrorCode::Locked
                    || matches!(e.class(), git2::ErrorClass::Net | git2::ErrorClass::Ssl)
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Structured detail for API responses, where the variant carries any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::CycleDetected { cycle } => Some(serde_json::json!({ "cycle": cycle })),
            Error::DependencyNotSatisfied { wp, pending } => {
                Some(serde_json::json!({ "wp": wp, "pending": pending }))
            }
            Error::PreflightFailed { issues } => Some(serde_json::json!({ "issues": issues })),
            Error::UnresolvedBackendConflict { files } => {
                Some(serde_json::json!({ "files": files }))
            }
            Error::FeatureNotReady { pending, .. } => {
                Some(serde_json::json!({ "non_terminal": pending }))
            }
            Error::PolicyMetadataRequired { missing } => {
                Some(serde_json::json!({ "missing": missing }))
            }
            Error::PolicyValidationFailed { field, .. } => {
                Some(serde_json::json!({ "field": field }))
            }
            Error::WpAlreadyClaimed { wp, owner } => {
                Some(serde_json::json!({ "wp": wp, "owner": owner }))
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
