//! Automation API responses and the read models they carry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::version::API_VERSION;
use crate::core::{
    Acceptance, Feature, Lane, ReviewStatus, Transition, WorkPackage, WorkPackageId, Workspace,
};
use crate::{Error, ErrorCode};

/// Every response has this shape; `data` on success, the error fields
/// otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub command: String,
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiResponse {
    pub fn ok(command: &str, data: Value) -> Self {
        Self {
            success: true,
            command: command.to_string(),
            api_version: API_VERSION.to_string(),
            data: Some(data),
            error_code: None,
            message: None,
            details: None,
        }
    }

    pub fn from_error(command: &str, error: &Error) -> Self {
        Self {
            success: false,
            command: command.to_string(),
            api_version: API_VERSION.to_string(),
            data: None,
            error_code: Some(error.code()),
            message: Some(error.to_string()),
            details: error.details(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            format!(
                r#"{{"success":false,"command":"{}","api_version":"{}","error_code":"INTERNAL_ERROR","message":"failed to encode response: {}"}}"#,
                self.command, API_VERSION, e
            )
        })
    }
}

/// A work package as callers see it, with its lane spelled out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkPackageView {
    pub id: WorkPackageId,
    pub title: String,
    pub lane: Lane,
    pub dependencies: Vec<WorkPackageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub review_status: ReviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_feedback_ref: Option<String>,
    pub version: u64,
    pub history: Vec<Transition>,
}

impl From<&WorkPackage> for WorkPackageView {
    fn from(wp: &WorkPackage) -> Self {
        Self {
            id: wp.id.clone(),
            title: wp.title.clone(),
            lane: wp.lane(),
            dependencies: wp.dependencies.iter().cloned().collect(),
            assignee: wp.assignee.clone(),
            review_status: wp.review_status.clone(),
            review_feedback_ref: wp.review_feedback_ref.clone(),
            version: wp.version,
            history: wp.history().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureView {
    pub slug: String,
    pub mission_type: String,
    pub target_branch: String,
    pub version: u64,
    pub work_packages: Vec<WorkPackageView>,
    pub workspaces: BTreeMap<WorkPackageId, Workspace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<Acceptance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    pub merge_in_progress: bool,
}

impl FeatureView {
    pub fn new(feature: &Feature, merge_in_progress: bool) -> Self {
        let mut work_packages: Vec<WorkPackageView> =
            feature.work_packages.iter().map(WorkPackageView::from).collect();
        work_packages.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            slug: feature.slug.clone(),
            mission_type: feature.mission_type.clone(),
            target_branch: feature.target_branch.clone(),
            version: feature.version,
            work_packages,
            workspaces: feature.workspaces.clone(),
            accepted: feature.accepted.clone(),
            merged_at: feature.merged_at,
            merge_in_progress,
        }
    }
}
