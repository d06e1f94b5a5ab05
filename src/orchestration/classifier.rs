//! Conflict classification.
//!
//! Forecast mode looks at every done work package's diff against the base it
//! branched from and reports files touched by more than one of them. Live
//! mode takes the conflicts a real merge produced and resolves the ones that
//! have a semantic rule.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{ConflictFile, LineRange, ResolvedFile, VcsBackend};
use crate::core::{Feature, WorkPackageId};
use crate::orchestration::status_file;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    AutoResolvable,
    Manual,
}

/// How likely a manual entry is to produce a real textual conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Touched line ranges overlap.
    Possible,
    Unlikely,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictForecast {
    pub file_path: String,
    pub contributing_wps: BTreeSet<WorkPackageId>,
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
}

/// Outcome of classifying the conflicts of one live merge attempt.
#[derive(Debug, Clone, Default)]
pub struct LiveClassification {
    pub resolved: Vec<ResolvedFile>,
    pub manual: Vec<String>,
}

fn any_overlap(touches: &[(WorkPackageId, Vec<LineRange>)]) -> bool {
    for (i, (_, left)) in touches.iter().enumerate() {
        for (_, right) in &touches[i + 1..] {
            if left.iter().any(|a| right.iter().any(|b| a.overlaps(b))) {
                return true;
            }
        }
    }
    false
}

pub struct ConflictClassifier<'a> {
    backend: &'a dyn VcsBackend,
}

impl<'a> ConflictClassifier<'a> {
    pub fn new(backend: &'a dyn VcsBackend) -> Self {
        Self { backend }
    }

    /// Branch and base commit to diff for a work package.
    fn diff_range(&self, feature: &Feature, wp: &WorkPackageId) -> Result<Option<(String, String)>> {
        if let Some(ws) = feature.workspaces.get(wp) {
            if self.backend.branch_exists(&ws.branch)? {
                return Ok(Some((ws.base_commit.clone(), ws.branch.clone())));
            }
        }
        let branch = feature.branch_for(wp);
        if !self.backend.branch_exists(&branch)? {
            return Ok(None);
        }
        Ok(self
            .backend
            .merge_base(&branch, &feature.target_branch)?
            .map(|base| (base, branch)))
    }

    /// Predict conflicts between the given work packages without touching
    /// anything. Entries are sorted by path.
    pub fn forecast(
        &self,
        feature: &Feature,
        wps: &[WorkPackageId],
    ) -> Result<Vec<ConflictForecast>> {
        let mut touched: BTreeMap<String, Vec<(WorkPackageId, Vec<LineRange>)>> = BTreeMap::new();
        let mut tips: BTreeMap<WorkPackageId, String> = BTreeMap::new();

        for wp in wps {
            let Some((base, branch)) = self.diff_range(feature, wp)? else {
                debug!("No branch for {}, skipping in forecast", wp);
                continue;
            };
            for file in self.backend.diff(&base, &branch)? {
                touched
                    .entry(file.path)
                    .or_default()
                    .push((wp.clone(), file.ranges));
            }
            tips.insert(wp.clone(), branch);
        }

        let mut forecasts = Vec::new();
        for (path, touches) in touched {
            if touches.len() < 2 {
                continue;
            }
            let contributing_wps: BTreeSet<WorkPackageId> =
                touches.iter().map(|(wp, _)| wp.clone()).collect();

            let mut versions = Vec::new();
            for wp in &contributing_wps {
                if let Some(text) = self.backend.read_file(&tips[wp], &path)? {
                    versions.push(text);
                }
            }
            let auto = versions.len() == contributing_wps.len() && {
                let texts: Vec<&str> = versions.iter().map(String::as_str).collect();
                status_file::merge_texts(&texts)?.is_some()
            };

            forecasts.push(if auto {
                ConflictForecast {
                    file_path: path,
                    contributing_wps,
                    classification: Classification::AutoResolvable,
                    confidence: None,
                }
            } else {
                let confidence = if any_overlap(&touches) {
                    Confidence::Possible
                } else {
                    Confidence::Unlikely
                };
                ConflictForecast {
                    file_path: path,
                    contributing_wps,
                    classification: Classification::Manual,
                    confidence: Some(confidence),
                }
            });
        }
        Ok(forecasts)
    }

    /// Split the conflicts of a merge attempt into resolved status files and
    /// paths that need a human.
    pub fn classify_live(conflicts: &[ConflictFile]) -> Result<LiveClassification> {
        let mut result = LiveClassification::default();
        for conflict in conflicts {
            let merged = match (&conflict.ours, &conflict.theirs) {
                (Some(ours), Some(theirs)) => {
                    status_file::merge_texts(&[ours.as_str(), theirs.as_str()])?
                }
                _ => None,
            };
            match merged {
                Some(content) => {
                    debug!("Auto-resolved {}", conflict.path);
                    result
                        .resolved
                        .push(ResolvedFile::for_conflict(conflict, content));
                }
                None => result.manual.push(conflict.path.clone()),
            }
        }
        Ok(result)
    }
}
