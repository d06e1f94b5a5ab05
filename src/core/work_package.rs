//! Work package data model.
//!
//! A work package (WP) is the smallest independently assignable unit of
//! feature work. Its lane is never stored directly: it is the projection of
//! the last entry of its append-only transition history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// Identifier of a work package within a feature, e.g. `WP01`.
///
/// Ordering is plain string ordering, which is what dependency ordering
/// uses to break ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkPackageId(String);

impl WorkPackageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkPackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkPackageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkPackageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle stage of a work package.
///
/// The derived ordering (`planned < doing < for_review < done`) is also the
/// "most advanced" ordering used when merging status files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    #[default]
    Planned,
    Doing,
    ForReview,
    Done,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Planned => "planned",
            Lane::Doing => "doing",
            Lane::ForReview => "for_review",
            Lane::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Lane::Done)
    }

    /// Legal lane moves:
    /// - planned -> doing
    /// - doing -> for_review
    /// - for_review -> done
    /// - for_review -> planned (changes requested)
    pub fn can_transition_to(&self, target: Lane) -> bool {
        matches!(
            (self, target),
            (Lane::Planned, Lane::Doing)
                | (Lane::Doing, Lane::ForReview)
                | (Lane::ForReview, Lane::Done)
                | (Lane::ForReview, Lane::Planned)
        )
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Lane {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "planned" => Ok(Lane::Planned),
            "doing" => Ok(Lane::Doing),
            "for_review" => Ok(Lane::ForReview),
            "done" => Ok(Lane::Done),
            other => Err(Error::InvalidRequest(format!("unknown lane '{}'", other))),
        }
    }
}

/// One immutable entry in a work package's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub timestamp: DateTime<Utc>,
    pub from_lane: Lane,
    pub to_lane: Lane,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Review progress of a work package sitting in `for_review`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ReviewStatus {
    #[default]
    NotReviewed,
    InReview {
        reviewer: String,
    },
    ChangesRequested,
    Approved,
}

/// A single work package and its full history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkPackage {
    pub id: WorkPackageId,
    pub title: String,
    #[serde(default)]
    pub dependencies: BTreeSet<WorkPackageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub review_status: ReviewStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_feedback_ref: Option<String>,
    #[serde(default)]
    history: Vec<Transition>,
    /// Bumped on every mutation of this work package.
    #[serde(default)]
    pub version: u64,
}

impl WorkPackage {
    pub fn new(id: impl Into<WorkPackageId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            dependencies: BTreeSet::new(),
            assignee: None,
            review_status: ReviewStatus::NotReviewed,
            review_feedback_ref: None,
            history: Vec::new(),
            version: 0,
        }
    }

    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<WorkPackageId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Current lane, derived from the last history entry.
    pub fn lane(&self) -> Lane {
        self.history
            .last()
            .map(|t| t.to_lane)
            .unwrap_or(Lane::Planned)
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Append a lane transition.
    ///
    /// Timestamps never go backwards within a history, so the log stays
    /// totally ordered even under clock skew between writers.
    pub fn record_transition(
        &mut self,
        to: Lane,
        actor: &str,
        note: Option<String>,
    ) -> Result<&Transition> {
        let from = self.lane();
        if !from.can_transition_to(to) {
            return Err(Error::TransitionRejected {
                wp: self.id.clone(),
                from,
                to,
                reason: format!("{} -> {} is not a legal lane move", from, to),
            });
        }

        Ok(self.push_transition(from, to, actor, note))
    }

    /// Undo a claim whose workspace could not be set up: `doing -> planned`,
    /// outside the regular lane table. Appended like any other transition.
    pub fn release_claim(&mut self, actor: &str, note: Option<String>) -> Result<&Transition> {
        let from = self.lane();
        if from != Lane::Doing {
            return Err(Error::TransitionRejected {
                wp: self.id.clone(),
                from,
                to: Lane::Planned,
                reason: "only a claimed work package can be released".into(),
            });
        }
        self.assignee = None;
        Ok(self.push_transition(from, Lane::Planned, actor, note))
    }

    fn push_transition(&mut self, from: Lane, to: Lane, actor: &str, note: Option<String>) -> &Transition {
        let now = Utc::now();
        let timestamp = match self.history.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.history.push(Transition {
            timestamp,
            from_lane: from,
            to_lane: to,
            actor: actor.to_string(),
            note,
        });
        self.version += 1;
        &self.history[self.history.len() - 1]
    }

    /// Bump the version for a mutation that does not change the lane.
    pub fn touch(&mut self) {
        self.version += 1;
    }
}
