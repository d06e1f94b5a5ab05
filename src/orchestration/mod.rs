//! Merge orchestration.
//!
//! The orchestrator integrates a feature's work packages into its target
//! branch in dependency order. The classifier decides which conflicts can be
//! resolved without a human, using the status-file merge rules.

pub mod classifier;
mod merge;
pub mod status_file;

pub use classifier::{Classification, Confidence, ConflictClassifier, ConflictForecast};
pub use merge::{AbortReport, DryRunReport, MergeCommand, MergeOrchestrator, MergeRun, PlannedStep};
