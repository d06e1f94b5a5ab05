//! Integration tests for lanekeeper.
//!
//! Every test runs against a real repository in a temp directory, with
//! state in `refs/lanekeeper/*` and workspaces as linked worktrees.
//!
//! # Test Categories
//!
//! - `lifecycle`: claims, reviews and persistence across processes
//! - `merge_flow`: dependency-ordered merges, strategies, cleanup
//! - `conflicts`: status-file auto-resolution and manual halts
//! - `preflight`: batched pre-flight failures
//! - `api`: the automation request/response surface
//! - `recovery`: interrupted merges, resume and abort

mod fixtures;

mod api;
mod conflicts;
mod lifecycle;
mod recovery;
