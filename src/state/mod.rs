//! Durable state for features and merges.
//!
//! Every write is a compare-and-swap against the version the writer loaded,
//! so separate processes racing on the same record can never silently
//! overwrite each other. [`update_feature`] wraps the reload-and-retry loop.

mod git_store;
mod memory;
mod merge_state;

pub use git_store::GitStateStore;
pub use memory::MemoryStateStore;
pub use merge_state::{MergeOptions, MergeState};

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::Feature;
use crate::{Error, Result};

pub trait StateStore: Send + Sync {
    fn load_feature(&self, slug: &str) -> Result<Option<Feature>>;

    /// Store a new feature record at version 1.
    ///
    /// # Errors
    /// `Error::FeatureExists` if a record for the slug is already stored.
    fn create_feature(&self, feature: &Feature) -> Result<Feature>;

    /// Replace the record if it is still at `expected_version`. Returns the
    /// stored record with its new version.
    ///
    /// # Errors
    /// `Error::StaleWrite` if the stored version moved on.
    fn save_feature(&self, feature: &Feature, expected_version: u64) -> Result<Feature>;

    /// Move a feature out of the live namespace. Its history is kept.
    fn archive_feature(&self, slug: &str) -> Result<()>;

    fn list_features(&self) -> Result<Vec<String>>;

    fn load_merge_state(&self, slug: &str) -> Result<Option<MergeState>>;

    /// # Errors
    /// `Error::MergeAlreadyInProgress` if a record already exists.
    fn create_merge_state(&self, state: &MergeState) -> Result<MergeState>;

    fn save_merge_state(&self, state: &MergeState, expected_revision: u64) -> Result<MergeState>;

    /// Remove the merge record. Removing an absent record is a no-op.
    fn delete_merge_state(&self, slug: &str) -> Result<()>;

    /// Keep an opaque payload under the feature; returns a reference to it.
    fn archive_blob(&self, slug: &str, name: &str, content: &[u8]) -> Result<String>;

    fn read_blob(&self, reference: &str) -> Result<Option<Vec<u8>>>;
}

pub fn require_feature(store: &dyn StateStore, slug: &str) -> Result<Feature> {
    store
        .load_feature(slug)?
        .ok_or_else(|| Error::FeatureNotFound(slug.to_string()))
}

/// Load, mutate, and save a feature, retrying on lost races.
///
/// `apply` is re-run against a freshly loaded record on every attempt, so
/// its validation always sees the latest state. Errors from `apply` abort
/// without writing anything.
pub fn update_feature<T, F>(
    store: &dyn StateStore,
    slug: &str,
    retries: u32,
    mut apply: F,
) -> Result<(Feature, T)>
where
    F: FnMut(&mut Feature) -> Result<T>,
{
    let attempts = retries.max(1);
    let mut last_seen = 0;
    for attempt in 1..=attempts {
        let mut feature = require_feature(store, slug)?;
        let expected = feature.version;
        last_seen = expected;
        let value = apply(&mut feature)?;

        match store.save_feature(&feature, expected) {
            Ok(saved) => {
                debug!("Saved feature {} at version {}", slug, saved.version);
                return Ok((saved, value));
            }
            Err(Error::StaleWrite(_)) => {
                warn!(
                    "Feature {} changed underneath write (attempt {}/{})",
                    slug, attempt, attempts
                );
                thread::sleep(Duration::from_millis(u64::from(attempt)));
            }
            Err(e) => return Err(e),
        }
    }

    let actual = store
        .load_feature(slug)?
        .map(|f| f.version)
        .unwrap_or(last_seen);
    Err(Error::VersionConflict {
        subject: slug.to_string(),
        expected: last_seen,
        actual,
    })
}
