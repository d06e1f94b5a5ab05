use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::Feature;
use crate::state::{MergeState, StateStore};
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    features: HashMap<String, Feature>,
    archived: HashMap<String, Feature>,
    merges: HashMap<String, MergeState>,
    blobs: HashMap<String, Vec<u8>>,
}

/// In-process store with the same compare-and-swap semantics as
/// [`GitStateStore`](super::GitStateStore).
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::InvalidRequest("state store lock poisoned".into()))
    }
}

impl StateStore for MemoryStateStore {
    fn load_feature(&self, slug: &str) -> Result<Option<Feature>> {
        Ok(self.lock()?.features.get(slug).cloned())
    }

    fn create_feature(&self, feature: &Feature) -> Result<Feature> {
        let mut inner = self.lock()?;
        if inner.features.contains_key(&feature.slug) {
            return Err(Error::FeatureExists(feature.slug.clone()));
        }
        let mut stored = feature.clone();
        stored.version = 1;
        inner.features.insert(stored.slug.clone(), stored.clone());
        Ok(stored)
    }

    fn save_feature(&self, feature: &Feature, expected_version: u64) -> Result<Feature> {
        let mut inner = self.lock()?;
        let current = inner
            .features
            .get(&feature.slug)
            .map(|f| f.version)
            .ok_or_else(|| Error::StaleWrite(feature.slug.clone()))?;
        if current != expected_version {
            return Err(Error::StaleWrite(feature.slug.clone()));
        }
        let mut stored = feature.clone();
        stored.version = expected_version + 1;
        inner.features.insert(stored.slug.clone(), stored.clone());
        Ok(stored)
    }

    fn archive_feature(&self, slug: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let feature = inner
            .features
            .remove(slug)
            .ok_or_else(|| Error::FeatureNotFound(slug.to_string()))?;
        inner.archived.insert(slug.to_string(), feature);
        Ok(())
    }

    fn list_features(&self) -> Result<Vec<String>> {
        let mut slugs: Vec<String> = self.lock()?.features.keys().cloned().collect();
        slugs.sort();
        Ok(slugs)
    }

    fn load_merge_state(&self, slug: &str) -> Result<Option<MergeState>> {
        Ok(self.lock()?.merges.get(slug).cloned())
    }

    fn create_merge_state(&self, state: &MergeState) -> Result<MergeState> {
        let mut inner = self.lock()?;
        if inner.merges.contains_key(&state.feature_slug) {
            return Err(Error::MergeAlreadyInProgress {
                feature: state.feature_slug.clone(),
            });
        }
        let mut stored = state.clone();
        stored.revision = 1;
        inner
            .merges
            .insert(stored.feature_slug.clone(), stored.clone());
        Ok(stored)
    }

    fn save_merge_state(&self, state: &MergeState, expected_revision: u64) -> Result<MergeState> {
        let mut inner = self.lock()?;
        match inner.merges.get(&state.feature_slug) {
            Some(current) if current.revision == expected_revision => {}
            _ => return Err(Error::StaleWrite(state.feature_slug.clone())),
        }
        let mut stored = state.clone();
        stored.revision = expected_revision + 1;
        inner
            .merges
            .insert(stored.feature_slug.clone(), stored.clone());
        Ok(stored)
    }

    fn delete_merge_state(&self, slug: &str) -> Result<()> {
        self.lock()?.merges.remove(slug);
        Ok(())
    }

    fn archive_blob(&self, slug: &str, name: &str, content: &[u8]) -> Result<String> {
        let reference = format!("{}/{}", slug, name);
        self.lock()?
            .blobs
            .insert(reference.clone(), content.to_vec());
        Ok(reference)
    }

    fn read_blob(&self, reference: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.blobs.get(reference).cloned())
    }
}
