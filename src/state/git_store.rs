//! Git-native state store.
//!
//! Each record is a commit whose tree holds a single `record.json`, chained
//! to the previous snapshot of the same record. The ref for a record is the
//! head of that chain, so history is an immutable append-only log and the
//! current value is whatever the ref points at:
//!
//! - `refs/lanekeeper/features/<slug>`: feature records
//! - `refs/lanekeeper/merge/<slug>`: in-progress merge state
//! - `refs/lanekeeper/archive/<slug>`: archived features
//! - `refs/lanekeeper/feedback/<slug>`: archived review feedback

use std::path::{Path, PathBuf};

use git2::{Commit, ErrorCode, Oid, Repository, Signature};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::core::Feature;
use crate::git_refs::GitRefs;
use crate::state::{MergeState, StateStore};
use crate::{Error, Result};

const RECORD_FILE: &str = "record.json";
const BLOB_MODE: i32 = 0o100644;
const APPEND_RETRIES: u32 = 16;

pub struct GitStateStore {
    refs: GitRefs,
    repo_path: PathBuf,
}

impl GitStateStore {
    /// # Errors
    /// Returns an error if the path is not a valid git repository.
    pub fn new(repo_path: &Path) -> Result<Self> {
        debug!("GitStateStore::new path={}", repo_path.display());
        Ok(Self {
            refs: GitRefs::new(repo_path)?,
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    fn feature_ref(slug: &str) -> String {
        format!("features/{}", slug)
    }

    fn merge_ref(slug: &str) -> String {
        format!("merge/{}", slug)
    }

    fn archive_ref(slug: &str) -> String {
        format!("archive/{}", slug)
    }

    fn feedback_ref(slug: &str) -> String {
        format!("feedback/{}", slug)
    }

    fn signature(repo: &Repository) -> Result<Signature<'static>> {
        Ok(repo
            .signature()
            .or_else(|_| Signature::now("lanekeeper", "lanekeeper@localhost"))?)
    }

    fn commit_tree(
        repo: &Repository,
        tree: Oid,
        parents: &[Oid],
        message: &str,
    ) -> Result<Oid> {
        let tree = repo.find_tree(tree)?;
        let parents: Vec<Commit<'_>> = parents
            .iter()
            .map(|p| repo.find_commit(*p))
            .collect::<std::result::Result<_, _>>()?;
        let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();
        let sig = Self::signature(repo)?;
        Ok(repo.commit(None, &sig, &sig, message, &tree, &parent_refs)?)
    }

    fn write_snapshot<T: Serialize>(
        &self,
        record: &T,
        parent: Option<Oid>,
        message: &str,
    ) -> Result<Oid> {
        let repo = self.repo()?;
        let blob = repo.blob(&serde_json::to_vec_pretty(record)?)?;
        let mut builder = repo.treebuilder(None)?;
        builder.insert(RECORD_FILE, blob, BLOB_MODE)?;
        let tree = builder.write()?;
        let parents: Vec<Oid> = parent.into_iter().collect();
        Self::commit_tree(&repo, tree, &parents, message)
    }

    fn read_snapshot<T: DeserializeOwned>(&self, oid: Oid) -> Result<T> {
        let repo = self.repo()?;
        let tree = repo.find_commit(oid)?.tree()?;
        let entry = tree.get_name(RECORD_FILE).ok_or_else(|| {
            Error::Git(git2::Error::from_str(&format!(
                "snapshot {} has no {}",
                oid, RECORD_FILE
            )))
        })?;
        let blob = repo.find_blob(entry.id())?;
        Ok(serde_json::from_slice(blob.content())?)
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<(Oid, T)>> {
        match self.refs.read_ref(name)? {
            Some(oid) => Ok(Some((oid, self.read_snapshot(oid)?))),
            None => Ok(None),
        }
    }

    /// Every snapshot recorded for a feature, oldest first.
    pub fn feature_log(&self, slug: &str) -> Result<Vec<Feature>> {
        let Some(head) = self.refs.read_ref(&Self::feature_ref(slug))? else {
            return Ok(Vec::new());
        };
        let repo = self.repo()?;
        let mut records = Vec::new();
        let mut next = Some(head);
        while let Some(oid) = next {
            records.push(self.read_snapshot(oid)?);
            let commit = repo.find_commit(oid)?;
            next = commit.parent_ids().next();
        }
        records.reverse();
        Ok(records)
    }
}

impl StateStore for GitStateStore {
    fn load_feature(&self, slug: &str) -> Result<Option<Feature>> {
        Ok(self
            .load::<Feature>(&Self::feature_ref(slug))?
            .map(|(_, f)| f))
    }

    fn create_feature(&self, feature: &Feature) -> Result<Feature> {
        debug!("GitStateStore::create_feature slug={}", feature.slug);
        let mut stored = feature.clone();
        stored.version = 1;
        let oid = self.write_snapshot(&stored, None, &format!("feature {}: create", stored.slug))?;
        if !self.refs.create_ref(&Self::feature_ref(&stored.slug), oid)? {
            return Err(Error::FeatureExists(stored.slug));
        }
        info!("Registered feature {}", stored.slug);
        Ok(stored)
    }

    fn save_feature(&self, feature: &Feature, expected_version: u64) -> Result<Feature> {
        let name = Self::feature_ref(&feature.slug);
        let (current_oid, current) = self
            .load::<Feature>(&name)?
            .ok_or_else(|| Error::StaleWrite(GitRefs::full_ref_name(&name)))?;
        if current.version != expected_version {
            return Err(Error::StaleWrite(GitRefs::full_ref_name(&name)));
        }

        let mut stored = feature.clone();
        stored.version = expected_version + 1;
        let oid = self.write_snapshot(
            &stored,
            Some(current_oid),
            &format!("feature {}: version {}", stored.slug, stored.version),
        )?;
        self.refs.compare_and_swap(&name, current_oid, oid)?;
        Ok(stored)
    }

    fn archive_feature(&self, slug: &str) -> Result<()> {
        let name = Self::feature_ref(slug);
        let head = self
            .refs
            .read_ref(&name)?
            .ok_or_else(|| Error::FeatureNotFound(slug.to_string()))?;

        let archive = Self::archive_ref(slug);
        let target = match self.refs.read_ref(&archive)? {
            // Re-archiving a slug keeps the earlier archive reachable.
            Some(previous) => {
                let repo = self.repo()?;
                let tree = repo.find_commit(head)?.tree_id();
                Self::commit_tree(
                    &repo,
                    tree,
                    &[head, previous],
                    &format!("feature {}: archive", slug),
                )?
            }
            None => head,
        };
        self.refs.force_ref(&archive, target)?;

        if self.refs.read_ref(&name)? != Some(head) {
            return Err(Error::StaleWrite(GitRefs::full_ref_name(&name)));
        }
        self.refs.delete_ref(&name)?;
        info!("Archived feature {}", slug);
        Ok(())
    }

    fn list_features(&self) -> Result<Vec<String>> {
        Ok(self
            .refs
            .list_refs("features/")?
            .into_iter()
            .filter_map(|r| r.strip_prefix("features/").map(String::from))
            .collect())
    }

    fn load_merge_state(&self, slug: &str) -> Result<Option<MergeState>> {
        Ok(self
            .load::<MergeState>(&Self::merge_ref(slug))?
            .map(|(_, s)| s))
    }

    fn create_merge_state(&self, state: &MergeState) -> Result<MergeState> {
        let mut stored = state.clone();
        stored.revision = 1;
        let oid = self.write_snapshot(
            &stored,
            None,
            &format!("merge {}: start {}", stored.feature_slug, stored.run_id),
        )?;
        if !self
            .refs
            .create_ref(&Self::merge_ref(&stored.feature_slug), oid)?
        {
            return Err(Error::MergeAlreadyInProgress {
                feature: stored.feature_slug,
            });
        }
        Ok(stored)
    }

    fn save_merge_state(&self, state: &MergeState, expected_revision: u64) -> Result<MergeState> {
        let name = Self::merge_ref(&state.feature_slug);
        let (current_oid, current) = self
            .load::<MergeState>(&name)?
            .ok_or_else(|| Error::StaleWrite(GitRefs::full_ref_name(&name)))?;
        if current.revision != expected_revision || current.run_id != state.run_id {
            return Err(Error::StaleWrite(GitRefs::full_ref_name(&name)));
        }

        let mut stored = state.clone();
        stored.revision = expected_revision + 1;
        let oid = self.write_snapshot(
            &stored,
            Some(current_oid),
            &format!(
                "merge {}: revision {}",
                stored.feature_slug, stored.revision
            ),
        )?;
        self.refs.compare_and_swap(&name, current_oid, oid)?;
        Ok(stored)
    }

    fn delete_merge_state(&self, slug: &str) -> Result<()> {
        self.refs.delete_ref(&Self::merge_ref(slug))
    }

    fn archive_blob(&self, slug: &str, name: &str, content: &[u8]) -> Result<String> {
        let refname = Self::feedback_ref(slug);
        let repo = self.repo()?;
        let blob = repo.blob(content)?;

        for _ in 0..APPEND_RETRIES {
            let parent = self.refs.read_ref(&refname)?;
            let base_tree = match parent {
                Some(oid) => Some(repo.find_commit(oid)?.tree()?),
                None => None,
            };
            let mut builder = repo.treebuilder(base_tree.as_ref())?;
            builder.insert(name, blob, BLOB_MODE)?;
            let tree = builder.write()?;
            let parents: Vec<Oid> = parent.into_iter().collect();
            let commit = Self::commit_tree(
                &repo,
                tree,
                &parents,
                &format!("feedback {}: {}", slug, name),
            )?;

            let stored = match parent {
                Some(expected) => match self.refs.compare_and_swap(&refname, expected, commit) {
                    Ok(()) => true,
                    Err(Error::StaleWrite(_)) => false,
                    Err(e) => return Err(e),
                },
                None => self.refs.create_ref(&refname, commit)?,
            };
            if stored {
                debug!("Archived {} for {} as {}", name, slug, blob);
                return Ok(blob.to_string());
            }
        }
        Err(Error::StaleWrite(GitRefs::full_ref_name(&refname)))
    }

    fn read_blob(&self, reference: &str) -> Result<Option<Vec<u8>>> {
        let oid = Oid::from_str(reference)
            .map_err(|_| Error::InvalidRequest(format!("not a blob reference: {}", reference)))?;
        let repo = self.repo()?;
        let result = match repo.find_blob(oid) {
            Ok(blob) => Ok(Some(blob.content().to_vec())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        };
        result
    }
}
