//! Git refs management under the `refs/lanekeeper/` namespace.
//!
//! Low-level primitives for the git-backed state store. Every update that
//! replaces a ref is a compare-and-swap against the oid the caller last saw;
//! git serialises these across processes with ref lock files.

use std::path::{Path, PathBuf};

use git2::{ErrorCode, Oid, Repository};
use tracing::debug;

use crate::{Error, Result};

/// The namespace prefix for all lanekeeper refs.
const REFS_PREFIX: &str = "refs/lanekeeper/";

/// Manages git refs under the `refs/lanekeeper/` namespace.
pub struct GitRefs {
    repo_path: PathBuf,
}

impl GitRefs {
    /// # Errors
    /// Returns an error if the path is not a valid git repository.
    pub fn new(repo_path: &Path) -> Result<Self> {
        debug!("GitRefs::new path={}", repo_path.display());
        let _ = Repository::discover(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    pub fn full_ref_name(name: &str) -> String {
        format!("{}{}", REFS_PREFIX, name)
    }

    pub fn ref_exists(&self, name: &str) -> Result<bool> {
        Ok(self.read_ref(name)?.is_some())
    }

    /// Read the target of `refs/lanekeeper/{name}`, `None` if absent.
    pub fn read_ref(&self, name: &str) -> Result<Option<Oid>> {
        let repo = self.repo()?;
        let refname = Self::full_ref_name(name);

        let target = match repo.find_reference(&refname) {
            Ok(reference) => Ok(reference.target()),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        };
        target
    }

    /// Create a ref only if it does not exist yet.
    ///
    /// Returns `false` when another writer got there first.
    pub fn create_ref(&self, name: &str, target: Oid) -> Result<bool> {
        debug!("GitRefs::create_ref name={} target={}", name, target);
        let repo = self.repo()?;
        let refname = Self::full_ref_name(name);

        let created = match repo.reference(&refname, target, false, "lanekeeper: create") {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::Exists => {
                debug!("Ref {} already exists", refname);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        };
        created
    }

    /// Point an existing ref at `new`, provided it still points at `expected`.
    ///
    /// # Errors
    /// `Error::StaleWrite` if the ref moved or vanished since `expected` was
    /// read, or another writer holds its lock.
    pub fn compare_and_swap(&self, name: &str, expected: Oid, new: Oid) -> Result<()> {
        debug!(
            "GitRefs::compare_and_swap name={} {} -> {}",
            name, expected, new
        );
        let repo = self.repo()?;
        let refname = Self::full_ref_name(name);

        let swapped = match repo.reference_matching(&refname, new, true, expected, "lanekeeper: update") {
            Ok(_) => Ok(()),
            Err(e)
                if matches!(
                    e.code(),
                    ErrorCode::Modified | ErrorCode::NotFound | ErrorCode::Locked
                ) =>
            {
                debug!("Lost compare-and-swap on {}", refname);
                Err(Error::StaleWrite(refname))
            }
            Err(e) => Err(e.into()),
        };
        swapped
    }

    /// Overwrite a ref unconditionally.
    pub fn force_ref(&self, name: &str, target: Oid) -> Result<()> {
        let repo = self.repo()?;
        repo.reference(
            &Self::full_ref_name(name),
            target,
            true,
            "lanekeeper: force",
        )?;
        Ok(())
    }

    /// Delete `refs/lanekeeper/{name}`. No error if the ref doesn't exist.
    pub fn delete_ref(&self, name: &str) -> Result<()> {
        debug!("GitRefs::delete_ref name={}", name);
        let repo = self.repo()?;
        let refname = Self::full_ref_name(name);

        match repo.find_reference(&refname) {
            Ok(mut reference) => {
                reference.delete()?;
                debug!("Deleted ref {}", refname);
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!("Ref {} not found (already deleted?)", refname);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Names under `refs/lanekeeper/{prefix}`, with the namespace stripped.
    pub fn list_refs(&self, prefix: &str) -> Result<Vec<String>> {
        let repo = self.repo()?;
        let search = format!("{}{}*", REFS_PREFIX, prefix);

        let mut refs: Vec<String> = repo
            .references_glob(&search)?
            .filter_map(|r| r.ok())
            .filter_map(|r| r.name().map(String::from))
            .filter_map(|name| name.strip_prefix(REFS_PREFIX).map(String::from))
            .collect();
        refs.sort();
        Ok(refs)
    }
}
