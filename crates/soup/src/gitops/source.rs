//! Version-control collaborator interface and the working-copy guard.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::error::{Result, SourceError};

/// Exclusive ownership of one cloned working copy.
///
/// The directory `<clone-root>/<unique-id>` is removed when the handle is
/// dropped, whether the reconciliation run succeeded or not.
#[derive(Debug)]
pub struct RepositoryHandle {
    path: PathBuf,
}

impl RepositoryHandle {
    /// Reserves a fresh location under `clone_root`. The location itself is
    /// left for the clone to create.
    pub fn create(clone_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(clone_root).map_err(|source| SourceError::CloneLocation {
            path: clone_root.to_path_buf(),
            source,
        })?;

        let path = clone_root.join(uuid::Uuid::new_v4().to_string());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepositoryHandle {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => log::debug!("Removed working copy {}", self.path.display()),
            Err(e) => log::warn!(
                "Failed to remove working copy {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Clone, enumerate, fetch and checkout against a remote.
///
/// Every operation after `clone_to` acts on the working copy owned by the
/// given handle.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn clone_to(&self, handle: &RepositoryHandle) -> Result<()>;

    /// Remote branch names in listing order.
    async fn list_branches(&self, handle: &RepositoryHandle) -> Result<Vec<String>>;

    async fn fetch(&self, handle: &RepositoryHandle) -> Result<()>;

    async fn checkout(&self, handle: &RepositoryHandle, branch: &str) -> Result<()>;

    /// Lists remote branches without a working copy.
    async fn ls_remote(&self) -> Result<Vec<String>>;

    /// Succeeds when the remote answers. Polled by readiness checks, so
    /// implementations must not record audit events here.
    async fn reachable(&self) -> Result<()> {
        self.ls_remote().await.map(|_| ())
    }
}

/// Strips a leading `refs/heads/` from a branch reference.
pub fn normalize_branch_ref(reference: &str) -> &str {
    reference
        .strip_prefix("refs/heads/")
        .unwrap_or(reference)
}
