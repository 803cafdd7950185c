//! Local working-copy cache.
//!
//! One directory per repository id under a configured root; absence of the
//! directory means "not yet synchronized". Only [`RepositoryCache::sync_or_clone`]
//! mutates a checkout — from every other caller's perspective the cache is
//! read-only.
//!
//! Failure containment: a failed clone leaves no checkout behind (the
//! partial directory is removed), and in the update path the hard reset is
//! the last destructive step, attempted only after fetch and checkout
//! succeeded, so a failed fetch leaves the previous checkout intact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::error::SyncError;
use crate::git::{GitCli, sanitize_url};

/// Repository cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory holding one working copy per repository id.
    pub root: PathBuf,
}

/// Result of a sync-or-clone operation.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Commit hash of the working copy after the operation.
    pub commit: String,
    /// Whether the operation changed the checked-out commit.
    ///
    /// A fresh clone always counts as changed.
    pub changed: bool,
}

/// Read-only snapshot of a local checkout.
#[derive(Debug, Clone)]
pub struct CheckoutStatus {
    /// Commit hash of `HEAD`.
    pub commit: String,
    /// Currently checked-out branch.
    pub branch: String,
    /// When the checkout was last synchronized.
    pub last_synced_at: DateTime<Utc>,
}

/// Exclusive access to one repository's working copy.
///
/// Obtained from [`RepositoryCache::lock`]; every mutating or
/// working-copy-reading operation takes it by reference, so a
/// sync-then-build sequence stays atomic with respect to other requests for
/// the same repository.
#[derive(Debug)]
pub struct RepoGuard {
    repo_id: Uuid,
    _permit: OwnedMutexGuard<()>,
}

impl RepoGuard {
    /// The repository this guard serializes.
    #[must_use]
    pub fn repo_id(&self) -> Uuid {
        self.repo_id
    }
}

/// Owns the local working copies and serializes access to them.
#[derive(Debug)]
pub struct RepositoryCache {
    root: PathBuf,
    git: GitCli,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl RepositoryCache {
    /// Creates a cache over the configured root directory.
    #[must_use]
    pub fn new(config: CacheConfig, git: GitCli) -> Self {
        Self {
            root: config.root,
            git,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The working-copy directory for a repository id.
    #[must_use]
    pub fn repo_path(&self, repo_id: Uuid) -> PathBuf {
        self.root.join(repo_id.to_string())
    }

    /// Acquires the per-repository lock, waiting behind any in-flight
    /// operation on the same repository. Operations on distinct
    /// repositories never contend.
    pub async fn lock(&self, repo_id: Uuid) -> RepoGuard {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(
                locks
                    .entry(repo_id)
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        RepoGuard {
            repo_id,
            _permit: entry.lock_owned().await,
        }
    }

    /// Synchronizes the working copy to the tip of `branch`, cloning it
    /// first if no checkout exists.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] naming the failed stage. A clone failure
    /// leaves no checkout; an update failure before the reset step leaves
    /// the previous checkout intact.
    pub async fn sync_or_clone(
        &self,
        guard: &RepoGuard,
        url: &str,
        branch: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let repo_id = guard.repo_id();
        let path = self.repo_path(repo_id);

        if path.join(".git").is_dir() {
            self.update(&path, repo_id, branch).await
        } else {
            self.clone_fresh(&path, repo_id, url, branch).await
        }
    }

    async fn clone_fresh(
        &self,
        path: &Path,
        repo_id: Uuid,
        url: &str,
        branch: &str,
    ) -> Result<SyncOutcome, SyncError> {
        std::fs::create_dir_all(&self.root)?;
        tracing::info!(%repo_id, url = %sanitize_url(url), branch, "cloning repository");

        if let Err(err) = self.git.clone_repo(url, branch, path).await {
            // No partial state: a failed clone must leave the slot absent.
            if path.exists() {
                let _ = std::fs::remove_dir_all(path);
            }
            return Err(err);
        }

        let commit = self.git.rev_parse_head(path).await?;
        tracing::info!(%repo_id, commit = %short(&commit), "clone complete");
        Ok(SyncOutcome {
            commit,
            changed: true,
        })
    }

    async fn update(
        &self,
        path: &Path,
        repo_id: Uuid,
        branch: &str,
    ) -> Result<SyncOutcome, SyncError> {
        tracing::info!(%repo_id, branch, "updating repository");

        self.git.fetch_all(path).await?;
        self.git.checkout(path, branch).await?;
        let old_commit = self.git.rev_parse_head(path).await?;
        // Reset is the only destructive step and runs last.
        self.git.reset_hard(path, branch).await?;
        let commit = self.git.rev_parse_head(path).await?;

        let changed = commit != old_commit;
        tracing::info!(%repo_id, commit = %short(&commit), changed, "repository at tip");
        Ok(SyncOutcome { commit, changed })
    }

    /// Returns a snapshot of the local checkout, or `None` when no checkout
    /// exists for the repository.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] if an existing checkout cannot be inspected.
    pub async fn status(&self, repo_id: Uuid) -> Result<Option<CheckoutStatus>, SyncError> {
        let path = self.repo_path(repo_id);
        let git_dir = path.join(".git");
        if !git_dir.is_dir() {
            return Ok(None);
        }

        let commit = self.git.rev_parse_head(&path).await?;
        let branch = self.git.current_branch(&path).await?;
        let last_synced_at = std::fs::metadata(&git_dir)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)?;

        Ok(Some(CheckoutStatus {
            commit,
            branch,
            last_synced_at,
        }))
    }

    /// Deletes the local checkout entirely. Idempotent: returns `false`
    /// when no checkout existed.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] if the directory exists but cannot be removed.
    pub async fn remove(&self, repo_id: Uuid) -> Result<bool, SyncError> {
        let _guard = self.lock(repo_id).await;
        let path = self.repo_path(repo_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&path)?;
        tracing::info!(%repo_id, "removed local checkout");
        Ok(true)
    }
}

fn short(commit: &str) -> &str {
    &commit[..commit.len().min(8)]
}
